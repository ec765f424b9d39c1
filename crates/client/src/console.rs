//! Line commands read from stdin while the room is running.

use huddle_client::RoomClient;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ConsoleCommand {
    Mic(bool),
    MuteMic,
    UnmuteMic,
    Cam(bool),
    SwitchCam,
    AudioOnly(bool),
    MuteAudio,
    UnmuteAudio,
    RestartIce,
    KeyFrame(String),
    Pause(String),
    Resume(String),
    Name(String),
    Quit,
}

const USAGE: &str = "commands: mic on|off, mute, unmute, cam on|off, cam switch, \
                     audio-only on|off, mute-audio, unmute-audio, restart-ice, \
                     keyframe <id>, pause <id>, resume <id>, name <text>, quit";

fn on_off(word: Option<&str>) -> Result<bool, String> {
    match word {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => Err("expected 'on' or 'off'".to_string()),
    }
}

fn id(word: Option<&str>, what: &str) -> Result<String, String> {
    word.map(str::to_string)
        .ok_or_else(|| format!("missing {what}"))
}

pub(crate) fn parse(line: &str) -> Result<ConsoleCommand, String> {
    let line = line.trim();
    let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let arg = (!rest.is_empty()).then_some(rest);

    match head {
        "mic" => on_off(arg).map(ConsoleCommand::Mic),
        "mute" => Ok(ConsoleCommand::MuteMic),
        "unmute" => Ok(ConsoleCommand::UnmuteMic),
        "cam" if arg == Some("switch") => Ok(ConsoleCommand::SwitchCam),
        "cam" => on_off(arg).map(ConsoleCommand::Cam),
        "audio-only" => on_off(arg).map(ConsoleCommand::AudioOnly),
        "mute-audio" => Ok(ConsoleCommand::MuteAudio),
        "unmute-audio" => Ok(ConsoleCommand::UnmuteAudio),
        "restart-ice" => Ok(ConsoleCommand::RestartIce),
        "keyframe" => id(arg, "consumer id").map(ConsoleCommand::KeyFrame),
        "pause" => id(arg, "consumer id").map(ConsoleCommand::Pause),
        "resume" => id(arg, "consumer id").map(ConsoleCommand::Resume),
        "name" => id(arg, "display name").map(ConsoleCommand::Name),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        "" => Err(USAGE.to_string()),
        other => Err(format!("unknown command '{other}'; {USAGE}")),
    }
}

fn dispatch(client: &RoomClient, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Mic(true) => client.enable_mic(),
        ConsoleCommand::Mic(false) => client.disable_mic(),
        ConsoleCommand::MuteMic => client.mute_mic(),
        ConsoleCommand::UnmuteMic => client.unmute_mic(),
        ConsoleCommand::Cam(true) => client.enable_cam(),
        ConsoleCommand::Cam(false) => client.disable_cam(),
        ConsoleCommand::SwitchCam => client.change_cam(),
        ConsoleCommand::AudioOnly(true) => client.enable_audio_only(),
        ConsoleCommand::AudioOnly(false) => client.disable_audio_only(),
        ConsoleCommand::MuteAudio => client.mute_audio(),
        ConsoleCommand::UnmuteAudio => client.unmute_audio(),
        ConsoleCommand::RestartIce => client.restart_ice(),
        ConsoleCommand::KeyFrame(id) => client.request_consumer_key_frame(id),
        ConsoleCommand::Pause(id) => client.pause_consumer(id),
        ConsoleCommand::Resume(id) => client.resume_consumer(id),
        ConsoleCommand::Name(name) => client.change_display_name(name),
        ConsoleCommand::Quit => client.close(),
    }
}

/// Read commands until stdin ends or `quit`. Stdin EOF leaves the room open.
pub(crate) async fn run(client: RoomClient) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("Console input closed");
                return;
            }
            Err(e) => {
                tracing::warn!("Failed to read console input: {e}");
                return;
            }
        };
        match parse(&line) {
            Ok(command) => {
                let quit = command == ConsoleCommand::Quit;
                dispatch(&client, command);
                if quit {
                    return;
                }
            }
            Err(message) => eprintln!("{message}"),
        }
    }
}
