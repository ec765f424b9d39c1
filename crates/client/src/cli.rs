use std::path::PathBuf;

use anyhow::Context;
use huddle_protocol::HuddleConfig;

/// Command-line overrides. Anything left `None` keeps the config file value.
#[derive(Debug, Default)]
pub(crate) struct Args {
    pub config_path: PathBuf,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub insecure: bool,
    pub tls_cert: Option<String>,
    pub room_id: Option<String>,
    pub peer_id: Option<String>,
    pub display_name: Option<String>,
    pub no_produce: bool,
    pub no_consume: bool,
    pub force_tcp: bool,
    pub force_h264: bool,
    pub force_vp9: bool,
}

impl Args {
    pub(crate) fn apply(&self, config: &mut HuddleConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.insecure {
            config.server.secure = false;
        }
        if let Some(cert) = &self.tls_cert {
            config.server.tls_cert = Some(cert.clone());
        }
        if let Some(room_id) = &self.room_id {
            config.room.room_id = Some(room_id.clone());
        }
        if let Some(peer_id) = &self.peer_id {
            config.room.peer_id = Some(peer_id.clone());
        }
        if let Some(name) = &self.display_name {
            config.room.display_name = name.clone();
        }
        if self.no_produce {
            config.media.produce = false;
        }
        if self.no_consume {
            config.media.consume = false;
        }
        if self.force_tcp {
            config.media.force_tcp = true;
        }
        if self.force_h264 {
            config.room.force_h264 = true;
        }
        if self.force_vp9 {
            config.room.force_vp9 = true;
        }
    }
}

fn print_help() {
    println!("huddle-client - mediasoup room client");
    println!();
    println!("USAGE:");
    println!("    huddle-client [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <PATH>          Config file [default: ./config/huddle.toml]");
    println!("    --host <HOST>                Signaling server host");
    println!("    -p, --port <PORT>            Signaling server port");
    println!("    --insecure                   Use ws:// instead of wss://");
    println!("    --tls-cert <PATH>            Extra PEM certificate to trust");
    println!("    --room-id <ID>               Room to join [default: random]");
    println!("    --peer-id <ID>               Our peer id [default: random]");
    println!("    --display-name <NAME>        Name shown to other peers");
    println!("    --no-produce                 Do not send microphone or camera");
    println!("    --no-consume                 Do not receive other peers' media");
    println!("    --force-tcp                  Ask the server for TCP-only ICE");
    println!("    --force-h264                 Ask the server to use H264");
    println!("    --force-vp9                  Ask the server to use VP9");
    println!("    -V, --version                Print version and exit");
    println!("    -h, --help                   Print this help and exit");
}

pub(crate) fn parse_args() -> anyhow::Result<Args> {
    parse_from(std::env::args().skip(1))
}

fn parse_from(args: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut parsed = Args {
        config_path: PathBuf::from("./config/huddle.toml"),
        ..Args::default()
    };

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-V" | "--version" => {
                println!("huddle-client {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-c" | "--config" => {
                parsed.config_path =
                    PathBuf::from(args.next().context("Missing --config value")?);
            }
            "--host" => {
                parsed.host = Some(args.next().context("Missing --host value")?);
            }
            "-p" | "--port" => {
                parsed.port = Some(
                    args.next()
                        .context("Missing --port value")?
                        .parse()
                        .context("Invalid --port value")?,
                );
            }
            "--insecure" => parsed.insecure = true,
            "--tls-cert" => {
                parsed.tls_cert = Some(args.next().context("Missing --tls-cert value")?);
            }
            "--room-id" => {
                parsed.room_id = Some(args.next().context("Missing --room-id value")?);
            }
            "--peer-id" => {
                parsed.peer_id = Some(args.next().context("Missing --peer-id value")?);
            }
            "--display-name" => {
                parsed.display_name =
                    Some(args.next().context("Missing --display-name value")?);
            }
            "--no-produce" => parsed.no_produce = true,
            "--no-consume" => parsed.no_consume = true,
            "--force-tcp" => parsed.force_tcp = true,
            "--force-h264" => parsed.force_h264 = true,
            "--force-vp9" => parsed.force_vp9 = true,
            other => anyhow::bail!("Unknown argument: {other}"),
        }
    }

    Ok(parsed)
}
