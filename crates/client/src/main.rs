mod cli;
mod config;
mod console;

use std::sync::Arc;

use anyhow::{Result, anyhow};
use huddle_client::observer::{NoticeLevel, RoomEvent};
use huddle_client::{
    Collaborators, HeadlessDevice, HeadlessMedia, RetryPolicy, RoomClient, RoomOptions,
    WsConnector,
};
use huddle_protocol::{CodecPreference, invitation_link, protoo_url, random_peer_id, random_room_id};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

fn log_event(event: &RoomEvent) {
    match event {
        RoomEvent::StateChanged(state) => tracing::info!(?state, "Room state changed"),
        RoomEvent::PeerAdded(peer) => {
            tracing::info!(peer_id = %peer.id, name = %peer.display_name, "Peer in room")
        }
        RoomEvent::PeerRemoved { peer_id } => tracing::info!(%peer_id, "Peer left"),
        RoomEvent::ProducerAdded(p) => {
            tracing::info!(producer_id = %p.id, kind = %p.kind, "Producing")
        }
        RoomEvent::ConsumerAdded(c) => tracing::info!(
            consumer_id = %c.id,
            peer_id = %c.peer_id,
            kind = %c.kind,
            "Consuming"
        ),
        RoomEvent::ConsumerRemoved { consumer_id, .. } => {
            tracing::info!(%consumer_id, "Consumer gone")
        }
        RoomEvent::Notify(notice) => match notice.level {
            NoticeLevel::Info => tracing::info!("{}", notice.text),
            NoticeLevel::Error => tracing::warn!("{}", notice.text),
        },
        RoomEvent::ProducerScore { .. } | RoomEvent::ConsumerScore { .. } => {
            tracing::trace!(?event, "Score")
        }
        other => tracing::debug!(event = ?other, "Room event"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = cli::parse_args()?;
    let mut config = config::load_config(&args.config_path)?;
    args.apply(&mut config);

    if let Err(issues) = config.validate() {
        let has_errors = issues.iter().any(|i| i.starts_with("ERROR:"));
        for issue in &issues {
            if issue.starts_with("ERROR:") {
                tracing::error!("{}", issue);
            } else {
                tracing::warn!("{}", issue);
            }
        }
        if has_errors {
            tracing::error!(
                "Configuration has {} issue(s). Fix the ERROR(s) above and restart.",
                issues.len()
            );
            std::process::exit(1);
        }
    }

    let room_id = config.room.room_id.clone().unwrap_or_else(random_room_id);
    let peer_id = config.room.peer_id.clone().unwrap_or_else(random_peer_id);
    let codec = CodecPreference::from_room(&config.room);
    let url = protoo_url(&config.server, &room_id, &peer_id, codec);
    tracing::info!(
        %room_id,
        %peer_id,
        "Invitation link: {}",
        invitation_link(&config.server, &room_id, codec)
    );

    let (event_tx, mut events) = mpsc::unbounded_channel::<RoomEvent>();
    let connector = WsConnector::new(
        config.server.tls_cert.clone(),
        RetryPolicy::from(&config.signaling),
    );
    let parts = Collaborators {
        device_factory: HeadlessDevice::factory(),
        media: Box::new(HeadlessMedia::new()),
        observer: Arc::new(event_tx),
        connector: Arc::new(connector),
    };
    let (client, worker) = RoomClient::spawn(RoomOptions::from_config(&config, url), parts);
    client.join();
    tokio::spawn(console::run(client.clone()));

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    loop {
        tokio::select! {
            Some(event) = events.recv() => log_event(&event),
            _ = client.closed() => break,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT, leaving the room");
                client.close();
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, leaving the room");
                client.close();
            }
        }
    }

    if let Err(e) = worker.await {
        tracing::error!("Room worker failed: {e}");
    }
    while let Ok(event) = events.try_recv() {
        log_event(&event);
    }

    tracing::info!("Huddle client shut down cleanly");
    Ok(())
}

