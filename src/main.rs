use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use webrtc::track::track_remote::TrackRemote;

use chorus_client_core::chat::{ChatLine, RoomSink};
use chorus_client_core::config::RelaySettings;
use chorus_client_core::media::{AudioSink, SilentSource};
use chorus_client_core::rooms::RoomDirectory;
use chorus_client_core::{JoinParams, RoomSession};

#[derive(Parser, Debug)]
#[command(name = "chorus", about = "Peer-mesh voice and chat rooms")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List public rooms on the relay.
    Rooms {
        #[command(flatten)]
        settings: RelaySettings,
    },
    /// Create a room.
    Create {
        name: String,
        #[arg(long, default_value = "")]
        password: String,
        /// Private rooms are reachable by id but never listed.
        #[arg(long)]
        private: bool,
        #[command(flatten)]
        settings: RelaySettings,
    },
    /// Join a room by id or name and stay until `/quit` or Ctrl-C.
    Join {
        room: String,
        #[arg(long, default_value = "")]
        password: String,
        #[arg(long, env = "CHORUS_NICKNAME")]
        nickname: Option<String>,
        #[command(flatten)]
        settings: RelaySettings,
    },
}

/// Renders chat and occupancy to stdout.
struct StdoutSink;

impl RoomSink for StdoutSink {
    fn chat_line(&self, line: ChatLine) {
        if line.is_local {
            println!("you: {}", line.text);
        } else {
            println!("{}: {}", line.nickname, line.text);
        }
    }

    fn user_count(&self, count: u32) {
        println!("* {count} in room");
    }
}

/// No playback device in the CLI; remote audio is drained so the transport
/// keeps flowing, and each new track is announced once.
struct DrainingSink;

impl AudioSink for DrainingSink {
    fn on_remote_track(&self, peer_id: &str, track: Arc<TrackRemote>) {
        println!("* audio from {peer_id}");
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while track.read(&mut buf).await.is_ok() {}
        });
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Rooms { settings } => {
            let directory = RoomDirectory::new(&settings.server)?;
            let rooms = directory
                .list_public()
                .await
                .context("failed to list rooms")?;
            if rooms.is_empty() {
                println!("no public rooms");
            }
            for room in rooms {
                let lock = if room.has_password { " [locked]" } else { "" };
                println!("{}  {} ({} online){lock}", room.id, room.name, room.user_count);
            }
        }
        Command::Create {
            name,
            password,
            private,
            settings,
        } => {
            let directory = RoomDirectory::new(&settings.server)?;
            let created = directory
                .create(&name, &password, private)
                .await
                .context("failed to create room")?;
            println!("created room {} (id {})", created.name, created.id);
        }
        Command::Join {
            room,
            password,
            nickname,
            settings,
        } => {
            let nickname = nickname.unwrap_or_else(|| {
                let id = Uuid::new_v4().simple().to_string();
                format!("guest-{}", &id[..8])
            });
            let mut session = RoomSession::join(
                JoinParams {
                    server: settings.server,
                    room,
                    password,
                    nickname: nickname.clone(),
                    stun_servers: settings.stun_servers,
                },
                Arc::new(SilentSource),
                Arc::new(DrainingSink),
                Arc::new(StdoutSink),
            )
            .await
            .context("failed to join room")?;

            println!(
                "joined {} as {nickname} (type to chat, /quit to leave)",
                session.room().name
            );

            let handle = session.handle();
            tokio::spawn(async move {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim();
                    if line == "/quit" {
                        handle.leave();
                        break;
                    }
                    if !line.is_empty() {
                        handle.send_chat(line.to_string());
                    }
                }
            });

            let handle = session.handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    handle.leave();
                }
            });

            session.run().await?;
        }
    }
    Ok(())
}
