use std::collections::HashSet;
use std::process::ExitCode;
use std::sync::Arc;

use chatorbit_client::{
    ChatClient, ClientSettings, SessionIdentity, SettingsStore, TimelineSnapshot, logging,
};
use chatorbit_core::{ConnectionState, DEFAULT_ROOM, MessageId, ModerationFlags, SenderId};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

const BACKLOG_ON_JUMP: usize = 20;

/// Terminal client for one chat room.
#[derive(Debug, Parser)]
#[command(name = "chatorbit", version)]
struct Cli {
    /// Room to join; an empty name joins `general`.
    #[arg(long, default_value = DEFAULT_ROOM)]
    room: String,
    /// Id the server knows this user by.
    #[arg(long, env = "CHATORBIT_USER_ID")]
    user_id: String,
    /// Session token for the push stream; without it the room is read-only.
    #[arg(long, env = "CHATORBIT_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// Overrides the configured API base for this run.
    #[arg(long)]
    api_base: Option<String>,
    /// Also keeps `--api-base` as the default for later runs.
    #[arg(long, requires = "api_base")]
    save_api_base: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    let store = SettingsStore::load();
    let settings = match (cli.api_base, cli.save_api_base) {
        (Some(api_base), true) => match store.remember_api_base(&api_base) {
            Ok(settings) => settings,
            Err(error) => {
                tracing::error!(error = %error, "failed to save api base");
                return ExitCode::FAILURE;
            }
        },
        (Some(api_base), false) => Arc::new(
            ClientSettings {
                api_base,
                ..(*store.settings()).clone()
            }
            .normalized(),
        ),
        (None, _) => store.settings(),
    };

    let identity = SessionIdentity {
        user_id: SenderId::new(cli.user_id),
        token: cli.token,
    };
    let mut client = match ChatClient::connect(settings, identity) {
        Ok(client) => client,
        Err(error) => {
            tracing::error!(error = %error, "failed to start client");
            return ExitCode::FAILURE;
        }
    };

    client.enter_room(&cli.room).await;
    let Some(view) = client.current() else {
        return ExitCode::FAILURE;
    };
    println!("joined #{} (/latest to jump, /quit to leave)", view.room());

    let mut snapshots = view.subscribe();
    let mut printer = Printer::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                printer.render(&snapshot);
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match line.trim() {
                    "/quit" => break,
                    "/latest" => {
                        view.jump_to_latest();
                        printer.replay(&view.snapshot(), BACKLOG_ON_JUMP);
                    }
                    _ => match view.send(line.as_str(), ModerationFlags::default()).await {
                        Ok(Ok(_echo)) => {}
                        Ok(Err(rejection)) => eprintln!("! {rejection}"),
                        Err(error) => {
                            tracing::error!(error = %error, "room view stopped");
                            break;
                        }
                    },
                },
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(error = %error, "stdin closed");
                    break;
                }
            },
        }
    }

    client.leave().await;
    ExitCode::SUCCESS
}

/// Appends new timeline entries to stdout.
#[derive(Default)]
struct Printer {
    shown: HashSet<MessageId>,
    connection: ConnectionState,
}

impl Printer {
    fn render(&mut self, snapshot: &TimelineSnapshot) {
        if snapshot.connection != self.connection {
            self.connection = snapshot.connection;
            eprintln!("* connection {}", snapshot.connection);
        }

        for message in &snapshot.messages {
            if self.shown.insert(message.id.clone()) {
                print_line(message);
            }
        }
    }

    fn replay(&mut self, snapshot: &TimelineSnapshot, count: usize) {
        let skip = snapshot.messages.len().saturating_sub(count);
        for message in snapshot.messages.iter().skip(skip) {
            self.shown.insert(message.id.clone());
            print_line(message);
        }
    }
}

fn print_line(message: &chatorbit_core::RenderedMessage) {
    let marker = if message.is_own { ">" } else { " " };
    println!(
        "{marker} [{}] {}: {}",
        message.timestamp.format("%H:%M:%S"),
        message.display_name,
        message.content
    );
}
