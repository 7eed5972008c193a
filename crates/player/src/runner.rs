//! Console front end: reads commands from stdin, applies them to the local
//! session, broadcasts what changed and prints what the server sends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use tabletop_domain::{TokenAction, TokenId, TokenRecord};
use tabletop_shared::{ClientMessage, ServerMessage};

use crate::application::{LocalSession, SessionEvent};
use crate::infrastructure::{AssetRegistry, GameClient, PlayerConfig, SystemRandom};

const HELP: &str = "\
Commands:
  <text>                      chat
  /spawn <asset> <x> <y>      spawn a token
  /move <id> <x> <y>          move a token (and its group)
  /damage <id> <n>            /heal <id> <n>
  /interact <id>              use the tile under a token
  /action <id> <action>       rotate-cw rotate-ccw scale-up scale-down lock unlock
                              ungroup front back up down
  /group <id> <id> [...]      group tokens
  /asset <file>               register an image file as an asset
  /save <name>  /load <name>  campaign files
  /export <id> <file>  /import <file>
  /tokens  /ping  /help  /quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Chat(String),
    Spawn { asset: String, x: f64, y: f64 },
    Move { id: TokenId, x: f64, y: f64 },
    Damage { id: TokenId, amount: u32 },
    Heal { id: TokenId, amount: u32 },
    Interact(TokenId),
    Action { id: TokenId, action: TokenAction },
    Group(Vec<TokenId>),
    RegisterAsset(PathBuf),
    Save(String),
    Load(String),
    Export { id: TokenId, file: PathBuf },
    Import(PathBuf),
    Tokens,
    Ping,
    Help,
    Quit,
}

/// Parses one console line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Chat(line.to_string())));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    let command = match (name, args.as_slice()) {
        ("spawn", [asset, x, y]) => Command::Spawn {
            asset: asset.to_string(),
            x: number(x)?,
            y: number(y)?,
        },
        ("move", [id, x, y]) => Command::Move {
            id: TokenId::parse(*id)?,
            x: number(x)?,
            y: number(y)?,
        },
        ("damage", [id, n]) => Command::Damage {
            id: TokenId::parse(*id)?,
            amount: amount(n)?,
        },
        ("heal", [id, n]) => Command::Heal {
            id: TokenId::parse(*id)?,
            amount: amount(n)?,
        },
        ("interact", [id]) => Command::Interact(TokenId::parse(*id)?),
        ("action", [id, action]) => Command::Action {
            id: TokenId::parse(*id)?,
            action: token_action(action)?,
        },
        ("group", ids) if ids.len() >= 2 => Command::Group(
            ids.iter()
                .map(|id| TokenId::parse(*id))
                .collect::<Result<_, _>>()?,
        ),
        ("asset", [file]) => Command::RegisterAsset(PathBuf::from(*file)),
        ("save", [name]) => Command::Save(name.to_string()),
        ("load", [name]) => Command::Load(name.to_string()),
        ("export", [id, file]) => Command::Export {
            id: TokenId::parse(*id)?,
            file: PathBuf::from(*file),
        },
        ("import", [file]) => Command::Import(PathBuf::from(*file)),
        ("tokens", []) => Command::Tokens,
        ("ping", []) => Command::Ping,
        ("help", _) => Command::Help,
        ("quit" | "exit", _) => Command::Quit,
        _ => bail!("Unknown or malformed command: /{rest} (try /help)"),
    };
    Ok(Some(command))
}

fn number(raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .with_context(|| format!("not a number: {raw}"))
}

fn amount(raw: &str) -> Result<u32> {
    raw.parse::<u32>()
        .with_context(|| format!("not a non-negative whole number: {raw}"))
}

fn token_action(raw: &str) -> Result<TokenAction> {
    Ok(match raw {
        "rotate-cw" => TokenAction::RotateClockwise,
        "rotate-ccw" => TokenAction::RotateCounterClockwise,
        "scale-up" => TokenAction::ScaleUp,
        "scale-down" => TokenAction::ScaleDown,
        "lock" => TokenAction::Lock,
        "unlock" => TokenAction::Unlock,
        "ungroup" => TokenAction::Ungroup,
        "front" => TokenAction::BringToFront,
        "back" => TokenAction::SendToBack,
        "up" => TokenAction::MoveUp,
        "down" => TokenAction::MoveDown,
        other => bail!("unknown action: {other}"),
    })
}

/// `<dir>/<name>.json` unless `name` already ends in `.json`.
pub fn campaign_path(dir: &Path, name: &str) -> PathBuf {
    if name.ends_with(".json") {
        dir.join(name)
    } else {
        dir.join(format!("{name}.json"))
    }
}

enum Input {
    Server(Option<ServerMessage>),
    Line(std::io::Result<Option<String>>),
    Shutdown,
}

pub struct Console {
    config: PlayerConfig,
    session: LocalSession,
    client: GameClient,
}

impl Console {
    pub fn new(config: PlayerConfig) -> Self {
        let assets = AssetRegistry::load(config.assets_dir());
        tracing::info!(assets = assets.len(), dir = %config.assets_dir().display(), "Asset registry loaded");
        let session = LocalSession::new(assets, Arc::new(SystemRandom::new()));
        let client = GameClient::new(config.player_name.clone());
        Self {
            config,
            session,
            client,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        self.client
            .connect(&self.config.server, self.config.connect_timeout)
            .await?;
        println!(
            "Connected to {} as {}. Type /help for commands.",
            self.config.server, self.config.player_name
        );

        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let input = tokio::select! {
                _ = shutdown.cancelled() => Input::Shutdown,
                msg = self.client.recv() => Input::Server(msg),
                line = stdin.next_line() => Input::Line(line),
            };

            match input {
                Input::Shutdown => break,
                Input::Server(None) => {
                    println!("Disconnected from server.");
                    break;
                }
                Input::Server(Some(msg)) => {
                    for event in self.session.apply_server_message(msg) {
                        self.print_event(&event);
                    }
                }
                Input::Line(Ok(None)) => break,
                Input::Line(Err(e)) => {
                    tracing::error!(error = %e, "Failed to read stdin");
                    break;
                }
                Input::Line(Ok(Some(line))) => match parse_command(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => {
                        if let Err(e) = self.execute(command) {
                            println!("error: {e:#}");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{e:#}"),
                },
            }

            for text in self.session.take_script_output() {
                println!("[script] {text}");
            }
        }

        self.client.disconnect();
        Ok(())
    }

    fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Chat(message) => {
                self.send(ClientMessage::chat(message));
            }
            Command::Spawn { asset, x, y } => {
                let record = self.session.spawn_token(&asset, x, y)?;
                self.broadcast(&[record]);
            }
            Command::Move { id, x, y } => {
                let records = self.session.move_token(&id, x, y)?;
                self.broadcast(&records);
            }
            Command::Damage { id, amount } => {
                let record = self.session.apply_damage(&id, amount)?;
                self.broadcast(&[record]);
            }
            Command::Heal { id, amount } => {
                let record = self.session.heal(&id, amount)?;
                self.broadcast(&[record]);
            }
            Command::Interact(id) => {
                let record = self.session.interact(&id)?;
                self.broadcast(&[record]);
            }
            Command::Action { id, action } => {
                let records = self.session.apply_action(&id, action)?;
                self.broadcast(&records);
            }
            Command::Group(ids) => {
                let records = self.session.group(&ids)?;
                self.broadcast(&records);
            }
            Command::RegisterAsset(file) => {
                let name = self.session.register_asset(&file)?;
                println!("Registered asset {name}");
            }
            Command::Save(name) => {
                let path = campaign_path(&self.config.campaigns_dir(), &name);
                self.session.save_campaign(&path, &name, Utc::now())?;
                println!("Saved {}", path.display());
            }
            Command::Load(name) => {
                let path = campaign_path(&self.config.campaigns_dir(), &name);
                let loaded = self.session.load_campaign(&path)?;
                for warning in &loaded.warnings {
                    println!("warning: {warning}");
                }
                println!("Loaded {} ({} tokens)", path.display(), loaded.tokens);
                self.send(self.session.state_update_message());
            }
            Command::Export { id, file } => {
                self.session.export_token(&file, &id)?;
                println!("Exported {id} to {}", file.display());
            }
            Command::Import(file) => {
                let record = self.session.import_token(&file)?;
                self.broadcast(&[record]);
            }
            Command::Tokens => {
                for token in self.session.state().tokens_by_z() {
                    println!(
                        "{} [{}] at ({}, {}) hp {}/{} z {}",
                        token.name(),
                        token.id(),
                        token.x(),
                        token.y(),
                        token.hp(),
                        token.max_hp(),
                        token.z_index()
                    );
                }
            }
            Command::Ping => {
                self.send(ClientMessage::Ping);
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
        Ok(())
    }

    fn send(&self, msg: ClientMessage) {
        let kind = msg.type_name();
        if !self.client.send(msg) {
            tracing::warn!(message_type = kind, "Not connected, message dropped");
        }
    }

    fn broadcast(&self, records: &[TokenRecord]) {
        for record in records {
            self.send(ClientMessage::token_update(record));
        }
    }

    fn print_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::StateReplaced { tokens } => println!("Session replaced ({tokens} tokens)"),
            SessionEvent::TokenChanged(id) => {
                if let Some(token) = self.session.state().token(id) {
                    println!(
                        "{} [{}] at ({}, {}) hp {}/{}",
                        token.name(),
                        id,
                        token.x(),
                        token.y(),
                        token.hp(),
                        token.max_hp()
                    );
                }
            }
            SessionEvent::Chat { from, message } => println!("<{from}> {message}"),
            SessionEvent::ServerError(message) => println!("server error: {message}"),
            SessionEvent::Pong { time } => println!("pong {time:.3}"),
        }
    }
}
