use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use clap::Parser;
use dotenvy::dotenv;
use medchat_client::config::{self, ClientConfig};
use medchat_client::input::{self, Input, ParseError};
use medchat_client::network::{
    ClientHandle, ControllerState, EventHandler, HistoryClient, ReconnectController, WsConnector,
};
use medchat_common::{Message, ServerEvent};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "medchat-client", version, about = "Terminal client for medchat")]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// WebSocket endpoint, e.g. ws://127.0.0.1:8080/ws
    #[arg(long, value_name = "URL")]
    server: Option<String>,
    /// Base URL of the REST endpoints
    #[arg(long, value_name = "URL")]
    api: Option<String>,
    /// User to authenticate as
    #[arg(long)]
    user: Option<String>,
}

/// Prints events and reconciles unread messages after a reconnect.
struct Terminal {
    user_id: String,
    history: HistoryClient,
    connected_before: AtomicBool,
}

#[async_trait]
impl EventHandler for Terminal {
    async fn on_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage(message) => print_message(&message),
            ServerEvent::MessageSent(message) => {
                println!("  sent {} to {}", message.id, message.recipient_id);
            }
            ServerEvent::MessageRead {
                message_id,
                reader_id,
                read_timestamp,
            } => println!("  {reader_id} read {message_id} at {read_timestamp}"),
            ServerEvent::UnreadCount { count, .. } => println!("  {count} unread"),
            ServerEvent::PresenceChanged { user_id, online } => {
                println!("  {user_id} is {}", if online { "online" } else { "offline" });
            }
            ServerEvent::Pong { .. } => {}
            ServerEvent::Error { code, message } => println!("! {code}: {message}"),
        }
    }

    async fn on_state(&self, state: ControllerState) {
        println!("[{state}]");
        if state == ControllerState::Exhausted {
            println!("! Could not reach the server. Restart the client to try again.");
        }
        if state.is_connected() && self.connected_before.swap(true, Ordering::SeqCst) {
            tokio::spawn(reconcile(self.history.clone(), self.user_id.clone()));
        }
    }
}

/// Show what arrived while the socket was down.
async fn reconcile(history: HistoryClient, user_id: String) {
    match history.unread(&user_id).await {
        Ok(unread) if !unread.is_empty() => {
            println!("  {} unread while away:", unread.len());
            unread.iter().for_each(print_message);
        }
        Ok(_) => {}
        Err(err) => log::warn!("Failed to reconcile unread messages: {err}"),
    }
}

fn print_message(message: &Message) {
    println!(
        "{} [{}] {}: {}",
        message.created_at.format("%H:%M"),
        message.id,
        message.sender_id,
        message.content
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut client_config = config::load_config(&cli.config);
    if let Some(server) = cli.server {
        client_config.server_url = server;
    }
    if let Some(api) = cli.api {
        client_config.api_url = api;
    }
    if let Some(user) = cli.user {
        client_config.user_id = user;
    }
    if client_config.user_id.trim().is_empty() {
        return Err("no user id: pass --user or set user_id in the config file".into());
    }

    run(client_config).await
}

async fn run(client_config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let history = HistoryClient::new(
        client_config.api_url.clone(),
        client_config.request_timeout(),
    )?;
    let connector = WsConnector::new(
        client_config.server_url.clone(),
        client_config.connect_timeout(),
    );
    let (handle, task) = ReconnectController::spawn(
        Arc::new(connector),
        client_config.user_id.clone(),
        client_config.controller_settings(),
    );
    handle.subscribe(Arc::new(Terminal {
        user_id: client_config.user_id.clone(),
        history: history.clone(),
        connected_before: AtomicBool::new(false),
    }));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut states = handle.state_changes();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match input::parse(&line) {
                    Ok(Input::Quit) => break,
                    Ok(command) => {
                        if let Err(err) = execute(&handle, &history, command).await {
                            println!("! {err}");
                        }
                    }
                    Err(ParseError::Empty) => {}
                    Err(err) => println!("! {err}"),
                }
            }
            changed = states.changed() => {
                if changed.is_err() || states.borrow().is_terminal() {
                    break;
                }
            }
        }
    }

    handle.unsubscribe();
    match task.await? {
        Ok(()) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn execute(
    handle: &ClientHandle,
    history: &HistoryClient,
    command: Input,
) -> Result<(), medchat_client::ClientError> {
    match command {
        Input::Send { to, text } => handle.send_message(to, text).await,
        Input::Read(message_id) => handle.mark_as_read(message_id).await,
        Input::Unread => {
            let unread = history.unread(handle.user_id()).await?;
            println!("  {} unread", unread.len());
            unread.iter().for_each(print_message);
            Ok(())
        }
        Input::History(with) => {
            history
                .conversation(handle.user_id(), &with)
                .await?
                .iter()
                .for_each(print_message);
            Ok(())
        }
        Input::Quit => Ok(()),
    }
}
