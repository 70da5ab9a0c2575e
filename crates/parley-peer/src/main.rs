//! parley-peer — interactive chat peer.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use parley_core::config::ParleyConfig;
use parley_peer::{PeerOverlay, PeerSettings, StdoutSink};

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Join(&'a str),
    Leave(&'a str),
    Switch(&'a str),
    Channels,
    Peers,
    Help,
    Quit,
    Say(&'a str),
    Send(&'a str, &'a str),
    Usage(&'static str),
    Unknown(&'a str),
    Empty,
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Say(line);
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let with_channel = |make: fn(&'a str) -> Command<'a>, usage| {
            if arg.is_empty() {
                Command::Usage(usage)
            } else {
                make(arg)
            }
        };
        match name {
            "join" => with_channel(Command::Join, "/join <channel>"),
            "leave" => with_channel(Command::Leave, "/leave <channel>"),
            "switch" => with_channel(Command::Switch, "/switch <channel>"),
            "send" => match arg.split_once(char::is_whitespace) {
                Some((channel, content)) if !content.trim().is_empty() => {
                    Command::Send(channel, content.trim())
                }
                _ => Command::Usage("/send <channel> <message>"),
            },
            "channels" => Command::Channels,
            "peers" => Command::Peers,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => Command::Unknown(name),
        }
    }
}

const HELP: &str = "\
Commands:
  /join <channel>    join a channel and connect to its members
  /leave <channel>   leave a channel
  /switch <channel>  show chat from another joined channel
  /send <channel> <message>
                     send to a channel without switching to it
  /channels          list channels
  /peers             list connected peers
  /quit              leave the network
Anything else is sent to the current channel.";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = ParleyConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ParleyConfig::default()
    });
    if let Some(username) = std::env::args().nth(1) {
        config.peer.username = username;
    }

    let settings = PeerSettings::from_config(&config.peer);
    let advertise = settings.advertise_ip.clone();
    let overlay = PeerOverlay::start(settings, Arc::new(StdoutSink))
        .await
        .context("failed to start peer")?;

    println!(
        "{} ({}) listening on {}:{}",
        overlay.username(),
        overlay.peer_id(),
        advertise,
        overlay.local_addr().port()
    );
    match overlay.register().await {
        Ok(_) => println!("Registered with tracker"),
        Err(e) => println!("Registration failed: {e}"),
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt(&overlay).await;
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else { break };
        if !run_command(&overlay, Command::parse(&line)).await {
            break;
        }
    }

    overlay.stop().await;
    println!("Goodbye!");
    Ok(())
}

async fn prompt(overlay: &PeerOverlay) {
    let channel = overlay.current_channel().await.unwrap_or_default();
    print!("[{} @{}]> ", overlay.username(), channel);
    let _ = std::io::stdout().flush();
}

/// Returns false when the console should exit.
async fn run_command(overlay: &PeerOverlay, command: Command<'_>) -> bool {
    match command {
        Command::Join(channel) => match overlay.join_channel(channel).await {
            Ok(n) => println!("Joined {channel}, connected to {n} new peer(s)"),
            Err(e) => println!("Join failed: {e}"),
        },
        Command::Leave(channel) => match overlay.leave_channel(channel).await {
            Ok(()) => println!("Left {channel}"),
            Err(e) => println!("Leave failed: {e}"),
        },
        Command::Switch(channel) => {
            if overlay.switch_channel(channel).await {
                println!("Now chatting in {channel}");
            } else {
                println!("Not a member of {channel}; /join it first");
            }
        }
        Command::Channels => {
            let joined = overlay.joined_channels().await;
            println!("Joined: {}", joined.join(", "));
            match overlay.tracker_channels().await {
                Ok(channels) => println!("Tracker: {}", channels.join(", ")),
                Err(e) => println!("Tracker query failed: {e}"),
            }
        }
        Command::Peers => {
            let peers = overlay.connected_peers();
            if peers.is_empty() {
                println!("No connected peers");
            }
            for peer in peers {
                println!("  {} ({}) at {}", peer.username, peer.peer_id, peer.remote_addr);
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return false,
        Command::Say(content) => match overlay.current_channel().await {
            Some(channel) => send(overlay, &channel, content).await,
            None => println!("Join a channel first: /join <channel>"),
        },
        Command::Send(channel, content) => send(overlay, channel, content).await,
        Command::Usage(usage) => println!("Usage: {usage}"),
        Command::Unknown(name) => println!("Unknown command: /{name} (try /help)"),
        Command::Empty => {}
    }
    true
}

async fn send(overlay: &PeerOverlay, channel: &str, content: &str) {
    match overlay.send_message(channel, content).await {
        Ok(0) => println!("(no connected peers)"),
        Ok(_) => {}
        Err(e) => println!("Send failed: {e}"),
    }
}
