mod client;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::DaemonClient;
use shared::ipc::{Command, Response};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "polly")]
#[command(about = "Control the Polly push-to-talk voice daemon")]
struct Cli {
    /// Control socket of the daemon
    #[arg(long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a turn, like pressing the button
    Press,
    /// Show the turn state and relay connection
    Status,
    /// Check that the daemon is responding
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = match cli.socket {
        Some(path) => DaemonClient::with_socket(path),
        None => DaemonClient::new(),
    };

    let command = match cli.command {
        Commands::Press => Command::Press,
        Commands::Status => Command::Status,
        Commands::Ping => Command::Ping,
    };

    match client.send_command(command).await {
        Ok(Response::Ok) => {
            println!("Success");
        }
        Ok(Response::Pong) => {
            println!("pollyd is running");
        }
        Ok(Response::Status(info)) => {
            println!("Status:");
            println!("  Turn: {}", info.turn_state);
            println!(
                "  Relay: {} ({})",
                info.relay_mode,
                if info.peer_connected {
                    "peer connected"
                } else {
                    "no peer"
                }
            );
            println!("  Turns completed: {}", info.turns_completed);
            println!("  Turns failed: {}", info.turns_failed);
            println!("  Presses ignored: {}", info.presses_ignored);
        }
        Ok(Response::Error(msg)) => {
            eprintln!("Error: {}", msg);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to reach pollyd: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
