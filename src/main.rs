use anyhow::{Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use discord_message_shortcut::config::{
    ConfigStore, FIELDS, FieldKey, missing_required_labels, preview_value,
};
use discord_message_shortcut::paths::{default_config_path, default_send_log_path};
use discord_message_shortcut::send_log::SendLog;
use discord_message_shortcut::sender::{DiscordSender, MessageSender, OutgoingMessage};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "discord-message-shortcut")]
#[command(about = "Bind a global hotkey that posts a fixed message to a Discord channel")]
struct Cli {
    /// Config file to operate on (defaults to the per-user location).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print every field with its readiness.
    Show,
    /// Set one configuration field (blank values reset defaulted fields).
    Set {
        #[arg(value_parser = parse_field)]
        field: FieldKey,
        value: String,
    },
    /// Send the configured message once, right now.
    Send {
        /// Override the stored message for this send only.
        #[arg(long)]
        message: Option<String>,
    },
    /// Print the config file location.
    Path,
}

fn parse_field(raw: &str) -> Result<FieldKey, String> {
    raw.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Show => {
            show(&ConfigStore::new(&config_path));
            Ok(())
        }
        Commands::Set { field, value } => set_field(ConfigStore::new(&config_path), field, &value),
        Commands::Send { message } => send_once(ConfigStore::new(&config_path), message).await,
        Commands::Path => {
            println!("{}", config_path.display());
            Ok(())
        }
    }
}

fn show(store: &ConfigStore) {
    for spec in FIELDS {
        let value = store.get(spec.key);
        let status = if value.trim().is_empty() {
            "NOT SET"
        } else {
            "READY"
        };
        println!(
            "{:<18} {:<8} {}",
            spec.label,
            status,
            preview_value(spec.key, value)
        );
    }

    let missing = missing_required_labels(store);
    if missing.is_empty() {
        println!("\nConfig OK: ready to activate.");
    } else {
        println!("\nMissing required configuration: {}", missing.join(", "));
    }
}

fn set_field(mut store: ConfigStore, field: FieldKey, value: &str) -> Result<()> {
    store.save(&[(field, value.to_string())])?;
    println!("{} = {}", field, preview_value(field, store.get(field)));

    let missing = missing_required_labels(&store);
    if !missing.is_empty() {
        println!("Still missing: {}", missing.join(", "));
    }
    println!("A running tray picks this up via its Reload config action.");
    Ok(())
}

async fn send_once(store: ConfigStore, message_override: Option<String>) -> Result<()> {
    let missing = missing_required_labels(&store);
    if !missing.is_empty() {
        bail!("cannot send, missing required configuration: {}", missing.join(", "));
    }

    let message = OutgoingMessage {
        content: message_override.unwrap_or_else(|| store.get(FieldKey::Message).to_string()),
        token: store.get(FieldKey::DiscordToken).to_string(),
        user_id: store.get(FieldKey::DiscordUserId).to_string(),
        server_id: store.get(FieldKey::ServerId).to_string(),
        channel_id: store.get(FieldKey::ChannelId).to_string(),
    };

    let log = SendLog::new(default_send_log_path());
    match DiscordSender::new().send(&message).await {
        Ok(()) => {
            let _ = log.append_success(Utc::now(), &message.content);
            println!("message sent to channel {}", message.channel_id);
            Ok(())
        }
        Err(err) => {
            let _ = log.append_failure(Utc::now(), &message.content, &format!("{err:#}"));
            Err(err)
        }
    }
}
