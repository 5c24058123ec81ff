//! Rotation engine CLI.
//!
//! Four subcommands: `hook` (one-shot, invoked by the host on each turn),
//! `sync` (discover and reconcile credentials once), `daemon` (the
//! long-running adaptive quota monitor), and `status` (read-only keyring
//! inspection).

use clap::{Parser, Subcommand};

use rotation_engine::config::EngineConfig;
use rotation_engine::keyring::{KeyringStore, KeyStatus};
use rotation_engine::monitor::QuotaMonitor;
use rotation_engine::probe::HealthProber;
use rotation_engine::refresh::RefreshClient;
use rotation_engine::{Engine, Result};

#[derive(Parser)]
#[command(name = "rotation-engine", version, about = "Multi-account API key rotation and quota-arbitration engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one hook cycle and print the host envelope as JSON to stdout.
    Hook,
    /// Discover and reconcile credentials once.
    Sync,
    /// Run the adaptive quota monitor until terminated.
    Daemon,
    /// Print a human-readable summary of the current keyring.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;
    rotation_engine::logging::init_logging(None);

    match cli.command {
        Command::Hook => {
            let engine = Engine::new(config);
            let envelope = engine.run_hook_cycle().await;
            println!("{}", serde_json::to_string(&envelope)?);
        }
        Command::Sync => {
            let engine = Engine::new(config);
            let keyring = engine.run_sync_once().await;
            eprintln!("synced: {} key(s) tracked", keyring.keys.len());
        }
        Command::Daemon => {
            let http = reqwest::Client::new();
            let store = KeyringStore::new(config.state_path.clone(), config.human_log_path.clone());
            let refresh_client = RefreshClient::new(
                http.clone(),
                config.provider_base_url.clone(),
                config.oauth_client_id.clone(),
            );
            let prober = HealthProber::new(http, config.provider_base_url.clone());
            let mut monitor = QuotaMonitor::new(config, store, refresh_client, prober);
            monitor.run().await;
        }
        Command::Status => {
            let engine = Engine::new(config);
            print_status(&engine.load_keyring());
        }
    }

    Ok(())
}

fn print_status(keyring: &rotation_engine::keyring::Keyring) {
    if keyring.keys.is_empty() {
        println!("no keys tracked");
        return;
    }

    let mut ids: Vec<&String> = keyring.keys.keys().collect();
    ids.sort();

    for key_id in ids {
        let record = &keyring.keys[key_id];
        let active_marker = if keyring.active_key_id.as_deref() == Some(key_id.as_str()) {
            "*"
        } else {
            " "
        };
        let status = match record.status {
            KeyStatus::Active => "active",
            KeyStatus::Exhausted => "exhausted",
            KeyStatus::Invalid => "invalid",
            KeyStatus::Expired => "expired",
        };
        let usage = record
            .last_usage
            .map_or("unknown".to_string(), |u| format!("{:.0}%", u.max_usage()));
        let email = record.account_email.as_deref().unwrap_or("-");

        println!("{active_marker} {key_id} [{status}] usage={usage} account={email}");
    }
}
