mod config_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    gatelink_gateway::{LoggingDispatcher, MemoryStore, ShardManager, WsConnector},
    secrecy::Secret,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "gatelink", about = "Gatelink: live-feed gateway client", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Directory to look for the config file in, instead of the defaults.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the gateway and stay connected until Ctrl-C.
    Connect {
        /// Gateway token. Overrides the config file.
        #[arg(long, env = "GATELINK_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Total shard count.
        #[arg(long)]
        shard_count: Option<u32>,
        /// Shards to run in this process (repeatable). Defaults to all.
        #[arg(long = "shard-id")]
        shard_ids: Vec<u32>,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

async fn connect(
    token: Option<String>,
    shard_count: Option<u32>,
    shard_ids: Vec<u32>,
) -> anyhow::Result<()> {
    let mut config = gatelink_config::discover_and_load();
    if let Some(count) = shard_count {
        config.shards.count = count;
    }
    if !shard_ids.is_empty() {
        config.shards.ids = Some(shard_ids);
    }

    let token = token
        .filter(|t| !t.trim().is_empty())
        .map(Secret::new)
        .or_else(|| config.resolve_token())
        .context("no gateway token: pass --token, set GATELINK_TOKEN or gateway.token")?;

    let store = Arc::new(MemoryStore::new());
    let shards = ShardManager::new(
        &config,
        token,
        Arc::new(WsConnector::new()),
        store.clone(),
        Arc::new(LoggingDispatcher),
    )?;

    let cancel = CancellationToken::new();
    tokio::select! {
        opened = shards.open_all(cancel.clone()) => opened?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted while opening shards");
            cancel.cancel();
            shards.close_all().await;
            return Ok(());
        },
    }
    info!(shards = shards.sessions().len(), "connected, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");
    shards.close_all().await;

    let counts = store.counts();
    info!(
        guilds = counts.guilds,
        channels = counts.channels,
        messages = counts.messages,
        users = counts.users,
        "final cache size"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(dir) = &cli.config_dir {
        gatelink_config::set_config_dir(dir.clone());
    }

    info!(version = env!("CARGO_PKG_VERSION"), "gatelink starting");

    match cli.command {
        Commands::Connect {
            token,
            shard_count,
            shard_ids,
        } => connect(token, shard_count, shard_ids).await,
        Commands::Config { action } => config_commands::handle_config(action),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_repeated_shard_ids() {
        let cli = Cli::try_parse_from([
            "gatelink",
            "--log-level",
            "debug",
            "connect",
            "--token",
            "abc",
            "--shard-count",
            "4",
            "--shard-id",
            "1",
            "--shard-id",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Connect {
                token,
                shard_count,
                shard_ids,
            } => {
                assert_eq!(token.as_deref(), Some("abc"));
                assert_eq!(shard_count, Some(4));
                assert_eq!(shard_ids, vec![1, 3]);
            },
            Commands::Config { .. } => panic!("expected connect"),
        }
    }

    #[test]
    fn parses_config_show() {
        let cli = Cli::try_parse_from(["gatelink", "config", "show", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: config_commands::ConfigAction::Show { json: true }
            }
        ));
    }
}
