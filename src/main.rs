use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use showpull::logging::{LogConfig, LogFormat, LogRotation};
use showpull::{
    FeedClient, FeedClientConfig, FeedSelection, Ledger, ReqwestClient, ShowDirs,
    TransmissionClient, TransmissionConfig, WatchOptions,
};

/// Watch showRSS feeds and add new episodes to a Transmission daemon
#[derive(Parser, Debug)]
#[command(name = "showpull")]
#[command(about = "Watch showRSS feeds and add new episodes to Transmission")]
#[command(version)]
struct Args {
    /// showRSS show ids to watch (repeatable or comma separated)
    #[arg(long = "show", env = "SHOWPULL_SHOWS", value_delimiter = ',')]
    shows: Vec<u32>,

    /// showRSS user ids to watch (repeatable or comma separated)
    #[arg(long = "user", env = "SHOWPULL_USERS", value_delimiter = ',')]
    users: Vec<u32>,

    /// Base URL of the showRSS instance
    #[arg(
        long,
        env = "SHOWPULL_SHOWRSS_URL",
        default_value = "https://showrss.info"
    )]
    showrss_url: Url,

    /// Override the poll interval advertised by feeds, in minutes
    #[arg(long, env = "SHOWPULL_TTL")]
    ttl: Option<u64>,

    /// Transmission RPC URL
    #[arg(
        long,
        env = "SHOWPULL_TRANSMISSION_URL",
        default_value = "http://127.0.0.1:9091/transmission/rpc"
    )]
    transmission_url: Url,

    /// Transmission RPC username
    #[arg(long, env = "SHOWPULL_TRANSMISSION_USER")]
    transmission_user: Option<String>,

    /// Transmission RPC password
    #[arg(long, env = "SHOWPULL_TRANSMISSION_PASSWORD", hide_env_values = true)]
    transmission_password: Option<String>,

    /// Path to the idempotency ledger database
    #[arg(long, env = "SHOWPULL_DB", default_value = "showpull.db")]
    db: PathBuf,

    /// Download base directory; relative paths resolve against
    /// Transmission's default download directory
    #[arg(long, env = "SHOWPULL_DOWNLOAD_DIR")]
    download_dir: Option<PathBuf>,

    /// Place each show in its own subdirectory below the base directory
    #[arg(long, env = "SHOWPULL_SHOW_DIRS")]
    show_dirs: bool,

    /// Bind address for the read-only status endpoint, e.g. 127.0.0.1:8100
    #[arg(long, env = "SHOWPULL_BIND")]
    bind: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "showpull=debug"
    #[arg(long, env = "SHOWPULL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, env = "SHOWPULL_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Log to this file instead of stderr
    #[arg(long, env = "SHOWPULL_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Rotation policy for the log file
    #[arg(long, env = "SHOWPULL_LOG_ROTATION", value_enum, default_value_t = LogRotation::Never)]
    log_rotation: LogRotation,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = showpull::logging::init(&LogConfig {
        level: args.log_level.clone(),
        format: args.log_format,
        file: args.log_file.clone(),
        rotation: args.log_rotation,
    })?;

    let selection = FeedSelection {
        shows: args.shows,
        users: args.users,
    };
    info!(shows = ?selection.shows, users = ?selection.users, "feed selection");
    if selection.is_empty() {
        anyhow::bail!("must choose at least one show or user id");
    }

    let feeds = Arc::new(FeedClient::new(
        ReqwestClient::new(),
        FeedClientConfig {
            base_url: args.showrss_url,
            ttl_override: args.ttl.map(|m| std::time::Duration::from_secs(m * 60)),
        },
    ));

    let transmission = Arc::new(TransmissionClient::new(TransmissionConfig {
        url: args.transmission_url,
        username: args.transmission_user,
        password: args.transmission_password,
    }));

    let ledger = Arc::new(
        Ledger::open(&args.db)
            .with_context(|| format!("cannot open ledger database {}", args.db.display()))?,
    );

    let options = WatchOptions {
        selection,
        show_dirs: ShowDirs {
            path: args.download_dir,
            per_show: args.show_dirs,
        },
        status_addr: args.bind,
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, shutting down");
            signal_cancel.cancel();
        }
    });

    showpull::run(feeds, transmission, ledger, options, cancel)
        .await
        .context("watch pipeline failed")?;

    info!("shut down cleanly");
    Ok(())
}
