//! Settlement daemon entry point.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon
//! settled
//!
//! # Database lifecycle
//! settled db migrate
//! settled db status
//! settled db init
//! ```
//!
//! Configuration comes from environment variables (see `config.rs`); a bad
//! configuration or an unreachable dependency is a fatal startup error with
//! exit code 1.

mod db;

use db::run_db_command;
use settled::{Config, Daemon};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("settled=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "db" {
        return run_db_command(args).await;
    }

    let config = Config::from_env()?;
    Daemon::new(config).run().await
}
