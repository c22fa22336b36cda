//! Database CLI subcommands.
//!
//! Provides `db migrate`, `db status`, and `db init`.

use anyhow::{anyhow, Result};
use std::env;
use tracing::info;

use settle_db::{init_system_data, migrate, status};

/// Run database CLI subcommands.
///
/// Supported commands:
/// - `settled db migrate` - run pending migrations
/// - `settled db status`  - check migration status
/// - `settled db init`    - seed system wallets and accounts
pub async fn run_db_command(args: Vec<String>) -> Result<()> {
    if args.len() < 3 {
        return Err(anyhow!("Usage: settled db <migrate|status|init>"));
    }

    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow!("DATABASE_URL environment variable is required for db commands"))?;

    let pool = sqlx::PgPool::connect(&database_url).await?;

    match args[2].as_str() {
        "migrate" => {
            migrate(&pool).await?;
        }
        "status" => {
            status(&pool).await?;
        }
        "init" => {
            let (escrow_id, fee_id) = init_system_data(&pool).await?;
            info!("Initialized: escrow_account={}, fee_account={}", escrow_id, fee_id);
        }
        other => {
            return Err(anyhow!("Unknown db command: {}. Use migrate, status, or init", other));
        }
    }

    Ok(())
}
