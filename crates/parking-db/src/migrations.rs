//! Database migrations

use crate::{DbConfig, DbError, DbResult};
use scylla::Session;
use tracing::info;

/// Create the keyspace and registry table when missing, then switch the
/// session to the keyspace
pub async fn run_all(session: &Session, config: &DbConfig) -> DbResult<()> {
    info!("Running database migrations...");

    let keyspace = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = \
         {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        config.keyspace, config.replication_factor
    );
    session
        .query_unpaged(keyspace, &[])
        .await
        .map_err(|e| DbError::Migration(e.to_string()))?;

    session
        .use_keyspace(&config.keyspace, false)
        .await
        .map_err(|e| DbError::Migration(e.to_string()))?;

    session
        .query_unpaged(
            "CREATE TABLE IF NOT EXISTS kv_store (key text PRIMARY KEY, value text)",
            &[],
        )
        .await
        .map_err(|e| DbError::Migration(e.to_string()))?;

    info!(keyspace = %config.keyspace, "Migrations complete");
    Ok(())
}
