//! One-shot commands
//!
//! Each prints its result as JSON on stdout and exits.

use serde::Serialize;

use crate::config::Config;
use crate::error::Result;
use crate::storage::PgStore;

use super::Components;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run one lifecycle tick
pub async fn tick(config: Config) -> Result<()> {
    let components = Components::build(config).await?;
    let report = components.coordinator.tick().await?;
    print_json(&report)
}

/// Open a round now, even with an empty pool
pub async fn create_round(config: Config) -> Result<()> {
    let components = Components::build(config).await?;
    let action = components.coordinator.create_round().await?;
    print_json(&action)
}

/// Poll mentions and validate entries now
pub async fn sync_entries(config: Config) -> Result<()> {
    let components = Components::build(config).await?;
    let report = components.coordinator.sync_entries().await?;
    print_json(&report)
}

/// Ask the ledger to draw the winner of the ended round
pub async fn draw_winner(config: Config) -> Result<()> {
    let components = Components::build(config).await?;
    let outcome = components.coordinator.draw_winner().await?;
    print_json(&outcome)
}

pub async fn status(config: Config) -> Result<()> {
    let components = Components::build(config).await?;
    let report = components.coordinator.status().await?;
    print_json(&report)?;
    print_json(&components.rpc.endpoint_stats())
}

/// Create tables and indexes; safe to repeat
pub async fn init_db(config: Config) -> Result<()> {
    let store = PgStore::connect(&config.store_config()).await?;
    store.init_schema().await?;
    tracing::info!("Database schema ready");
    Ok(())
}
