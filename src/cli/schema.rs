//! Schema command - print or apply the database schema
//!
//! Without --apply the DDL goes to stdout for piping into psql, which
//! needs no configuration file at all.

use super::SchemaArgs;
use crate::db;
use anyhow::Result;
use std::path::Path;

/// Run the schema command
pub async fn run_schema(config_path: &Path, args: &SchemaArgs) -> Result<()> {
    if !args.apply {
        print!("{}", db::schema::SCHEMA_SQL);
        return Ok(());
    }

    let (config, pool) = super::open(config_path).await?;
    db::schema::apply(&pool).await?;
    println!(
        "✅ Schema applied to {} on {}",
        config.database.dbname, config.database.host
    );
    println!("\n💡 Register servers next: dovecot-loadbalancer server add --name mx1 --host 10.0.0.11");
    Ok(())
}
