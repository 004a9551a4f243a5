//! Schema migration command

use super::require_db_path;
use cmdbus_engine::EngineConfig;
use cmdbus_store::{db, migrations};

pub fn execute(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let path = require_db_path(config)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut conn = db::open(&path)?;
    db::configure(&conn, config.store.wal)?;
    let newly_applied = migrations::apply_migrations(&mut conn)?;

    if newly_applied.is_empty() {
        println!("Schema of {} is up to date", path.display());
    } else {
        println!("Migrations applied to {}:", path.display());
    }
    for recorded in migrations::applied_migrations(&conn)? {
        let marker = if newly_applied.contains(&recorded.migration_id.as_str()) {
            "+"
        } else {
            " "
        };
        println!(
            "{} {} (checksum {})",
            marker,
            recorded.migration_id,
            recorded.checksum.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}
