use anyhow::Context;
use rusqlite::Connection;
use tracing::info;

/// Embedded schema migrations, ordered by the timestamp prefix of their file name. Each is
/// applied at most once; the applied set is tracked in `schema_migrations`.
const MIGRATIONS: &[(&str, &str)] = &[(
	"20240610120000_create_swaps",
	include_str!("../../migrations/20240610120000_create_swaps.sql"),
)];

pub fn migrate_to_latest(connection: &mut Connection) -> anyhow::Result<()> {
	connection
		.execute_batch(
			"CREATE TABLE IF NOT EXISTS schema_migrations (
				version TEXT PRIMARY KEY,
				applied_at INTEGER NOT NULL
			);",
		)
		.context("Failed to create schema_migrations table")?;

	for (version, sql) in MIGRATIONS {
		let already_applied: bool = connection
			.query_row(
				"SELECT EXISTS (SELECT 1 FROM schema_migrations WHERE version = ?1)",
				[version],
				|row| row.get(0),
			)
			.context("Failed to query applied migrations")?;
		if already_applied {
			continue;
		}

		let tx = connection.transaction()?;
		tx.execute_batch(sql).with_context(|| format!("Failed to apply migration {version}"))?;
		tx.execute(
			"INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
			rusqlite::params![version, chrono::Utc::now().timestamp_millis()],
		)?;
		tx.commit()?;
		info!("Applied migration {version}");
	}

	Ok(())
}
