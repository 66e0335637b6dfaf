use std::collections::BTreeSet;

use sqlx::{Connection, PgConnection};

use crate::{
	Error, Result,
	db::{self, Db, FetchMode, Param, Statement},
};

const ADVISORY_LOCK_ID: i64 = 7_340_112;
const REQUIRED_TABLES: [&str; 5] = ["schema_migrations", "sessions", "events", "artifacts", "memory"];

pub const MIGRATIONS: &[Migration] = &[
	Migration {
		version: "000",
		name: "enable_vector_extension",
		sql: include_str!("../../../sql/migrations/000_enable_vector_extension.sql"),
	},
	Migration {
		version: "001",
		name: "create_sessions",
		sql: include_str!("../../../sql/migrations/001_create_sessions.sql"),
	},
	Migration {
		version: "002",
		name: "create_events",
		sql: include_str!("../../../sql/migrations/002_create_events.sql"),
	},
	Migration {
		version: "003",
		name: "create_artifacts",
		sql: include_str!("../../../sql/migrations/003_create_artifacts.sql"),
	},
	Migration {
		version: "004",
		name: "create_memory",
		sql: include_str!("../../../sql/migrations/004_create_memory.sql"),
	},
	Migration {
		version: "005",
		name: "create_schema_migrations",
		sql: include_str!("../../../sql/migrations/005_create_schema_migrations.sql"),
	},
	Migration {
		version: "006",
		name: "artifact_version_unique",
		sql: include_str!("../../../sql/migrations/006_artifact_version_unique.sql"),
	},
];

#[derive(Debug, Clone, Copy)]
pub struct Migration {
	pub version: &'static str,
	pub name: &'static str,
	sql: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
	pub current_version: String,
	pub applied: Vec<String>,
	pub pending: Vec<String>,
	pub total_available: usize,
	pub database_ready: bool,
}

impl Migration {
	pub const fn new(version: &'static str, name: &'static str, sql: &'static str) -> Self {
		Self { version, name, sql }
	}

	pub fn render(&self, vector_dim: u32) -> String {
		self.sql.replace("<VECTOR_DIM>", &vector_dim.to_string())
	}

	pub fn statements(&self, vector_dim: u32) -> Vec<Statement> {
		self.render(vector_dim)
			.split(';')
			.map(str::trim)
			.filter(|statement| !statement.is_empty())
			.map(Statement::new)
			.collect()
	}
}

pub fn available_versions() -> Vec<&'static str> {
	let mut versions = MIGRATIONS.iter().map(|migration| migration.version).collect::<Vec<_>>();

	versions.sort_unstable();

	versions
}

pub fn current_version() -> &'static str {
	available_versions().last().copied().unwrap_or_default()
}

/// Applies every known migration that `schema_migrations` does not list yet, in version order.
///
/// Each migration and its tracking row commit together. The first failure rolls back that
/// migration and stops the queue. Returns the versions applied by this call.
pub async fn run_pending_migrations(db: &Db, vector_dim: u32) -> Result<Vec<String>> {
	apply_migrations(db, MIGRATIONS, vector_dim).await
}

/// Applies the pending entries of `manifest`.
///
/// Every migration transaction takes the transaction-scoped advisory lock before checking
/// `schema_migrations`, so concurrent runners serialize and the lock never outlives a dropped
/// transaction.
pub async fn apply_migrations(
	db: &Db,
	manifest: &[Migration],
	vector_dim: u32,
) -> Result<Vec<String>> {
	let mut conn = db.pool.acquire().await?;
	let tracking = MIGRATIONS
		.iter()
		.find(|migration| migration.name == "create_schema_migrations")
		.map(|migration| migration.statements(vector_dim))
		.unwrap_or_default();

	run_locked(&mut conn, &tracking).await?;

	let mut ordered = manifest.iter().collect::<Vec<_>>();

	ordered.sort_by_key(|migration| migration.version);

	let mut done = Vec::new();

	for migration in ordered {
		if apply_one(&mut conn, migration, vector_dim).await? {
			tracing::info!(
				version = migration.version,
				name = migration.name,
				"Migration applied."
			);

			done.push(migration.version.to_string());
		}
	}

	if done.is_empty() {
		tracing::info!("No pending migrations.");
	}

	Ok(done)
}

pub async fn migration_status(db: &Db) -> Result<MigrationStatus> {
	let mut conn = db.pool.acquire().await?;
	let applied = applied_versions(&mut conn).await?;
	let available = available_versions().into_iter().map(str::to_string).collect::<BTreeSet<_>>();
	let pending = available.difference(&applied).cloned().collect::<Vec<_>>();

	Ok(MigrationStatus {
		current_version: current_version().to_string(),
		applied: applied.into_iter().collect(),
		database_ready: pending.is_empty(),
		pending,
		total_available: available.len(),
	})
}

pub async fn verify_schema(db: &Db) -> Result<()> {
	{
		let mut conn = db.pool.acquire().await?;

		for table in REQUIRED_TABLES {
			if !table_exists(&mut conn, table).await? {
				return Err(Error::SchemaNotReady(format!(
					"Required table {table:?} is missing. Run pending migrations first."
				)));
			}
		}
	}

	let status = migration_status(db).await?;

	if !status.database_ready {
		return Err(Error::SchemaNotReady(format!(
			"Pending migrations: {}.",
			status.pending.join(", ")
		)));
	}

	Ok(())
}

/// Drops every table this crate manages. Development and test databases only.
pub async fn reset_database(db: &Db) -> Result<()> {
	tracing::warn!("Resetting database; all data will be lost.");

	let statements = ["memory", "artifacts", "events", "sessions", "schema_migrations"]
		.into_iter()
		.map(|table| Statement::new(format!("DROP TABLE IF EXISTS {table} CASCADE")))
		.collect::<Vec<_>>();

	db.execute_transaction(&statements).await
}

/// Runs `statements` in one transaction under the migration lock.
async fn run_locked(conn: &mut PgConnection, statements: &[Statement]) -> Result<()> {
	let mut tx = conn.begin().await?;

	lock_migrations(&mut tx).await?;

	for statement in statements {
		db::run_statement(&mut tx, &statement.sql, &statement.params, FetchMode::None).await?;
	}

	tx.commit().await?;

	Ok(())
}

/// Returns `false` when another runner already recorded `migration`.
async fn apply_one(
	conn: &mut PgConnection,
	migration: &Migration,
	vector_dim: u32,
) -> Result<bool> {
	let mut tx = conn.begin().await?;

	lock_migrations(&mut tx).await?;

	let applied: bool =
		sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM schema_migrations WHERE version = $1)")
			.bind(migration.version)
			.fetch_one(&mut *tx)
			.await?;

	if applied {
		tx.rollback().await?;

		return Ok(false);
	}

	let mut statements = migration.statements(vector_dim);

	statements.push(Statement::with_params(
		"INSERT INTO schema_migrations (version) VALUES ($1)",
		vec![Param::Text(Some(migration.version.to_string()))],
	));

	for statement in &statements {
		let result =
			db::run_statement(&mut tx, &statement.sql, &statement.params, FetchMode::None).await;

		if let Err(err) = result {
			tracing::warn!(version = migration.version, error = %err, "Migration failed.");

			if let Err(rollback_err) = tx.rollback().await {
				tracing::warn!(error = %rollback_err, "Migration rollback failed.");
			}

			return Err(Error::Migration {
				version: migration.version.to_string(),
				source: Box::new(err),
			});
		}
	}

	tx.commit().await?;

	Ok(true)
}

async fn lock_migrations(conn: &mut PgConnection) -> Result<()> {
	sqlx::query("SELECT pg_advisory_xact_lock($1)")
		.bind(ADVISORY_LOCK_ID)
		.execute(&mut *conn)
		.await?;

	Ok(())
}

async fn applied_versions(conn: &mut PgConnection) -> Result<BTreeSet<String>> {
	if !table_exists(conn, "schema_migrations").await? {
		return Ok(BTreeSet::new());
	}

	let versions: Vec<String> =
		sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
			.fetch_all(&mut *conn)
			.await?;

	Ok(versions.into_iter().collect())
}

async fn table_exists(conn: &mut PgConnection, table: &str) -> Result<bool> {
	let exists: bool = sqlx::query_scalar(
		"\
SELECT EXISTS (
	SELECT 1
	FROM information_schema.tables
	WHERE table_schema = current_schema() AND table_name = $1
)",
	)
	.bind(table)
	.fetch_one(&mut *conn)
	.await?;

	Ok(exists)
}
