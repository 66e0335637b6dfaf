use std::{str::FromStr, time::Duration};

use serde_json::Value;
use sqlx::{
	Connection, PgConnection, PgPool, Postgres,
	postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow},
	query::Query,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result};

const ADMIN_DATABASES: [&str; 2] = ["postgres", "template1"];

/// A positional statement parameter. Values are always bound, never spliced into SQL text.
#[derive(Debug, Clone)]
pub enum Param {
	Text(Option<String>),
	Int(i64),
	Bool(bool),
	Uuid(Option<Uuid>),
	Json(Value),
	Bytes(Vec<u8>),
	Timestamp(OffsetDateTime),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
	One,
	All,
	None,
}

#[derive(Debug)]
pub enum QueryOutput {
	Row(Option<PgRow>),
	Rows(Vec<PgRow>),
	Affected(u64),
}

#[derive(Debug, Clone)]
pub struct Statement {
	pub sql: String,
	pub params: Vec<Param>,
}

#[derive(Clone)]
pub struct Db {
	pub pool: PgPool,
}
impl Db {
	pub async fn connect(cfg: &ledger_config::Postgres) -> Result<Self> {
		let pool = PgPoolOptions::new()
			.min_connections(cfg.pool_min_conns)
			.max_connections(cfg.pool_max_conns)
			.acquire_timeout(Duration::from_millis(cfg.acquire_timeout_ms))
			.connect(&cfg.dsn)
			.await?;

		tracing::info!(
			min_connections = cfg.pool_min_conns,
			max_connections = cfg.pool_max_conns,
			"Postgres pool ready."
		);

		Ok(Self { pool })
	}

	/// Runs one statement on a checked-out connection and shapes the result by `mode`.
	pub async fn execute(&self, sql: &str, params: &[Param], mode: FetchMode) -> Result<QueryOutput> {
		let mut conn = self.pool.acquire().await?;

		run_statement(&mut *conn, sql, params, mode).await
	}

	/// Runs `statements` in order as one transaction. Any failure rolls back all of them.
	pub async fn execute_transaction(&self, statements: &[Statement]) -> Result<()> {
		let mut conn = self.pool.acquire().await?;

		run_transaction(&mut *conn, statements).await
	}

	pub async fn close(&self) {
		self.pool.close().await;

		tracing::info!("Postgres pool closed.");
	}
}

impl QueryOutput {
	pub fn into_row(self) -> Option<PgRow> {
		match self {
			Self::Row(row) => row,
			Self::Rows(rows) => rows.into_iter().next(),
			Self::Affected(_) => None,
		}
	}

	pub fn into_rows(self) -> Vec<PgRow> {
		match self {
			Self::Row(row) => row.into_iter().collect(),
			Self::Rows(rows) => rows,
			Self::Affected(_) => Vec::new(),
		}
	}

	pub fn rows_affected(&self) -> u64 {
		match self {
			Self::Row(row) => u64::from(row.is_some()),
			Self::Rows(rows) => rows.len() as u64,
			Self::Affected(count) => *count,
		}
	}
}

impl Statement {
	pub fn new(sql: impl Into<String>) -> Self {
		Self { sql: sql.into(), params: Vec::new() }
	}

	pub fn with_params(sql: impl Into<String>, params: Vec<Param>) -> Self {
		Self { sql: sql.into(), params }
	}
}

/// Creates the database named in `cfg.dsn` when it does not exist yet.
///
/// Needs a role allowed to create databases. Failures are logged and reported as `false`
/// because the database usually exists already or is managed elsewhere.
pub async fn create_database_if_missing(cfg: &ledger_config::Postgres) -> bool {
	match create_database_if_missing_inner(cfg).await {
		Ok(created) => created,
		Err(err) => {
			tracing::warn!(error = %err, "Database creation check failed.");

			false
		},
	}
}

pub(crate) async fn run_statement(
	conn: &mut PgConnection,
	sql: &str,
	params: &[Param],
	mode: FetchMode,
) -> Result<QueryOutput> {
	let query = bind_params(sqlx::query(sql), params);
	let output = match mode {
		FetchMode::One => QueryOutput::Row(query.fetch_optional(&mut *conn).await?),
		FetchMode::All => QueryOutput::Rows(query.fetch_all(&mut *conn).await?),
		FetchMode::None => QueryOutput::Affected(query.execute(&mut *conn).await?.rows_affected()),
	};

	Ok(output)
}

pub(crate) async fn run_transaction(conn: &mut PgConnection, statements: &[Statement]) -> Result<()> {
	let mut tx = conn.begin().await?;

	for statement in statements {
		if let Err(err) =
			run_statement(&mut *tx, statement.sql.as_str(), &statement.params, FetchMode::None).await
		{
			if let Err(rollback_err) = tx.rollback().await {
				tracing::warn!(error = %rollback_err, "Transaction rollback failed.");
			}

			return Err(err);
		}
	}

	tx.commit().await?;

	Ok(())
}

fn bind_params<'q>(
	mut query: Query<'q, Postgres, PgArguments>,
	params: &'q [Param],
) -> Query<'q, Postgres, PgArguments> {
	for param in params {
		query = match param {
			Param::Text(value) => query.bind(value.as_deref()),
			Param::Int(value) => query.bind(*value),
			Param::Bool(value) => query.bind(*value),
			Param::Uuid(value) => query.bind(*value),
			Param::Json(value) => query.bind(value),
			Param::Bytes(value) => query.bind(value.as_slice()),
			Param::Timestamp(value) => query.bind(*value),
		};
	}

	query
}

async fn create_database_if_missing_inner(cfg: &ledger_config::Postgres) -> Result<bool> {
	let options = PgConnectOptions::from_str(&cfg.dsn)?;
	let Some(database) = options.get_database().map(str::to_string) else {
		return Err(Error::InvalidArgument("DSN does not name a database.".to_string()));
	};
	let mut admin = connect_admin(&options).await?;
	let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
		.bind(database.as_str())
		.fetch_optional(&mut admin)
		.await?;

	if exists.is_some() {
		tracing::info!(database = %database, "Database already exists.");

		return Ok(false);
	}

	let create_sql = format!(r#"CREATE DATABASE "{}""#, database.replace('"', "\"\""));

	sqlx::query(create_sql.as_str()).execute(&mut admin).await?;

	tracing::info!(database = %database, "Created database.");

	Ok(true)
}

async fn connect_admin(base_options: &PgConnectOptions) -> Result<PgConnection> {
	let mut last_err = None;

	for database in ADMIN_DATABASES {
		let options = base_options.clone().database(database);

		match PgConnection::connect_with(&options).await {
			Ok(conn) => return Ok(conn),
			Err(err) => {
				last_err = Some(err);
			},
		}
	}

	Err(Error::Connection(format!("Failed to connect to an admin database: {last_err:?}.")))
}
