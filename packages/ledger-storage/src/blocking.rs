//! Thread-blocking access to the same store for callers without an async runtime.
//!
//! Every method parks the calling thread until the round-trip finishes. Calling them from
//! inside a Tokio runtime panics; async callers use [`Db`] directly.

use tokio::runtime::{Builder, Runtime};

use crate::{
	Error, Result,
	db::{Db, FetchMode, Param, QueryOutput, Statement},
	migrations::{self, MigrationStatus},
};

pub struct BlockingDb {
	runtime: Runtime,
	db: Db,
}
impl BlockingDb {
	pub fn connect(cfg: &ledger_config::Postgres) -> Result<Self> {
		let runtime = Builder::new_multi_thread()
			.worker_threads(1)
			.thread_name("ledger-blocking-db")
			.enable_all()
			.build()
			.map_err(|err| Error::Connection(format!("Failed to build blocking runtime: {err}.")))?;
		let db = runtime.block_on(Db::connect(cfg))?;

		Ok(Self { runtime, db })
	}

	pub fn db(&self) -> &Db {
		&self.db
	}

	pub fn execute(&self, sql: &str, params: &[Param], mode: FetchMode) -> Result<QueryOutput> {
		self.runtime.block_on(self.db.execute(sql, params, mode))
	}

	pub fn execute_transaction(&self, statements: &[Statement]) -> Result<()> {
		self.runtime.block_on(self.db.execute_transaction(statements))
	}

	pub fn run_pending_migrations(&self, vector_dim: u32) -> Result<Vec<String>> {
		self.runtime.block_on(migrations::run_pending_migrations(&self.db, vector_dim))
	}

	pub fn migration_status(&self) -> Result<MigrationStatus> {
		self.runtime.block_on(migrations::migration_status(&self.db))
	}

	pub fn close(self) {
		self.runtime.block_on(self.db.close());
	}
}
