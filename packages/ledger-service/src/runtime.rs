use ledger_config::Config;
use ledger_storage::{
	db::{self, Db},
	migrations,
};

use crate::{LedgerService, Providers, Result};

/// An explicit handle on one configured store: the pool, the migrated schema and the service.
pub struct LedgerRuntime {
	service: LedgerService,
}
impl LedgerRuntime {
	/// Creates the database when missing, connects, applies pending migrations and checks the
	/// schema before handing out the service.
	pub async fn start(cfg: Config, providers: Providers) -> Result<Self> {
		let postgres = &cfg.storage.postgres;

		db::create_database_if_missing(postgres).await;

		let db = Db::connect(postgres).await?;
		let applied = migrations::run_pending_migrations(&db, cfg.memory.vector_dim).await?;

		migrations::verify_schema(&db).await?;

		tracing::info!(
			applied = applied.len(),
			schema_version = migrations::current_version(),
			embedding = cfg.providers.embedding.is_some(),
			"Ledger runtime ready."
		);

		Ok(Self { service: LedgerService::with_providers(cfg, db, providers) })
	}

	pub fn service(&self) -> &LedgerService {
		&self.service
	}

	pub async fn close(self) {
		self.service.db.close().await;
	}
}
