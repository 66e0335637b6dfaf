pub mod artifact;
pub mod event;
pub mod memory;
pub mod runtime;
pub mod session;

mod error;

pub use artifact::{Artifact, ArtifactData, ArtifactMetadata, MAX_ARTIFACT_BYTES};
pub use error::{Error, Result};
pub use event::{Content, Event, EventActions, EventType, Part};
pub use memory::{MemoryEntry, MemoryScope, NewMemory};
pub use runtime::LedgerRuntime;
pub use session::{GetSessionConfig, Session};

use std::{future::Future, pin::Pin, sync::Arc};

use tracing_subscriber::EnvFilter;

use ledger_config::{Config, EmbeddingProviderConfig};
use ledger_providers::embedding;
use ledger_storage::db::Db;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>>;
}

#[derive(Clone)]
pub struct Providers {
	/// Only called when `[providers.embedding]` is configured.
	pub embedding: Arc<dyn EmbeddingProvider>,
}
impl Providers {
	pub fn new(embedding: Arc<dyn EmbeddingProvider>) -> Self {
		Self { embedding }
	}
}
impl Default for Providers {
	fn default() -> Self {
		Self { embedding: Arc::new(DefaultProviders) }
	}
}

/// Session, artifact and memory operations over one shared pool.
pub struct LedgerService {
	pub cfg: Config,
	pub db: Db,
	pub providers: Providers,
}
impl LedgerService {
	pub fn new(cfg: Config, db: Db) -> Self {
		Self::with_providers(cfg, db, Providers::default())
	}

	pub fn with_providers(cfg: Config, db: Db, providers: Providers) -> Self {
		Self { cfg, db, providers }
	}
}

struct DefaultProviders;
impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(embedding::embed(cfg, texts).await?) })
	}
}

/// Installs the global subscriber filtered by `service.log_level`.
pub fn init_tracing(cfg: &Config) -> color_eyre::Result<()> {
	let filter = EnvFilter::try_new(&cfg.service.log_level)
		.unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.try_init()
		.map_err(|err| color_eyre::eyre::eyre!("Failed to install tracing subscriber: {err}."))?;

	Ok(())
}

pub(crate) fn vector_to_pg(vec: &[f32]) -> String {
	let mut out = String::with_capacity(vec.len() * 8);

	out.push('[');

	for (i, value) in vec.iter().enumerate() {
		if i > 0 {
			out.push(',');
		}

		out.push_str(&value.to_string());
	}

	out.push(']');

	out
}
