use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	#[serde(default)]
	pub service: Service,
	pub storage: Storage,
	#[serde(default)]
	pub memory: Memory,
	#[serde(default)]
	pub providers: Providers,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	#[serde(default = "default_pool_min_conns")]
	pub pool_min_conns: u32,
	pub pool_max_conns: u32,
	#[serde(default = "default_acquire_timeout_ms")]
	pub acquire_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Memory {
	/// Width of the `memory.embedding` column. Every stored embedding must match it.
	#[serde(default = "default_vector_dim")]
	pub vector_dim: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Providers {
	/// Optional. Without it, memory search is keyword-only.
	pub embedding: Option<EmbeddingProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

impl Default for Service {
	fn default() -> Self {
		Self { log_level: default_log_level() }
	}
}

impl Default for Memory {
	fn default() -> Self {
		Self { vector_dim: default_vector_dim() }
	}
}

impl Postgres {
	pub fn new(dsn: impl Into<String>, pool_max_conns: u32) -> Self {
		Self {
			dsn: dsn.into(),
			pool_min_conns: default_pool_min_conns().min(pool_max_conns),
			pool_max_conns,
			acquire_timeout_ms: default_acquire_timeout_ms(),
		}
	}
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_pool_min_conns() -> u32 {
	1
}

fn default_acquire_timeout_ms() -> u64 {
	30_000
}

fn default_vector_dim() -> u32 {
	384
}
