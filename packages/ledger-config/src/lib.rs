mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Config, EmbeddingProviderConfig, Memory, Postgres, Providers, Service, Storage};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	let postgres = &cfg.storage.postgres;

	if postgres.dsn.trim().is_empty() {
		return Err(Error::invalid("storage.postgres.dsn", "must be non-empty."));
	}
	if postgres.pool_max_conns == 0 {
		return Err(Error::invalid("storage.postgres.pool_max_conns", "must be greater than zero."));
	}
	if postgres.pool_min_conns > postgres.pool_max_conns {
		return Err(Error::invalid(
			"storage.postgres.pool_min_conns",
			format!(
				"{} exceeds pool_max_conns ({}).",
				postgres.pool_min_conns, postgres.pool_max_conns
			),
		));
	}
	if postgres.acquire_timeout_ms == 0 {
		return Err(Error::invalid(
			"storage.postgres.acquire_timeout_ms",
			"must be greater than zero.",
		));
	}
	if cfg.memory.vector_dim == 0 {
		return Err(Error::invalid("memory.vector_dim", "must be greater than zero."));
	}

	if let Some(embedding) = cfg.providers.embedding.as_ref() {
		if embedding.dimensions != cfg.memory.vector_dim {
			return Err(Error::invalid(
				"providers.embedding.dimensions",
				format!(
					"{} does not match memory.vector_dim ({}).",
					embedding.dimensions, cfg.memory.vector_dim
				),
			));
		}
		if embedding.api_key.trim().is_empty() {
			return Err(Error::invalid("providers.embedding.api_key", "must be non-empty."));
		}
		if embedding.timeout_ms == 0 {
			return Err(Error::invalid(
				"providers.embedding.timeout_ms",
				"must be greater than zero.",
			));
		}

		for (key, value) in &embedding.default_headers {
			if !value.is_string() {
				return Err(Error::invalid(
					format!("providers.embedding.default_headers.{key}"),
					format!("must be a string, got {value}."),
				));
			}
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.service.log_level.trim().is_empty() {
		cfg.service.log_level = "info".to_string();
	}
	if let Some(embedding) = cfg.providers.embedding.as_mut() {
		embedding.api_base = embedding.api_base.trim_end_matches('/').to_string();
	}
}
