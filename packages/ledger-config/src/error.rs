use std::{io, path::PathBuf};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Cannot read ledger config {path:?}: {source}")]
	ReadConfig { path: PathBuf, source: io::Error },
	#[error("Ledger config {path:?} is not valid TOML: {source}")]
	ParseConfig { path: PathBuf, source: toml::de::Error },
	/// `key` is the dotted path of the offending setting, e.g. `storage.postgres.dsn`.
	#[error("Invalid {key}: {message}")]
	Validation { key: String, message: String },
}
impl Error {
	pub(crate) fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
		Self::Validation { key: key.into(), message: message.into() }
	}
}
