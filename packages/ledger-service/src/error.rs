pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Connection error: {message}")]
	Connection { message: String },
	#[error("Constraint violation: {message}")]
	ConstraintViolation { message: String },
	#[error("Artifact of {size} bytes exceeds the {limit} byte limit.")]
	SizeLimitExceeded { size: usize, limit: usize },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Serialization error: {message}")]
	Serialization { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl From<ledger_storage::Error> for Error {
	fn from(err: ledger_storage::Error) -> Self {
		match err {
			ledger_storage::Error::Connection(message) => Self::Connection { message },
			ledger_storage::Error::Constraint(message) => Self::ConstraintViolation { message },
			ledger_storage::Error::Conflict(message) => Self::Conflict { message },
			ledger_storage::Error::NotFound(message) => Self::NotFound { message },
			ledger_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			err @ (ledger_storage::Error::SchemaNotReady(_)
			| ledger_storage::Error::Migration { .. }
			| ledger_storage::Error::Sqlx(_)) => Self::Storage { message: err.to_string() },
		}
	}
}

impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		ledger_storage::Error::from(err).into()
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Self::Serialization { message: err.to_string() }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn storage_errors_keep_their_category() {
		let conflict = Error::from(ledger_storage::Error::Conflict("dup".to_string()));
		let constraint = Error::from(ledger_storage::Error::Constraint("fk".to_string()));
		let pool = Error::from(sqlx::Error::PoolTimedOut);

		assert!(matches!(conflict, Error::Conflict { .. }));
		assert!(matches!(constraint, Error::ConstraintViolation { .. }));
		assert!(matches!(pool, Error::Connection { .. }));
	}

	#[test]
	fn schema_errors_surface_as_storage() {
		let err = Error::from(ledger_storage::Error::SchemaNotReady("pending".to_string()));

		assert!(matches!(err, Error::Storage { message } if message.contains("pending")));
	}
}
