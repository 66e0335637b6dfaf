use sqlx::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Connection error: {0}")]
	Connection(String),
	#[error("Constraint violation: {0}")]
	Constraint(String),
	#[error("Conflict: {0}")]
	Conflict(String),
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("Schema not ready: {0}")]
	SchemaNotReady(String),
	#[error("Migration {version} failed: {source}")]
	Migration {
		version: String,
		#[source]
		source: Box<Error>,
	},
	#[error(transparent)]
	Sqlx(sqlx::Error),
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		if matches!(
			err,
			sqlx::Error::PoolTimedOut
				| sqlx::Error::PoolClosed
				| sqlx::Error::WorkerCrashed
				| sqlx::Error::Io(_)
				| sqlx::Error::Tls(_)
		) {
			return Self::Connection(err.to_string());
		}

		if let Some(db_err) = err.as_database_error() {
			let message = db_err.message().to_string();

			match db_err.kind() {
				ErrorKind::UniqueViolation => return Self::Conflict(message),
				ErrorKind::ForeignKeyViolation
				| ErrorKind::NotNullViolation
				| ErrorKind::CheckViolation => return Self::Constraint(message),
				_ => {},
			}
		}

		Self::Sqlx(err)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pool_failures_classify_as_connection_errors() {
		assert!(matches!(Error::from(sqlx::Error::PoolTimedOut), Error::Connection(_)));
		assert!(matches!(Error::from(sqlx::Error::PoolClosed), Error::Connection(_)));

		let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");

		assert!(matches!(Error::from(sqlx::Error::Io(io)), Error::Connection(_)));
	}

	#[test]
	fn other_driver_errors_stay_wrapped() {
		let err = Error::from(sqlx::Error::RowNotFound);

		assert!(matches!(err, Error::Sqlx(sqlx::Error::RowNotFound)));
	}
}
