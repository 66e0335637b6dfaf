use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, LedgerService, Result, event::Event, session};
use ledger_storage::{
	models::{ArtifactRow, NewArtifact},
	queries,
};

/// 25 MiB. Matches the `file_size` check on the `artifacts` table.
pub const MAX_ARTIFACT_BYTES: usize = 26_214_400;

const TEXT_CONTENT_TYPE: &str = "text/plain";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactData {
	Text(String),
	Binary { data: Vec<u8>, mime_type: String },
}
impl ArtifactData {
	pub fn content_type(&self) -> &str {
		match self {
			Self::Text(_) => TEXT_CONTENT_TYPE,
			Self::Binary { mime_type, .. } => mime_type,
		}
	}

	pub fn as_bytes(&self) -> &[u8] {
		match self {
			Self::Text(text) => text.as_bytes(),
			Self::Binary { data, .. } => data,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
	pub app_name: String,
	pub version: i64,
	/// BLAKE3 hex digest of the stored bytes.
	pub content_hash: String,
	pub original_filename: String,
	pub event_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
	pub filename: String,
	pub version: i64,
	/// MIME type recorded at save time. `data` may be `Text` for any `text/*` type.
	pub content_type: String,
	pub data: ArtifactData,
	pub metadata: ArtifactMetadata,
	pub created_at: OffsetDateTime,
}

impl LedgerService {
	/// Stores `data` as the next version of `filename` and returns that version.
	///
	/// The version count, the `artifact_created` event and the artifact row are written in one
	/// transaction holding the session row lock, so versions stay dense under concurrent saves.
	pub async fn save_artifact(
		&self,
		app_name: &str,
		user_id: &str,
		session_id: Uuid,
		filename: &str,
		data: &ArtifactData,
	) -> Result<i64> {
		let content = data.as_bytes();

		if content.len() > MAX_ARTIFACT_BYTES {
			tracing::warn!(
				session_id = %session_id,
				filename,
				size = content.len(),
				"Artifact rejected for size."
			);

			return Err(Error::SizeLimitExceeded {
				size: content.len(),
				limit: MAX_ARTIFACT_BYTES,
			});
		}

		let mut tx = self.db.pool.begin().await?;
		let owned = queries::lock_session_tx(&mut tx, session_id)
			.await?
			.is_some_and(|row| session::is_owned_by(&row, app_name, user_id));

		if !owned {
			return Err(Error::NotFound { message: format!("Session {session_id} not found.") });
		}

		let version =
			queries::count_artifact_versions_tx(&mut tx, session_id, app_name, filename).await?;
		let event = Event::artifact_saved(filename, version);
		let event_id = self.save_event_tx(&mut tx, session_id, &event).await?;
		let metadata = ArtifactMetadata {
			app_name: app_name.to_string(),
			version,
			content_hash: content_hash(content),
			original_filename: filename.to_string(),
			event_id: Some(event_id),
		};
		let metadata = serde_json::to_value(&metadata)?;
		let artifact = NewArtifact {
			id: Uuid::new_v4(),
			session_id,
			filename,
			content_type: data.content_type(),
			content,
			metadata: &metadata,
			event_id,
		};

		queries::insert_artifact_tx(&mut tx, &artifact).await?;

		tx.commit().await?;

		tracing::info!(
			session_id = %session_id,
			filename,
			version,
			size = content.len(),
			"Artifact saved."
		);

		Ok(version)
	}

	/// Loads `version`, or the newest version when `None`.
	pub async fn load_artifact(
		&self,
		app_name: &str,
		user_id: &str,
		session_id: Uuid,
		filename: &str,
		version: Option<i64>,
	) -> Result<Option<Artifact>> {
		if self.owned_session(app_name, user_id, session_id).await?.is_none() {
			return Ok(None);
		}

		let row = match version {
			Some(version) =>
				queries::fetch_artifact_version(&self.db, session_id, app_name, filename, version)
					.await?,
			None => queries::fetch_latest_artifact(&self.db, session_id, app_name, filename).await?,
		};
		let Some(row) = row else {
			tracing::debug!(session_id = %session_id, filename, ?version, "Artifact not found.");

			return Ok(None);
		};

		Ok(Some(decode_artifact(row, version)))
	}

	/// Distinct filenames with at least one version, sorted.
	pub async fn list_artifact_keys(
		&self,
		app_name: &str,
		user_id: &str,
		session_id: Uuid,
	) -> Result<Vec<String>> {
		if self.owned_session(app_name, user_id, session_id).await?.is_none() {
			return Ok(Vec::new());
		}

		Ok(queries::list_artifact_filenames(&self.db, session_id, app_name).await?)
	}

	pub async fn list_versions(
		&self,
		app_name: &str,
		user_id: &str,
		session_id: Uuid,
		filename: &str,
	) -> Result<Vec<i64>> {
		if self.owned_session(app_name, user_id, session_id).await?.is_none() {
			return Ok(Vec::new());
		}

		Ok(queries::list_artifact_versions(&self.db, session_id, app_name, filename).await?)
	}

	/// Deletes every version of `filename`. Returns how many rows went away.
	pub async fn delete_artifact(
		&self,
		app_name: &str,
		user_id: &str,
		session_id: Uuid,
		filename: &str,
	) -> Result<u64> {
		if self.owned_session(app_name, user_id, session_id).await?.is_none() {
			return Ok(0);
		}

		let deleted =
			queries::delete_artifact_versions(&self.db, session_id, app_name, filename).await?;

		tracing::info!(session_id = %session_id, filename, deleted, "Artifact deleted.");

		Ok(deleted)
	}
}

fn content_hash(content: &[u8]) -> String {
	blake3::hash(content).to_hex().to_string()
}

fn decode_artifact(row: ArtifactRow, requested_version: Option<i64>) -> Artifact {
	let metadata = match serde_json::from_value::<ArtifactMetadata>(row.metadata) {
		Ok(metadata) => metadata,
		Err(err) => {
			tracing::warn!(
				error = %err,
				artifact_id = %row.id,
				"Artifact metadata is unreadable; using empty metadata."
			);

			ArtifactMetadata::default()
		},
	};

	if !metadata.content_hash.is_empty() && metadata.content_hash != content_hash(&row.content) {
		tracing::warn!(
			artifact_id = %row.id,
			filename = row.filename.as_str(),
			"Artifact content hash mismatch."
		);
	}

	let data = decode_content(row.id, row.content, row.content_type.clone());

	Artifact {
		filename: row.filename,
		version: requested_version.unwrap_or(metadata.version),
		content_type: row.content_type,
		data,
		metadata,
		created_at: row.created_at,
	}
}

fn decode_content(artifact_id: Uuid, content: Vec<u8>, content_type: String) -> ArtifactData {
	if !content_type.starts_with("text/") {
		return ArtifactData::Binary { data: content, mime_type: content_type };
	}

	match String::from_utf8(content) {
		Ok(text) => ArtifactData::Text(text),
		Err(err) => {
			tracing::warn!(
				artifact_id = %artifact_id,
				content_type = content_type.as_str(),
				"Text artifact is not valid UTF-8; returning bytes."
			);

			ArtifactData::Binary { data: err.into_bytes(), mime_type: content_type }
		},
	}
}
