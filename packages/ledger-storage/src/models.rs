use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct SessionRow {
	pub id: Uuid,
	pub user_id: String,
	pub state: Value,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
pub struct EventRow {
	pub id: Uuid,
	pub session_id: Uuid,
	pub event_type: String,
	pub event_data: Value,
	pub timestamp: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ArtifactRow {
	pub id: Uuid,
	pub session_id: Uuid,
	pub filename: String,
	pub content_type: String,
	pub file_size: i64,
	pub content: Vec<u8>,
	pub metadata: Value,
	pub event_id: Option<Uuid>,
	pub created_at: OffsetDateTime,
}

#[derive(Debug)]
pub struct NewArtifact<'a> {
	pub id: Uuid,
	pub session_id: Uuid,
	pub filename: &'a str,
	pub content_type: &'a str,
	pub content: &'a [u8],
	pub metadata: &'a Value,
	pub event_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
pub struct MemoryRow {
	pub id: Uuid,
	pub session_id: Option<Uuid>,
	pub user_id: Option<String>,
	pub content: String,
	pub embedding: Option<Vec<f32>>,
	pub metadata: Value,
	pub created_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
pub struct MemorySearchRow {
	#[sqlx(flatten)]
	pub entry: MemoryRow,
	/// Cosine distance to the query vector. `None` for keyword matches.
	pub distance: Option<f64>,
}

/// A memory row about to be written. Exactly one of `session_id` and `user_id` must be set.
#[derive(Debug)]
pub struct NewMemory<'a> {
	pub id: Uuid,
	pub session_id: Option<Uuid>,
	pub user_id: Option<&'a str>,
	pub content: &'a str,
	/// pgvector text literal, e.g. `[0.1,0.2]`.
	pub embedding: Option<&'a str>,
	pub metadata: &'a Value,
}
