use serde_json::{Map, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::{
	Error, LedgerService, Result,
	event::{Event, Part},
	session::Session,
};
use ledger_storage::{
	models::{self, MemoryRow, MemorySearchRow},
	queries,
};

/// Maximum hits returned by one search, vector or keyword.
pub const SEARCH_LIMIT: i64 = 10;
pub const DEFAULT_LIST_LIMIT: u32 = 100;

const STATE_SUMMARY_PARTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryScope {
	Session(Uuid),
	User(String),
}

#[derive(Debug, Clone)]
pub struct NewMemory {
	pub app_name: String,
	pub scope: MemoryScope,
	pub content: String,
	/// Extra fields. `app_name` is always overwritten with the value above.
	pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry {
	pub id: Uuid,
	pub scope: MemoryScope,
	pub content: String,
	pub metadata: Value,
	pub has_embedding: bool,
	/// Cosine distance for vector hits, `None` for keyword hits and listings.
	pub distance: Option<f64>,
	pub created_at: OffsetDateTime,
}

impl LedgerService {
	/// Indexes a session as one session-scoped memory entry. Returns `None` for a session with
	/// no state and no events.
	pub async fn add_session_to_memory(&self, session: &Session) -> Result<Option<Uuid>> {
		let Some(content) = summarize_session(session) else {
			tracing::debug!(session_id = %session.id, "Nothing to index for session.");

			return Ok(None);
		};
		let indexed_at = OffsetDateTime::now_utc()
			.format(&Rfc3339)
			.map_err(|err| Error::Serialization { message: err.to_string() })?;
		let metadata = serde_json::json!({
			"app_name": session.app_name,
			"session_id": session.id,
			"user_id": session.user_id,
			"event_count": session.events.len(),
			"indexed_at": indexed_at,
		});
		let id = self.insert_memory(&MemoryScope::Session(session.id), &content, &metadata).await?;

		tracing::info!(
			memory_id = %id,
			session_id = %session.id,
			event_count = session.events.len(),
			"Session indexed into memory."
		);

		Ok(Some(id))
	}

	pub async fn add_memory(&self, memory: NewMemory) -> Result<Uuid> {
		if memory.content.trim().is_empty() {
			return Err(Error::InvalidRequest {
				message: "Memory content must not be empty.".to_string(),
			});
		}

		let mut metadata = memory.metadata;

		metadata.insert("app_name".to_string(), Value::String(memory.app_name));

		self.insert_memory(&memory.scope, &memory.content, &Value::Object(metadata)).await
	}

	/// Vector search when an embedding provider is configured, keyword search otherwise or when
	/// the vector search finds nothing. Both see the user's own entries plus entries of the
	/// user's sessions, limited to `app_name`.
	pub async fn search_memory(
		&self,
		app_name: &str,
		user_id: &str,
		query: &str,
	) -> Result<Vec<MemoryEntry>> {
		let query = query.trim();

		if query.is_empty() {
			return Ok(Vec::new());
		}

		if let Some(vec) = self.embed_text(query).await {
			let rows = queries::search_memory_by_embedding(
				&self.db,
				user_id,
				app_name,
				&crate::vector_to_pg(&vec),
				SEARCH_LIMIT,
			)
			.await?;

			if !rows.is_empty() {
				return Ok(rows.into_iter().map(entry_from_search_row).collect());
			}

			tracing::debug!(app_name, user_id, "No vector hits; falling back to keyword search.");
		}

		let pattern = format!("%{}%", escape_like(query));
		let rows =
			queries::search_memory_by_text(&self.db, user_id, app_name, &pattern, SEARCH_LIMIT)
				.await?;

		Ok(rows.into_iter().map(entry_from_search_row).collect())
	}

	/// Newest first.
	pub async fn list_session_memory(&self, session_id: Uuid) -> Result<Vec<MemoryEntry>> {
		let rows = queries::list_session_memory(&self.db, session_id).await?;

		Ok(rows.into_iter().map(|row| entry_from_row(row, None)).collect())
	}

	/// Newest first, user-scoped entries only.
	pub async fn list_user_memory(
		&self,
		user_id: &str,
		limit: Option<u32>,
	) -> Result<Vec<MemoryEntry>> {
		let limit = i64::from(limit.unwrap_or(DEFAULT_LIST_LIMIT));
		let rows = queries::list_user_memory(&self.db, user_id, limit).await?;

		Ok(rows.into_iter().map(|row| entry_from_row(row, None)).collect())
	}

	async fn insert_memory(
		&self,
		scope: &MemoryScope,
		content: &str,
		metadata: &Value,
	) -> Result<Uuid> {
		let embedding = self.embed_text(content).await.map(|vec| crate::vector_to_pg(&vec));
		let (session_id, user_id) = match scope {
			MemoryScope::Session(session_id) => (Some(*session_id), None),
			MemoryScope::User(user_id) => (None, Some(user_id.as_str())),
		};
		let row = models::NewMemory {
			id: Uuid::new_v4(),
			session_id,
			user_id,
			content,
			embedding: embedding.as_deref(),
			metadata,
		};

		queries::insert_memory(&self.db, &row).await?;

		Ok(row.id)
	}

	/// Embeds one text. Any provider failure or a vector of the wrong width yields `None`.
	async fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
		let cfg = self.cfg.providers.embedding.as_ref()?;
		let texts = [text.to_string()];
		let vectors = match self.providers.embedding.embed(cfg, &texts).await {
			Ok(vectors) => vectors,
			Err(err) => {
				tracing::warn!(
					error = %err,
					provider_id = cfg.provider_id.as_str(),
					"Embedding failed; continuing without a vector."
				);

				return None;
			},
		};
		let Some(vec) = vectors.into_iter().next() else {
			tracing::warn!(provider_id = cfg.provider_id.as_str(), "Embedding response was empty.");

			return None;
		};
		let expected = self.cfg.memory.vector_dim as usize;

		if vec.len() != expected {
			tracing::warn!(
				provider_id = cfg.provider_id.as_str(),
				expected,
				actual = vec.len(),
				"Embedding dimension mismatch."
			);

			return None;
		}

		Some(vec)
	}
}

/// State summary line followed by per-event lines, or `None` when there is nothing to index.
fn summarize_session(session: &Session) -> Option<String> {
	let mut lines = Vec::new();

	if let Some(summary) = summarize_state(&session.state) {
		lines.push(summary);
	}

	for event in &session.events {
		lines.extend(event_lines(event));
	}

	if lines.is_empty() { None } else { Some(lines.join("\n")) }
}

fn summarize_state(state: &Map<String, Value>) -> Option<String> {
	if state.is_empty() {
		return None;
	}

	let parts = state
		.iter()
		.take(STATE_SUMMARY_PARTS)
		.map(|(key, value)| match value {
			Value::String(text) => format!("{key}: {text}"),
			other => format!("{key}: {other}"),
		})
		.collect::<Vec<_>>();

	Some(parts.join("; "))
}

fn event_lines(event: &Event) -> Vec<String> {
	let mut lines = vec![format!("Event: {}", event.event_type().as_str())];
	let mut tools: Vec<&str> = Vec::new();

	if let Some(content) = &event.content {
		let label = if content.role == "user" { "Input" } else { "Output" };

		for part in &content.parts {
			match part {
				Part::Text { text } if !text.trim().is_empty() => {
					lines.push(format!("{label}: {text}"));
				},
				Part::FunctionCall { name, .. } | Part::FunctionResponse { name, .. } =>
					if !tools.contains(&name.as_str()) {
						tools.push(name.as_str());
					},
				_ => {},
			}
		}
	}

	if !tools.is_empty() {
		lines.push(format!("Tools: {}", tools.join(", ")));
	}

	lines
}

/// Escapes `ILIKE` wildcards so the query matches literally. Pairs with `ESCAPE '\'`.
fn escape_like(query: &str) -> String {
	let mut out = String::with_capacity(query.len());

	for ch in query.chars() {
		if matches!(ch, '\\' | '%' | '_') {
			out.push('\\');
		}

		out.push(ch);
	}

	out
}

fn entry_from_search_row(row: MemorySearchRow) -> MemoryEntry {
	entry_from_row(row.entry, row.distance)
}

fn entry_from_row(row: MemoryRow, distance: Option<f64>) -> MemoryEntry {
	let scope = match (row.session_id, row.user_id) {
		(Some(session_id), _) => MemoryScope::Session(session_id),
		(None, user_id) => MemoryScope::User(user_id.unwrap_or_default()),
	};

	MemoryEntry {
		id: row.id,
		scope,
		content: row.content,
		metadata: row.metadata,
		has_embedding: row.embedding.is_some(),
		distance,
		created_at: row.created_at,
	}
}
