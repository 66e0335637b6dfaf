use serde_json::Value;
use sqlx::{Executor, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Error, Result,
	db::Db,
	models::{ArtifactRow, EventRow, MemoryRow, MemorySearchRow, NewArtifact, NewMemory, SessionRow},
};

const SESSION_COLUMNS: &str = "id, user_id, state, created_at, updated_at";
const EVENT_COLUMNS: &str = "id, session_id, event_type, event_data, timestamp";
const ARTIFACT_COLUMNS: &str =
	"id, session_id, filename, content_type, file_size, content, metadata, event_id, created_at";
const MEMORY_COLUMNS: &str = "m.id, m.session_id, m.user_id, m.content, m.embedding::real[] AS embedding, m.metadata, m.created_at";

/// Inserts a session, or replaces the state of an existing one owned by the same user.
///
/// Returns `None` when `id` already belongs to a different user.
pub async fn upsert_session(
	db: &Db,
	id: Uuid,
	user_id: &str,
	state: &Value,
) -> Result<Option<SessionRow>> {
	let sql = format!(
		"\
INSERT INTO sessions (id, user_id, state)
VALUES ($1, $2, $3)
ON CONFLICT (id) DO UPDATE
SET
	state = EXCLUDED.state,
	updated_at = now()
WHERE sessions.user_id = EXCLUDED.user_id
RETURNING {SESSION_COLUMNS}"
	);
	let row = sqlx::query_as::<_, SessionRow>(&sql)
		.bind(id)
		.bind(user_id)
		.bind(state)
		.fetch_optional(&db.pool)
		.await?;

	Ok(row)
}

pub async fn fetch_session(db: &Db, id: Uuid) -> Result<Option<SessionRow>> {
	let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
	let row = sqlx::query_as::<_, SessionRow>(&sql).bind(id).fetch_optional(&db.pool).await?;

	Ok(row)
}

pub async fn list_sessions(
	db: &Db,
	user_id: &str,
	app_name: &str,
	limit: i64,
) -> Result<Vec<SessionRow>> {
	let sql = format!(
		"\
SELECT {SESSION_COLUMNS}
FROM sessions
WHERE user_id = $1 AND state ->> 'app_name' = $2
ORDER BY updated_at DESC
LIMIT $3"
	);
	let rows = sqlx::query_as::<_, SessionRow>(&sql)
		.bind(user_id)
		.bind(app_name)
		.bind(limit)
		.fetch_all(&db.pool)
		.await?;

	Ok(rows)
}

/// Returns the new `updated_at`, or `None` when no session with this id belongs to `user_id`.
pub async fn update_session_state(
	db: &Db,
	id: Uuid,
	user_id: &str,
	state: &Value,
) -> Result<Option<OffsetDateTime>> {
	let updated_at = sqlx::query_scalar(
		"\
UPDATE sessions
SET state = $1, updated_at = now()
WHERE id = $2 AND user_id = $3
RETURNING updated_at",
	)
	.bind(state)
	.bind(id)
	.bind(user_id)
	.fetch_optional(&db.pool)
	.await?;

	Ok(updated_at)
}

pub async fn delete_session(db: &Db, id: Uuid) -> Result<u64> {
	let result = sqlx::query("DELETE FROM sessions WHERE id = $1").bind(id).execute(&db.pool).await?;

	Ok(result.rows_affected())
}

/// Locks the session row for the rest of the transaction.
pub async fn lock_session_tx(
	tx: &mut Transaction<'_, Postgres>,
	id: Uuid,
) -> Result<Option<SessionRow>> {
	let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1 FOR UPDATE");
	let row = sqlx::query_as::<_, SessionRow>(&sql).bind(id).fetch_optional(&mut **tx).await?;

	Ok(row)
}

pub async fn insert_event(
	db: &Db,
	id: Uuid,
	session_id: Uuid,
	event_type: &str,
	event_data: &Value,
) -> Result<()> {
	insert_event_exec(&db.pool, id, session_id, event_type, event_data).await
}

pub async fn insert_event_tx(
	tx: &mut Transaction<'_, Postgres>,
	id: Uuid,
	session_id: Uuid,
	event_type: &str,
	event_data: &Value,
) -> Result<()> {
	insert_event_exec(&mut **tx, id, session_id, event_type, event_data).await
}

pub async fn list_events(db: &Db, session_id: Uuid) -> Result<Vec<EventRow>> {
	let sql = format!(
		"SELECT {EVENT_COLUMNS} FROM events WHERE session_id = $1 ORDER BY timestamp ASC, seq ASC"
	);
	let rows = sqlx::query_as::<_, EventRow>(&sql).bind(session_id).fetch_all(&db.pool).await?;

	Ok(rows)
}

/// The `limit` newest events, newest first.
pub async fn list_recent_events(db: &Db, session_id: Uuid, limit: i64) -> Result<Vec<EventRow>> {
	let sql = format!(
		"\
SELECT {EVENT_COLUMNS}
FROM events
WHERE session_id = $1
ORDER BY timestamp DESC, seq DESC
LIMIT $2"
	);
	let rows = sqlx::query_as::<_, EventRow>(&sql)
		.bind(session_id)
		.bind(limit)
		.fetch_all(&db.pool)
		.await?;

	Ok(rows)
}

pub async fn count_artifact_versions_tx(
	tx: &mut Transaction<'_, Postgres>,
	session_id: Uuid,
	app_name: &str,
	filename: &str,
) -> Result<i64> {
	let count: i64 = sqlx::query_scalar(
		"\
SELECT count(*)
FROM artifacts
WHERE session_id = $1 AND metadata ->> 'app_name' = $2 AND filename = $3",
	)
	.bind(session_id)
	.bind(app_name)
	.bind(filename)
	.fetch_one(&mut **tx)
	.await?;

	Ok(count)
}

pub async fn insert_artifact_tx(
	tx: &mut Transaction<'_, Postgres>,
	artifact: &NewArtifact<'_>,
) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO artifacts (
	id,
	session_id,
	filename,
	content_type,
	file_size,
	content,
	metadata,
	event_id
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
	)
	.bind(artifact.id)
	.bind(artifact.session_id)
	.bind(artifact.filename)
	.bind(artifact.content_type)
	.bind(artifact.content.len() as i64)
	.bind(artifact.content)
	.bind(artifact.metadata)
	.bind(artifact.event_id)
	.execute(&mut **tx)
	.await?;

	Ok(())
}

pub async fn fetch_artifact_version(
	db: &Db,
	session_id: Uuid,
	app_name: &str,
	filename: &str,
	version: i64,
) -> Result<Option<ArtifactRow>> {
	let sql = format!(
		"\
SELECT {ARTIFACT_COLUMNS}
FROM artifacts
WHERE session_id = $1
	AND metadata ->> 'app_name' = $2
	AND filename = $3
	AND (metadata ->> 'version')::bigint = $4
ORDER BY created_at DESC
LIMIT 1"
	);
	let row = sqlx::query_as::<_, ArtifactRow>(&sql)
		.bind(session_id)
		.bind(app_name)
		.bind(filename)
		.bind(version)
		.fetch_optional(&db.pool)
		.await?;

	Ok(row)
}

pub async fn fetch_latest_artifact(
	db: &Db,
	session_id: Uuid,
	app_name: &str,
	filename: &str,
) -> Result<Option<ArtifactRow>> {
	let sql = format!(
		"\
SELECT {ARTIFACT_COLUMNS}
FROM artifacts
WHERE session_id = $1 AND metadata ->> 'app_name' = $2 AND filename = $3
ORDER BY (metadata ->> 'version')::bigint DESC NULLS LAST, created_at DESC
LIMIT 1"
	);
	let row = sqlx::query_as::<_, ArtifactRow>(&sql)
		.bind(session_id)
		.bind(app_name)
		.bind(filename)
		.fetch_optional(&db.pool)
		.await?;

	Ok(row)
}

pub async fn list_artifact_filenames(
	db: &Db,
	session_id: Uuid,
	app_name: &str,
) -> Result<Vec<String>> {
	let filenames: Vec<String> = sqlx::query_scalar(
		"\
SELECT DISTINCT filename
FROM artifacts
WHERE session_id = $1 AND metadata ->> 'app_name' = $2
ORDER BY filename",
	)
	.bind(session_id)
	.bind(app_name)
	.fetch_all(&db.pool)
	.await?;

	Ok(filenames)
}

/// Stored version numbers, ascending. Rows whose metadata lacks a version are skipped.
pub async fn list_artifact_versions(
	db: &Db,
	session_id: Uuid,
	app_name: &str,
	filename: &str,
) -> Result<Vec<i64>> {
	let versions: Vec<Option<i64>> = sqlx::query_scalar(
		"\
SELECT (metadata ->> 'version')::bigint
FROM artifacts
WHERE session_id = $1 AND metadata ->> 'app_name' = $2 AND filename = $3
ORDER BY 1 ASC",
	)
	.bind(session_id)
	.bind(app_name)
	.bind(filename)
	.fetch_all(&db.pool)
	.await?;

	Ok(versions.into_iter().flatten().collect())
}

pub async fn delete_artifact_versions(
	db: &Db,
	session_id: Uuid,
	app_name: &str,
	filename: &str,
) -> Result<u64> {
	let result = sqlx::query(
		"\
DELETE FROM artifacts
WHERE session_id = $1 AND metadata ->> 'app_name' = $2 AND filename = $3",
	)
	.bind(session_id)
	.bind(app_name)
	.bind(filename)
	.execute(&db.pool)
	.await?;

	Ok(result.rows_affected())
}

/// Writes one memory row. Rejects rows that are scoped to both a session and a user, or to
/// neither, before reaching the database.
pub async fn insert_memory(db: &Db, memory: &NewMemory<'_>) -> Result<()> {
	validate_memory_scope(memory)?;

	sqlx::query(
		"\
INSERT INTO memory (id, session_id, user_id, content, embedding, metadata)
VALUES ($1, $2, $3, $4, $5::text::vector, $6)",
	)
	.bind(memory.id)
	.bind(memory.session_id)
	.bind(memory.user_id)
	.bind(memory.content)
	.bind(memory.embedding)
	.bind(memory.metadata)
	.execute(&db.pool)
	.await?;

	Ok(())
}

/// Nearest entries to `vec` by cosine distance among memory visible to `user_id`: rows scoped
/// to the user plus rows scoped to any of the user's sessions.
pub async fn search_memory_by_embedding(
	db: &Db,
	user_id: &str,
	app_name: &str,
	vec: &str,
	limit: i64,
) -> Result<Vec<MemorySearchRow>> {
	let sql = format!(
		"\
SELECT {MEMORY_COLUMNS}, (m.embedding <=> $3::text::vector)::float8 AS distance
FROM memory m
LEFT JOIN sessions s ON s.id = m.session_id
WHERE m.embedding IS NOT NULL
	AND (m.user_id = $1 OR s.user_id = $1)
	AND m.metadata ->> 'app_name' = $2
ORDER BY m.embedding <=> $3::text::vector ASC, m.created_at DESC
LIMIT $4"
	);
	let rows = sqlx::query_as::<_, MemorySearchRow>(&sql)
		.bind(user_id)
		.bind(app_name)
		.bind(vec)
		.bind(limit)
		.fetch_all(&db.pool)
		.await?;

	Ok(rows)
}

/// Case-insensitive substring match on `content`, newest first. `pattern` is an `ILIKE`
/// pattern whose wildcards were already escaped with `\`.
pub async fn search_memory_by_text(
	db: &Db,
	user_id: &str,
	app_name: &str,
	pattern: &str,
	limit: i64,
) -> Result<Vec<MemorySearchRow>> {
	let sql = format!(
		"\
SELECT {MEMORY_COLUMNS}, NULL::float8 AS distance
FROM memory m
LEFT JOIN sessions s ON s.id = m.session_id
WHERE m.content ILIKE $3 ESCAPE '\\'
	AND (m.user_id = $1 OR s.user_id = $1)
	AND m.metadata ->> 'app_name' = $2
ORDER BY m.created_at DESC
LIMIT $4"
	);
	let rows = sqlx::query_as::<_, MemorySearchRow>(&sql)
		.bind(user_id)
		.bind(app_name)
		.bind(pattern)
		.bind(limit)
		.fetch_all(&db.pool)
		.await?;

	Ok(rows)
}

pub async fn list_session_memory(db: &Db, session_id: Uuid) -> Result<Vec<MemoryRow>> {
	let sql = format!(
		"SELECT {MEMORY_COLUMNS} FROM memory m WHERE m.session_id = $1 ORDER BY m.created_at DESC"
	);
	let rows = sqlx::query_as::<_, MemoryRow>(&sql).bind(session_id).fetch_all(&db.pool).await?;

	Ok(rows)
}

pub async fn list_user_memory(db: &Db, user_id: &str, limit: i64) -> Result<Vec<MemoryRow>> {
	let sql = format!(
		"\
SELECT {MEMORY_COLUMNS}
FROM memory m
WHERE m.user_id = $1
ORDER BY m.created_at DESC
LIMIT $2"
	);
	let rows = sqlx::query_as::<_, MemoryRow>(&sql)
		.bind(user_id)
		.bind(limit)
		.fetch_all(&db.pool)
		.await?;

	Ok(rows)
}

async fn insert_event_exec<'e, E>(
	executor: E,
	id: Uuid,
	session_id: Uuid,
	event_type: &str,
	event_data: &Value,
) -> Result<()>
where
	E: Executor<'e, Database = Postgres>,
{
	sqlx::query(
		"\
INSERT INTO events (id, session_id, event_type, event_data)
VALUES ($1, $2, $3, $4)",
	)
	.bind(id)
	.bind(session_id)
	.bind(event_type)
	.bind(event_data)
	.execute(executor)
	.await?;

	Ok(())
}

fn validate_memory_scope(memory: &NewMemory<'_>) -> Result<()> {
	match (memory.session_id, memory.user_id) {
		(Some(_), None) | (None, Some(_)) => Ok(()),
		(Some(_), Some(_)) => Err(Error::Constraint(
			"Memory entries are scoped to a session or a user, not both.".to_string(),
		)),
		(None, None) => Err(Error::Constraint(
			"Memory entries must be scoped to a session or a user.".to_string(),
		)),
	}
}
