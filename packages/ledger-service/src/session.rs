use serde_json::{Map, Value};
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, LedgerService, Result, event::Event};
use ledger_storage::{
	models::{EventRow, SessionRow},
	queries,
};

/// Key injected into every stored state document to scope the session to an application.
pub const APP_NAME_KEY: &str = "app_name";
pub const DEFAULT_LIST_LIMIT: u32 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
	pub id: Uuid,
	pub app_name: String,
	pub user_id: String,
	/// Caller state without the reserved `app_name` key.
	pub state: Map<String, Value>,
	pub events: Vec<Event>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetSessionConfig {
	/// Load only this many of the newest events. `Some(0)` loads none; `None` loads all.
	pub num_recent_events: Option<u32>,
}

impl LedgerService {
	pub async fn create_session(
		&self,
		app_name: &str,
		user_id: &str,
		state: Option<Map<String, Value>>,
		session_id: Option<Uuid>,
	) -> Result<Session> {
		let id = session_id.unwrap_or_else(Uuid::new_v4);
		let stored = wrap_state(app_name, state.unwrap_or_default());
		let Some(row) = queries::upsert_session(&self.db, id, user_id, &stored).await? else {
			tracing::warn!(session_id = %id, user_id, "Session id is owned by another user.");

			return Err(Error::Conflict { message: format!("Session {id} already exists.") });
		};

		tracing::info!(session_id = %id, app_name, user_id, "Session created.");

		Ok(session_from_row(row, app_name.to_string(), Vec::new()))
	}

	/// Returns `None` when the session is absent or owned by a different app or user.
	pub async fn get_session(
		&self,
		app_name: &str,
		user_id: &str,
		session_id: Uuid,
		config: GetSessionConfig,
	) -> Result<Option<Session>> {
		let Some(row) = self.owned_session(app_name, user_id, session_id).await? else {
			return Ok(None);
		};
		let rows = match config.num_recent_events {
			Some(0) => Vec::new(),
			Some(limit) => {
				let mut rows =
					queries::list_recent_events(&self.db, session_id, i64::from(limit)).await?;

				rows.reverse();

				rows
			},
			None => queries::list_events(&self.db, session_id).await?,
		};
		let events = rows.into_iter().filter_map(decode_event).collect();

		Ok(Some(session_from_row(row, app_name.to_string(), events)))
	}

	/// Most recently updated first. Events are not loaded.
	pub async fn list_sessions(
		&self,
		app_name: &str,
		user_id: &str,
		limit: Option<u32>,
	) -> Result<Vec<Session>> {
		let limit = i64::from(limit.unwrap_or(DEFAULT_LIST_LIMIT));
		let rows = queries::list_sessions(&self.db, user_id, app_name, limit).await?;
		let sessions = rows
			.into_iter()
			.map(|row| session_from_row(row, app_name.to_string(), Vec::new()))
			.collect();

		Ok(sessions)
	}

	/// Deletes the session with its events and artifacts. Returns `false` when nothing owned by
	/// the caller matched.
	pub async fn delete_session(
		&self,
		app_name: &str,
		user_id: &str,
		session_id: Uuid,
	) -> Result<bool> {
		if self.owned_session(app_name, user_id, session_id).await?.is_none() {
			return Ok(false);
		}

		let deleted = queries::delete_session(&self.db, session_id).await? > 0;

		if deleted {
			tracing::info!(session_id = %session_id, app_name, user_id, "Session deleted.");
		}

		Ok(deleted)
	}

	/// Appends `event` to the session's log and returns its id, generated when absent.
	pub async fn save_event(&self, session_id: Uuid, event: &Event) -> Result<Uuid> {
		let (id, event_type, data) = encode_event(event)?;

		queries::insert_event(&self.db, id, session_id, event_type, &data).await?;

		Ok(id)
	}

	/// Replaces the whole state document and returns the new `updated_at`. Concurrent writers
	/// race; the last one wins.
	pub async fn update_session_state(
		&self,
		session_id: Uuid,
		state: &Map<String, Value>,
		app_name: &str,
		user_id: &str,
	) -> Result<OffsetDateTime> {
		let stored = wrap_state(app_name, state.clone());
		let Some(updated_at) =
			queries::update_session_state(&self.db, session_id, user_id, &stored).await?
		else {
			return Err(Error::NotFound { message: format!("Session {session_id} not found.") });
		};

		Ok(updated_at)
	}

	/// Saves `event`, folds its state delta into `session.state` and persists the merged state.
	pub async fn append_event(&self, session: &mut Session, mut event: Event) -> Result<Uuid> {
		let id = self.save_event(session.id, &event).await?;

		event.id = Some(id);

		if !event.actions.state_delta.is_empty() {
			merge_state_delta(&mut session.state, &event.actions.state_delta);

			session.updated_at = self
				.update_session_state(
					session.id,
					&session.state,
					&session.app_name,
					&session.user_id,
				)
				.await?;
		}

		session.events.push(event);

		Ok(id)
	}

	pub(crate) async fn save_event_tx(
		&self,
		tx: &mut Transaction<'_, Postgres>,
		session_id: Uuid,
		event: &Event,
	) -> Result<Uuid> {
		let (id, event_type, data) = encode_event(event)?;

		queries::insert_event_tx(tx, id, session_id, event_type, &data).await?;

		Ok(id)
	}

	pub(crate) async fn owned_session(
		&self,
		app_name: &str,
		user_id: &str,
		session_id: Uuid,
	) -> Result<Option<SessionRow>> {
		let Some(row) = queries::fetch_session(&self.db, session_id).await? else {
			tracing::debug!(session_id = %session_id, "Session not found.");

			return Ok(None);
		};

		if !is_owned_by(&row, app_name, user_id) {
			tracing::warn!(
				session_id = %session_id,
				app_name,
				user_id,
				"Session ownership mismatch."
			);

			return Ok(None);
		}

		Ok(Some(row))
	}
}

pub(crate) fn is_owned_by(row: &SessionRow, app_name: &str, user_id: &str) -> bool {
	row.user_id == user_id
		&& row.state.get(APP_NAME_KEY).and_then(Value::as_str) == Some(app_name)
}

fn wrap_state(app_name: &str, mut state: Map<String, Value>) -> Value {
	state.insert(APP_NAME_KEY.to_string(), Value::String(app_name.to_string()));

	Value::Object(state)
}

fn unwrap_state(stored: Value) -> Map<String, Value> {
	match stored {
		Value::Object(mut state) => {
			state.remove(APP_NAME_KEY);

			state
		},
		_ => Map::new(),
	}
}

fn merge_state_delta(state: &mut Map<String, Value>, delta: &Map<String, Value>) {
	for (key, value) in delta {
		state.insert(key.clone(), value.clone());
	}
}

fn session_from_row(row: SessionRow, app_name: String, events: Vec<Event>) -> Session {
	Session {
		id: row.id,
		app_name,
		user_id: row.user_id,
		state: unwrap_state(row.state),
		events,
		created_at: row.created_at,
		updated_at: row.updated_at,
	}
}

fn encode_event(event: &Event) -> Result<(Uuid, &'static str, Value)> {
	let id = event.id.unwrap_or_else(Uuid::new_v4);
	let event_type = event.event_type().as_str();
	let mut data = serde_json::to_value(event)?;

	if let Value::Object(fields) = &mut data {
		fields.insert("id".to_string(), Value::String(id.to_string()));
	}

	Ok((id, event_type, data))
}

fn decode_event(row: EventRow) -> Option<Event> {
	match serde_json::from_value::<Event>(row.event_data) {
		Ok(mut event) => {
			event.id.get_or_insert(row.id);

			Some(event)
		},
		Err(err) => {
			tracing::warn!(
				error = %err,
				event_id = %row.id,
				event_type = row.event_type.as_str(),
				"Skipping undecodable event."
			);

			None
		},
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn object(value: Value) -> Map<String, Value> {
		match value {
			Value::Object(map) => map,
			_ => Map::new(),
		}
	}

	#[test]
	fn app_name_is_injected_and_stripped() {
		let stored = wrap_state("demo", object(json!({ "user:name": "Ada", "app_name": "spoof" })));

		assert_eq!(stored, json!({ "user:name": "Ada", "app_name": "demo" }));
		assert_eq!(unwrap_state(stored), object(json!({ "user:name": "Ada" })));
		assert!(unwrap_state(json!(null)).is_empty());
	}

	#[test]
	fn delta_merge_overwrites_and_keeps_prefixes() {
		let mut state = object(json!({ "temp:step": 1, "app:theme": "dark" }));

		merge_state_delta(&mut state, &object(json!({ "temp:step": 2, "user:lang": "en" })));

		let expected = object(json!({ "temp:step": 2, "app:theme": "dark", "user:lang": "en" }));

		assert_eq!(state, expected);
	}

	#[test]
	fn encoded_event_carries_generated_id_and_tag() {
		let event = Event::message("user", "user", "hello");
		let (id, event_type, data) = encode_event(&event).expect("Failed to encode event.");

		assert_eq!(event_type, "content_message");
		assert_eq!(data["id"], json!(id.to_string()));

		let decoded = decode_event(EventRow {
			id,
			session_id: Uuid::new_v4(),
			event_type: event_type.to_string(),
			event_data: data,
			timestamp: OffsetDateTime::now_utc(),
		})
		.expect("Encoded event must decode.");

		assert_eq!(decoded.id, Some(id));
		assert_eq!(decoded.content, event.content);
	}

	#[test]
	fn broken_payload_is_skipped() {
		let row = EventRow {
			id: Uuid::new_v4(),
			session_id: Uuid::new_v4(),
			event_type: "generic_event".to_string(),
			event_data: json!({ "author": 7 }),
			timestamp: OffsetDateTime::now_utc(),
		};

		assert!(decode_event(row).is_none());
	}

	#[test]
	fn ownership_needs_matching_user_and_app() {
		let row = SessionRow {
			id: Uuid::new_v4(),
			user_id: "u1".to_string(),
			state: json!({ "app_name": "demo" }),
			created_at: OffsetDateTime::now_utc(),
			updated_at: OffsetDateTime::now_utc(),
		};

		assert!(is_owned_by(&row, "demo", "u1"));
		assert!(!is_owned_by(&row, "demo", "u2"));
		assert!(!is_owned_by(&row, "other", "u1"));
	}
}
