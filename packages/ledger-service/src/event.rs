//! The event payload stored in `events.event_data` and the tag stored in `events.event_type`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

/// Author recorded on events the store emits by itself.
pub const SYSTEM_AUTHOR: &str = "system";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<Uuid>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub invocation_id: Option<String>,
	pub author: String,
	#[serde(with = "rfc3339")]
	pub timestamp: OffsetDateTime,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content: Option<Content>,
	#[serde(default)]
	pub actions: EventActions,
}
impl Event {
	pub fn new(author: impl Into<String>) -> Self {
		Self {
			id: None,
			invocation_id: None,
			author: author.into(),
			timestamp: OffsetDateTime::now_utc(),
			content: None,
			actions: EventActions::default(),
		}
	}

	/// A text message from `author` in `role` (`user` or `model`).
	pub fn message(
		author: impl Into<String>,
		role: impl Into<String>,
		text: impl Into<String>,
	) -> Self {
		let parts = vec![Part::Text { text: text.into() }];

		Self { content: Some(Content { role: role.into(), parts }), ..Self::new(author) }
	}

	/// The event recorded next to every artifact write.
	pub fn artifact_saved(filename: &str, version: i64) -> Self {
		let mut event = Self::new(SYSTEM_AUTHOR);

		event.actions.artifact_delta.insert(filename.to_string(), version);

		event
	}

	pub fn with_state_delta(mut self, state_delta: Map<String, Value>) -> Self {
		self.actions.state_delta = state_delta;

		self
	}

	/// First matching rule wins. Only text and inline data count as message content, so
	/// events whose parts are all tool calls or tool results keep their own tags.
	pub fn event_type(&self) -> EventType {
		let actions = &self.actions;

		if !actions.artifact_delta.is_empty() {
			return EventType::ArtifactCreated;
		}
		if !actions.state_delta.is_empty() {
			return EventType::StateUpdated;
		}
		if actions.transfer_to_agent.is_some() {
			return EventType::AgentTransfer;
		}
		if actions.escalate {
			return EventType::Escalation;
		}

		let parts = self.content.as_ref().map(|content| content.parts.as_slice()).unwrap_or_default();

		if parts.iter().any(|part| matches!(part, Part::Text { .. } | Part::InlineData { .. })) {
			return EventType::ContentMessage;
		}
		if parts.iter().any(|part| matches!(part, Part::FunctionCall { .. })) {
			return EventType::FunctionCall;
		}
		if parts.iter().any(|part| matches!(part, Part::FunctionResponse { .. })) {
			return EventType::FunctionResponse;
		}

		EventType::GenericEvent
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
	pub role: String,
	#[serde(default)]
	pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
	Text {
		text: String,
	},
	InlineData {
		mime_type: String,
		data: Vec<u8>,
	},
	FunctionCall {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		id: Option<String>,
		name: String,
		#[serde(default)]
		args: Value,
	},
	FunctionResponse {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		id: Option<String>,
		name: String,
		#[serde(default)]
		response: Value,
	},
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventActions {
	/// Keys are stored verbatim, including any `user:`, `app:` or `temp:` prefix.
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	pub state_delta: Map<String, Value>,
	/// Filename to the version written by this event.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub artifact_delta: BTreeMap<String, i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub transfer_to_agent: Option<String>,
	#[serde(default)]
	pub escalate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
	ArtifactCreated,
	StateUpdated,
	AgentTransfer,
	Escalation,
	ContentMessage,
	FunctionCall,
	FunctionResponse,
	GenericEvent,
}
impl EventType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::ArtifactCreated => "artifact_created",
			Self::StateUpdated => "state_updated",
			Self::AgentTransfer => "agent_transfer",
			Self::Escalation => "escalation",
			Self::ContentMessage => "content_message",
			Self::FunctionCall => "function_call",
			Self::FunctionResponse => "function_response",
			Self::GenericEvent => "generic_event",
		}
	}
}

mod rfc3339 {
	use serde::{Deserialize, Deserializer, Serializer};
	use time::{OffsetDateTime, format_description::well_known::Rfc3339};

	pub fn serialize<S>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let formatted = value.format(&Rfc3339).map_err(serde::ser::Error::custom)?;

		serializer.serialize_str(&formatted)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;

		OffsetDateTime::parse(&raw, &Rfc3339).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn with_parts(parts: Vec<Part>) -> Event {
		Event { content: Some(Content { role: "model".to_string(), parts }), ..Event::new("agent") }
	}

	fn call(name: &str) -> Part {
		Part::FunctionCall { id: None, name: name.to_string(), args: json!({}) }
	}

	fn response(name: &str) -> Part {
		Part::FunctionResponse { id: None, name: name.to_string(), response: json!({}) }
	}

	#[test]
	fn artifact_delta_outranks_everything() {
		let mut event = Event::artifact_saved("notes.txt", 0);

		event.actions.state_delta.insert("k".to_string(), json!(1));
		event.actions.escalate = true;
		event.content = Some(Content {
			role: "model".to_string(),
			parts: vec![Part::Text { text: "hi".to_string() }],
		});

		assert_eq!(event.event_type(), EventType::ArtifactCreated);
	}

	#[test]
	fn actions_are_checked_in_order() {
		let mut event = Event::new("agent");

		event.actions.escalate = true;
		event.actions.transfer_to_agent = Some("billing".to_string());

		assert_eq!(event.event_type(), EventType::AgentTransfer);

		event.actions.state_delta.insert("user:name".to_string(), json!("Ada"));

		assert_eq!(event.event_type(), EventType::StateUpdated);

		event.actions = EventActions { escalate: true, ..EventActions::default() };

		assert_eq!(event.event_type(), EventType::Escalation);
	}

	#[test]
	fn tool_parts_keep_their_own_tags() {
		assert_eq!(with_parts(vec![call("lookup")]).event_type(), EventType::FunctionCall);
		assert_eq!(with_parts(vec![response("lookup")]).event_type(), EventType::FunctionResponse);
		assert_eq!(
			with_parts(vec![response("lookup"), call("lookup")]).event_type(),
			EventType::FunctionCall
		);
	}

	#[test]
	fn text_makes_a_content_message() {
		let event = with_parts(vec![call("lookup"), Part::Text { text: "done".to_string() }]);

		assert_eq!(event.event_type(), EventType::ContentMessage);
		assert_eq!(Event::message("user", "user", "hello").event_type(), EventType::ContentMessage);
	}

	#[test]
	fn empty_event_is_generic() {
		assert_eq!(Event::new("agent").event_type(), EventType::GenericEvent);
		assert_eq!(with_parts(Vec::new()).event_type(), EventType::GenericEvent);
		assert_eq!(EventType::GenericEvent.as_str(), "generic_event");
	}

	#[test]
	fn payload_decodes_with_missing_optional_fields() {
		let raw = json!({
			"author": "user",
			"timestamp": "2026-01-02T03:04:05Z",
			"content": { "role": "user", "parts": [{ "type": "text", "text": "hi" }] }
		});
		let event: Event = serde_json::from_value(raw).expect("Failed to decode event.");

		assert_eq!(event.id, None);
		assert_eq!(event.actions, EventActions::default());
		assert_eq!(event.event_type(), EventType::ContentMessage);
	}
}
