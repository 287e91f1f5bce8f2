//! The dispatch envelope: one wire message, both directions.
//!
//! On the wire every envelope is a flat JSON object carrying *all* payload
//! sections (`event`, `ping`, `render`, `class`, `redirect`, `custom`,
//! `error`) next to a `function` tag that says which one is meaningful.
//! In memory the envelope holds exactly one [`Payload`] variant; the other
//! sections are filled with defaults on encode and discarded on decode.
//!
//! ```json
//! {
//!   "id": "…", "key": "fncmp-…", "conn_id": "tab-1", "handler_id": "…",
//!   "action": "", "label": "", "function": "render",
//!   "event": {…}, "ping": {…}, "render": {…}, "class": {…},
//!   "redirect": {…}, "custom": {…}, "error": {…}
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EnvelopeError;
use crate::ids::{ConnId, HandlerId};

// ─────────────────────────────────────────────────────────────────────────────
// Function tag
// ─────────────────────────────────────────────────────────────────────────────

/// Selects which payload section of an envelope is meaningful.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionTag {
    /// Keepalive, either direction.
    Ping,
    /// Insert, replace or remove markup.
    Render,
    /// Add or remove CSS classes.
    Class,
    /// Navigate the client.
    Redirect,
    /// A DOM event raised by a registered listener.
    Event,
    /// Invoke (or report the result of) a named client function.
    Custom,
    /// An error report.
    Error,
}

impl FunctionTag {
    /// Wire spelling of the tag.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Render => "render",
            Self::Class => "class",
            Self::Redirect => "redirect",
            Self::Event => "event",
            Self::Custom => "custom",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for FunctionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunctionTag {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ping" => Ok(Self::Ping),
            "render" => Ok(Self::Render),
            "class" => Ok(Self::Class),
            "redirect" => Ok(Self::Redirect),
            "event" => Ok(Self::Event),
            "custom" => Ok(Self::Custom),
            "error" => Ok(Self::Error),
            other => Err(EnvelopeError::UnknownFunction(other.to_owned())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload sections
// ─────────────────────────────────────────────────────────────────────────────

/// Keepalive flags. `server` marks a server-originated ping, `client` a
/// client acknowledgment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingPayload {
    /// Sent by the server.
    pub server: bool,
    /// Sent (or acknowledged) by the client.
    pub client: bool,
}

/// A DOM event binding, and the event it raised.
///
/// Inside a render payload this describes a listener the client must attach;
/// inside an event envelope `data` carries the serialized DOM event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventPayload {
    /// Listener identity.
    pub id: String,
    /// Element the listener is bound to.
    pub target_id: String,
    /// DOM event kind (`click`, `input`, …).
    pub on: String,
    /// Client-side event data.
    pub data: Value,
}

/// Markup placement instructions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderPayload {
    /// Target element ID (empty when targeting by tag).
    pub target_id: String,
    /// Target tag name (empty when targeting by ID).
    pub tag: String,
    /// Replace the target's children.
    pub inner: bool,
    /// Replace the target itself.
    pub outer: bool,
    /// Append to the target.
    pub append: bool,
    /// Prepend to the target.
    pub prepend: bool,
    /// Remove the target.
    pub remove: bool,
    /// Rendered markup.
    pub html: String,
    /// Listeners the client attaches after placing the markup.
    pub event_listeners: Vec<EventPayload>,
}

/// CSS class mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassPayload {
    /// Element to mutate.
    pub target_id: String,
    /// Remove instead of add.
    pub remove: bool,
    /// Class names.
    pub names: Vec<String>,
}

/// Client navigation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectPayload {
    /// Destination URL.
    pub url: String,
}

/// Named client function call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomPayload {
    /// Function name on the client.
    pub function: String,
    /// Argument passed to the function.
    pub data: Value,
    /// Value returned by the client, when reported back.
    pub result: Value,
}

/// Error report.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPayload {
    /// Human-readable message.
    pub message: String,
}

/// The one meaningful payload of an envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// See [`PingPayload`].
    Ping(PingPayload),
    /// See [`RenderPayload`].
    Render(RenderPayload),
    /// See [`ClassPayload`].
    Class(ClassPayload),
    /// See [`RedirectPayload`].
    Redirect(RedirectPayload),
    /// See [`EventPayload`].
    Event(EventPayload),
    /// See [`CustomPayload`].
    Custom(CustomPayload),
    /// See [`ErrorPayload`].
    Error(ErrorPayload),
}

impl Payload {
    /// The function tag this payload is sent under.
    pub fn tag(&self) -> FunctionTag {
        match self {
            Self::Ping(_) => FunctionTag::Ping,
            Self::Render(_) => FunctionTag::Render,
            Self::Class(_) => FunctionTag::Class,
            Self::Redirect(_) => FunctionTag::Redirect,
            Self::Event(_) => FunctionTag::Event,
            Self::Custom(_) => FunctionTag::Custom,
            Self::Error(_) => FunctionTag::Error,
        }
    }

    /// Build an error payload.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// One wire message unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireDispatch", try_from = "WireDispatch")]
pub struct Dispatch {
    /// Envelope identity.
    pub id: String,
    /// Correlation key (the component's element ID for renders).
    pub key: String,
    /// Owning connection.
    pub conn_id: ConnId,
    /// Owning handler.
    pub handler_id: HandlerId,
    /// Free-form action name.
    pub action: String,
    /// Debug label.
    pub label: String,
    /// The selected payload.
    pub payload: Payload,
}

impl Dispatch {
    /// Create an envelope with a fresh ID and no routing information.
    pub fn new(key: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            key: key.into(),
            conn_id: ConnId::from(""),
            handler_id: HandlerId::from(""),
            action: String::new(),
            label: String::new(),
            payload,
        }
    }

    /// A server-originated keepalive for the given route.
    pub fn server_ping(conn_id: ConnId, handler_id: HandlerId) -> Self {
        let key = conn_id.to_string();
        Self::new(
            key,
            Payload::Ping(PingPayload {
                server: true,
                client: false,
            }),
        )
        .routed(conn_id, handler_id)
    }

    /// Stamp connection and handler identities.
    #[must_use]
    pub fn routed(mut self, conn_id: ConnId, handler_id: HandlerId) -> Self {
        self.conn_id = conn_id;
        self.handler_id = handler_id;
        self
    }

    /// The function tag selected by the payload.
    pub fn function(&self) -> FunctionTag {
        self.payload.tag()
    }

    /// Replace the payload with an error report, keeping routing fields.
    #[must_use]
    pub fn into_error(mut self, message: impl Into<String>) -> Self {
        self.payload = Payload::error(message);
        self
    }

    /// Decode one inbound frame.
    pub fn decode(frame: &str) -> Result<Self, EnvelopeError> {
        let wire: WireDispatch = serde_json::from_str(frame)?;
        Self::try_from(wire)
    }

    /// Encode to the flat wire shape.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Encode, failing if the frame would exceed `limit` bytes.
    pub fn encode_within(&self, limit: usize) -> Result<String, EnvelopeError> {
        let frame = self.encode()?;
        if frame.len() > limit {
            return Err(EnvelopeError::TooLarge {
                size: frame.len(),
                limit,
            });
        }
        Ok(frame)
    }
}

/// Flat wire representation: every section present, `function` selects.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct WireDispatch {
    id: String,
    key: String,
    conn_id: String,
    handler_id: String,
    action: String,
    label: String,
    function: String,
    event: EventPayload,
    ping: PingPayload,
    render: RenderPayload,
    class: ClassPayload,
    redirect: RedirectPayload,
    custom: CustomPayload,
    error: ErrorPayload,
}

impl From<Dispatch> for WireDispatch {
    fn from(d: Dispatch) -> Self {
        let mut wire = Self {
            id: d.id,
            key: d.key,
            conn_id: d.conn_id.into_inner(),
            handler_id: d.handler_id.into_inner(),
            action: d.action,
            label: d.label,
            function: d.payload.tag().as_str().to_owned(),
            ..Self::default()
        };
        match d.payload {
            Payload::Ping(p) => wire.ping = p,
            Payload::Render(p) => wire.render = p,
            Payload::Class(p) => wire.class = p,
            Payload::Redirect(p) => wire.redirect = p,
            Payload::Event(p) => wire.event = p,
            Payload::Custom(p) => wire.custom = p,
            Payload::Error(p) => wire.error = p,
        }
        wire
    }
}

impl TryFrom<WireDispatch> for Dispatch {
    type Error = EnvelopeError;

    fn try_from(wire: WireDispatch) -> Result<Self, Self::Error> {
        let payload = match wire.function.parse::<FunctionTag>()? {
            FunctionTag::Ping => Payload::Ping(wire.ping),
            FunctionTag::Render => Payload::Render(wire.render),
            FunctionTag::Class => Payload::Class(wire.class),
            FunctionTag::Redirect => Payload::Redirect(wire.redirect),
            FunctionTag::Event => Payload::Event(wire.event),
            FunctionTag::Custom => Payload::Custom(wire.custom),
            FunctionTag::Error => Payload::Error(wire.error),
        };
        Ok(Self {
            id: wire.id,
            key: wire.key,
            conn_id: ConnId::from_string(wire.conn_id),
            handler_id: HandlerId::from_string(wire.handler_id),
            action: wire.action,
            label: wire.label,
            payload,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
