//! Messages exchanged with the translation worker.
//!
//! Every message travels in an [`Envelope`] carrying a numeric id; each
//! response echoes the id of the request it answers. On the wire a
//! message is a single JSON object:
//!
//! ```json
//! {"id":1,"type":"TRANSLATE","payload":{"text":"hi","table":"en-ueb-g2.ctb"}}
//! {"id":1,"type":"TRANSLATE_RESULT","payload":{"braille":"hi"}}
//! ```

use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use louis_worker_common::{EngineError, MarshalError, ProtocolError, TableError, WorkerError};

/// Request/response correlation id.
pub type RequestId = u64;

/// A message with its correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Correlation id.
    pub id: RequestId,
    /// The message.
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    /// Wrap `body` with `id`.
    pub fn new(id: RequestId, body: T) -> Self {
        Self { id, body }
    }
}

/// Requests accepted by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    /// Load the engine and install the default tables.
    Init,
    /// Translate text to braille.
    Translate(TranslatePayload),
    /// Report worker state.
    Status,
}

/// Payload of a `TRANSLATE` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatePayload {
    /// Text to translate.
    pub text: String,
    /// Comma-separated table list; the first default table if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Translation mode.
    #[serde(default)]
    pub mode: TranslationMode,
}

impl TranslatePayload {
    /// Translate `text` with `table`.
    pub fn new(text: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            table: Some(table.into()),
            mode: TranslationMode::default(),
        }
    }
}

/// Responses sent by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    /// Initialization succeeded.
    Ready {
        /// Engine version, empty if unknown.
        version: String,
    },
    /// Translation output.
    TranslateResult {
        /// Braille in BRF ASCII.
        braille: String,
    },
    /// The request failed.
    Error(ErrorPayload),
    /// Worker state snapshot.
    Status(WorkerStatus),
}

/// Error category reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The worker is not `Ready`.
    NotReady,
    /// The engine module could not be loaded.
    EngineLoad,
    /// A table could not be fetched.
    FetchFailed,
    /// A table could not be written to the private filesystem.
    WriteFailed,
    /// A table name is invalid or not installed.
    InvalidTable,
    /// Input too long or output truncated.
    EncodingOverflow,
    /// The engine failed to translate.
    Translation,
    /// Anything else.
    Internal,
}

/// Payload of an `ERROR` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error category.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl ErrorPayload {
    /// Create a payload.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&WorkerError> for ErrorPayload {
    fn from(error: &WorkerError) -> Self {
        let kind = match error {
            WorkerError::Engine(e) if e.is_load_failure() => ErrorKind::EngineLoad,
            WorkerError::Engine(_) => ErrorKind::Translation,
            WorkerError::Table(e) => match e {
                TableError::FetchFailed { .. } => ErrorKind::FetchFailed,
                TableError::WriteFailed { .. } => ErrorKind::WriteFailed,
                TableError::InvalidName { .. } | TableError::NotInstalled { .. } => {
                    ErrorKind::InvalidTable
                }
            },
            WorkerError::Marshal(e) => match e {
                MarshalError::EncodingOverflow { .. } => ErrorKind::EncodingOverflow,
                MarshalError::Engine(EngineError::LoadFailed { .. }) => ErrorKind::EngineLoad,
                _ => ErrorKind::Translation,
            },
            WorkerError::Protocol(ProtocolError::NotReady { .. }) => ErrorKind::NotReady,
            WorkerError::Protocol(ProtocolError::InitFailed { .. }) => ErrorKind::EngineLoad,
            WorkerError::Protocol(ProtocolError::WorkerGone)
            | WorkerError::Config(_)
            | WorkerError::Io(_) => ErrorKind::Internal,
        };
        Self::new(kind, error.to_string())
    }
}

impl From<WorkerError> for ErrorPayload {
    fn from(error: WorkerError) -> Self {
        Self::from(&error)
    }
}

/// Worker state snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Readiness state name.
    pub state: String,
    /// Engine version once loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Table inventory.
    pub tables: Vec<TableStatus>,
    /// Native log callbacks registered with the engine.
    pub log_callback_registrations: u32,
    /// Entries in the engine's function table once loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_table_size: Option<u64>,
    /// Completed translations.
    pub translations: u64,
}

/// One inventory entry in a [`WorkerStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStatus {
    /// Table file name.
    pub name: String,
    /// Whether it is installed.
    pub installed: bool,
}

/// How text is translated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationMode {
    /// Code used for mathematical notation.
    #[serde(default)]
    pub math: MathCode,
    /// Raw engine mode bits.
    #[serde(default)]
    pub flags: ModeFlags,
}

/// Braille code for mathematics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MathCode {
    /// Nemeth Code.
    #[default]
    Nemeth,
    /// UEB technical material.
    Ueb,
}

impl MathCode {
    /// Key used in the `math_tables` configuration map.
    pub fn key(self) -> &'static str {
        match self {
            Self::Nemeth => "nemeth",
            Self::Ueb => "ueb",
        }
    }
}

/// liblouis translation mode bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModeFlags(pub u32);

impl ModeFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Translate without contractions.
    pub const NO_CONTRACTIONS: Self = Self(1);
    /// Uncontract the word at the cursor.
    pub const COMPBRL_AT_CURSOR: Self = Self(2);
    /// Output dot patterns instead of characters.
    pub const DOTS_IO: Self = Self(4);
    /// Uncontract from the cursor leftwards.
    pub const COMPBRL_LEFT_CURSOR: Self = Self(32);
    /// Output Unicode braille.
    pub const UC_BRL: Self = Self(64);
    /// Drop characters without a rule.
    pub const NO_UNDEFINED: Self = Self(128);
    /// Partial translation.
    pub const PARTIAL_TRANS: Self = Self(256);

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ModeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_translate_request_wire_format() {
        let wire = r#"{"id":1,"type":"TRANSLATE","payload":{"text":"hi","table":"en-ueb-g2.ctb"}}"#;

        let envelope: Envelope<Request> = serde_json::from_str(wire).unwrap();
        assert_eq!(envelope.id, 1);
        assert_eq!(
            envelope.body,
            Request::Translate(TranslatePayload::new("hi", "en-ueb-g2.ctb"))
        );
    }

    #[test]
    fn test_init_request_has_no_payload() {
        let envelope: Envelope<Request> = serde_json::from_str(r#"{"id":7,"type":"INIT"}"#).unwrap();
        assert_eq!(envelope, Envelope::new(7, Request::Init));

        let value = serde_json::to_value(Envelope::new(7, Request::Init)).unwrap();
        assert_eq!(value, json!({"id": 7, "type": "INIT"}));
    }

    #[test]
    fn test_translate_defaults() {
        let wire = r#"{"id":2,"type":"TRANSLATE","payload":{"text":"x"}}"#;

        let envelope: Envelope<Request> = serde_json::from_str(wire).unwrap();
        let Request::Translate(payload) = envelope.body else {
            panic!("expected TRANSLATE");
        };
        assert_eq!(payload.table, None);
        assert_eq!(payload.mode.math, MathCode::Nemeth);
        assert_eq!(payload.mode.flags, ModeFlags::NONE);
    }

    #[test]
    fn test_mode_on_the_wire() {
        let wire = r#"{"id":3,"type":"TRANSLATE","payload":{"text":"x","mode":{"math":"ueb","flags":5}}}"#;

        let envelope: Envelope<Request> = serde_json::from_str(wire).unwrap();
        let Request::Translate(payload) = envelope.body else {
            panic!("expected TRANSLATE");
        };
        assert_eq!(payload.mode.math, MathCode::Ueb);
        assert!(payload.mode.flags.contains(ModeFlags::NO_CONTRACTIONS | ModeFlags::DOTS_IO));
    }

    #[test]
    fn test_response_wire_format() {
        let ready = serde_json::to_value(Envelope::new(
            1,
            Response::Ready {
                version: "3.29.0".into(),
            },
        ))
        .unwrap();
        assert_eq!(
            ready,
            json!({"id": 1, "type": "READY", "payload": {"version": "3.29.0"}})
        );

        let error = serde_json::to_value(Envelope::new(
            2,
            Response::Error(ErrorPayload::new(ErrorKind::NotReady, "not ready")),
        ))
        .unwrap();
        assert_eq!(
            error,
            json!({"id": 2, "type": "ERROR", "payload": {"kind": "NotReady", "message": "not ready"}})
        );

        let result = serde_json::to_value(Envelope::new(
            3,
            Response::TranslateResult {
                braille: ",hello".into(),
            },
        ))
        .unwrap();
        assert_eq!(result["type"], "TRANSLATE_RESULT");
    }

    #[test]
    fn test_error_kind_mapping() {
        let cases = [
            (
                WorkerError::from(EngineError::load_failed("bad module")),
                ErrorKind::EngineLoad,
            ),
            (
                WorkerError::from(TableError::fetch_failed("missing.ctb", "not found")),
                ErrorKind::FetchFailed,
            ),
            (
                WorkerError::from(TableError::NotInstalled {
                    name: "x.ctb".into(),
                }),
                ErrorKind::InvalidTable,
            ),
            (
                WorkerError::from(MarshalError::overflow("too long")),
                ErrorKind::EncodingOverflow,
            ),
            (
                WorkerError::from(MarshalError::Engine(EngineError::FuelExhausted {
                    function: "lou_translateString".into(),
                })),
                ErrorKind::Translation,
            ),
            (
                WorkerError::from(ProtocolError::NotReady {
                    state: "Initializing".into(),
                }),
                ErrorKind::NotReady,
            ),
        ];

        for (error, kind) in cases {
            assert_eq!(ErrorPayload::from(&error).kind, kind, "{error}");
        }
    }
}
