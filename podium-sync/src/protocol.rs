//! JSON wire protocol shared by clients and the relay.
//!
//! One JSON object per WebSocket text frame, tagged by `type`:
//! ```text
//! {"type":"auth","password":"…"}                      client → relay
//! {"type":"admin_status","isPresenter":true}          relay  → client
//! {"type":"page_change","page":3}                     both
//! {"type":"new_pdf","filename":"…","currentPage":1}   both
//! {"type":"user_count","count":12}                    relay  → client
//! {"type":"error","error":"…"}                        relay  → client
//! ```
//!
//! Decoding is strict: unknown tags, missing fields and out-of-range
//! values are rejected with a [`ProtocolError`] so the caller can drop the
//! frame and keep the session alive.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire tags, in the order they appear in the table above.
pub const MESSAGE_TYPES: [&str; 6] = [
    "auth",
    "admin_status",
    "page_change",
    "new_pdf",
    "user_count",
    "error",
];

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Presenter claim carrying the shared credential
    Auth { password: String },
    /// Role assertion from the relay
    AdminStatus {
        #[serde(rename = "isPresenter", alias = "isAdmin")]
        is_presenter: bool,
    },
    /// Shared page position (1-based)
    PageChange { page: u32 },
    /// A new shared document, opened at `current_page`
    NewPdf {
        filename: String,
        #[serde(rename = "currentPage", default = "first_page")]
        current_page: u32,
    },
    /// Connected client count, authoritative from the relay
    UserCount { count: u32 },
    /// Rejection notice from the relay
    Error { error: String },
}

fn first_page() -> u32 {
    1
}

impl Message {
    pub fn auth(password: impl Into<String>) -> Self {
        Self::Auth {
            password: password.into(),
        }
    }

    pub fn page_change(page: u32) -> Self {
        Self::PageChange { page }
    }

    pub fn new_pdf(filename: impl Into<String>, current_page: u32) -> Self {
        Self::NewPdf {
            filename: filename.into(),
            current_page,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    /// The wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::AdminStatus { .. } => "admin_status",
            Self::PageChange { .. } => "page_change",
            Self::NewPdf { .. } => "new_pdf",
            Self::UserCount { .. } => "user_count",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize to one text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse and validate one text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(ProtocolError::MissingType)?;
        let Some(kind) = MESSAGE_TYPES.iter().copied().find(|k| *k == kind) else {
            return Err(ProtocolError::UnknownType(kind.to_string()));
        };

        let msg: Self = serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
            kind,
            reason: e.to_string(),
        })?;
        msg.validate()?;
        Ok(msg)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        let invalid = |reason: &str| ProtocolError::InvalidPayload {
            kind: self.kind(),
            reason: reason.to_string(),
        };
        match self {
            Self::PageChange { page } if *page == 0 => Err(invalid("page must be >= 1")),
            Self::NewPdf { current_page, .. } if *current_page == 0 => {
                Err(invalid("currentPage must be >= 1"))
            }
            Self::NewPdf { filename, .. } if filename.trim().is_empty() => {
                Err(invalid("filename must not be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// Protocol errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Malformed frame: {0}")]
    Malformed(String),
    #[error("Frame has no string `type` field")]
    MissingType,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uses_wire_field_names() {
        let text = Message::new_pdf("1700000000_deck.pdf", 1).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "new_pdf");
        assert_eq!(value["filename"], "1700000000_deck.pdf");
        assert_eq!(value["currentPage"], 1);

        let text = Message::AdminStatus { is_presenter: true }.encode().unwrap();
        assert_eq!(text, r#"{"type":"admin_status","isPresenter":true}"#);
    }

    #[test]
    fn test_decode_each_kind() {
        assert_eq!(
            Message::decode(r#"{"type":"auth","password":"pw"}"#).unwrap(),
            Message::auth("pw")
        );
        assert_eq!(
            Message::decode(r#"{"type":"page_change","page":3}"#).unwrap(),
            Message::page_change(3)
        );
        assert_eq!(
            Message::decode(r#"{"type":"user_count","count":0}"#).unwrap(),
            Message::UserCount { count: 0 }
        );
        assert_eq!(
            Message::decode(r#"{"type":"error","error":"Invalid admin credentials"}"#).unwrap(),
            Message::error("Invalid admin credentials")
        );
    }

    #[test]
    fn test_decode_accepts_legacy_admin_field() {
        let msg = Message::decode(r#"{"type":"admin_status","isAdmin":true}"#).unwrap();
        assert_eq!(msg, Message::AdminStatus { is_presenter: true });
    }

    #[test]
    fn test_new_pdf_without_current_page_opens_first_page() {
        let msg = Message::decode(r#"{"type":"new_pdf","filename":"a.pdf"}"#).unwrap();
        assert_eq!(msg, Message::new_pdf("a.pdf", 1));
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        let msg = Message::decode(r#"{"type":"page_change","page":2,"error":""}"#).unwrap();
        assert_eq!(msg, Message::page_change(2));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(Message::decode("{not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(Message::decode("[1,2]"), Err(ProtocolError::MissingType)));
        assert!(matches!(
            Message::decode(r#"{"type":7}"#),
            Err(ProtocolError::MissingType)
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = Message::decode(r#"{"type":"cursor","x":1}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownType("cursor".to_string()));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        for frame in [
            r#"{"type":"page_change"}"#,
            r#"{"type":"user_count"}"#,
            r#"{"type":"admin_status"}"#,
            r#"{"type":"new_pdf","currentPage":2}"#,
            r#"{"type":"auth"}"#,
        ] {
            assert!(
                matches!(Message::decode(frame), Err(ProtocolError::InvalidPayload { .. })),
                "{frame} should be rejected"
            );
        }
    }

    #[test]
    fn test_decode_rejects_out_of_range_values() {
        assert!(Message::decode(r#"{"type":"page_change","page":0}"#).is_err());
        assert!(Message::decode(r#"{"type":"page_change","page":-4}"#).is_err());
        assert!(Message::decode(r#"{"type":"user_count","count":-1}"#).is_err());
        assert!(Message::decode(r#"{"type":"new_pdf","filename":"a.pdf","currentPage":0}"#).is_err());
        assert!(Message::decode(r#"{"type":"new_pdf","filename":"  "}"#).is_err());
    }

    #[test]
    fn test_kind_matches_wire_tag() {
        for msg in [
            Message::auth("x"),
            Message::AdminStatus { is_presenter: false },
            Message::page_change(1),
            Message::new_pdf("f.pdf", 1),
            Message::UserCount { count: 1 },
            Message::error("e"),
        ] {
            let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
            assert_eq!(value["type"], msg.kind());
            assert!(MESSAGE_TYPES.contains(&msg.kind()));
        }
    }
}
