//! Outbound frame encoders.
//!
//! Pure builders: each returns the canonical text of one frame and has no
//! side effects.

// ============================================================================
// Imports
// ============================================================================

use crate::error::Result;
use crate::identifiers::RequestId;

use super::Frame;

// ============================================================================
// Encoders
// ============================================================================

/// Encodes any serializable frame.
///
/// # Errors
///
/// Returns [`Error::Json`](crate::Error::Json) for [`Frame::Unknown`],
/// which has no wire form.
pub fn encode_frame(frame: &Frame) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

/// Encodes an `EXECUTE_COMMAND` frame.
///
/// # Errors
///
/// Never fails in practice; see [`encode_frame`].
pub fn encode_execute(request_id: RequestId, script: &str) -> Result<String> {
    encode_frame(&Frame::ExecuteCommand {
        request_id,
        script: script.to_owned(),
    })
}

/// Encodes a `CONTEXT_REQUEST` frame.
///
/// # Errors
///
/// Never fails in practice; see [`encode_frame`].
pub fn encode_context_request(request_id: RequestId) -> Result<String> {
    encode_frame(&Frame::ContextRequest { request_id })
}

/// Encodes a `NOTIFY` frame.
///
/// # Errors
///
/// Never fails in practice; see [`encode_frame`].
pub fn encode_notify(message: &str, timeout_ms: u64) -> Result<String> {
    encode_frame(&Frame::Notify {
        message: message.to_owned(),
        timeout_ms,
    })
}

/// Encodes a `HANDSHAKE` frame.
///
/// # Errors
///
/// Never fails in practice; see [`encode_frame`].
pub fn encode_handshake(name: Option<&str>) -> Result<String> {
    encode_frame(&Frame::Handshake {
        name: name.map(str::to_owned),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{Value, json};

    fn as_json(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_encode_execute() {
        let text = encode_execute(RequestId::new(1, 1000), "figma.currentPage.name").unwrap();
        assert_eq!(
            as_json(&text),
            json!({
                "type": "EXECUTE_COMMAND",
                "requestId": "1-1000",
                "script": "figma.currentPage.name"
            })
        );
    }

    #[test]
    fn test_encode_context_request() {
        let text = encode_context_request(RequestId::new(2, 7)).unwrap();
        assert_eq!(
            as_json(&text),
            json!({ "type": "CONTEXT_REQUEST", "requestId": "2-7" })
        );
    }

    #[test]
    fn test_encode_notify() {
        let text = encode_notify("Saved", 3000).unwrap();
        assert_eq!(
            as_json(&text),
            json!({ "type": "NOTIFY", "message": "Saved", "timeoutMs": 3000 })
        );
    }

    #[test]
    fn test_encode_handshake_omits_missing_name() {
        assert_eq!(
            as_json(&encode_handshake(None).unwrap()),
            json!({ "type": "HANDSHAKE" })
        );
        assert_eq!(
            as_json(&encode_handshake(Some("controller")).unwrap()),
            json!({ "type": "HANDSHAKE", "name": "controller" })
        );
    }

    #[test]
    fn test_unknown_has_no_wire_form() {
        assert!(encode_frame(&Frame::Unknown { kind: None }).is_err());
    }
}
