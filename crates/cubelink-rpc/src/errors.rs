//! Channel and transport error types.

use serde_json::Value;

/// Failure at the socket layer.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    /// The socket is not open.
    #[error("socket is not open")]
    NotOpen,

    /// Connecting to the remote endpoint failed.
    #[error("connect failed: {message}")]
    Connect {
        /// Underlying failure description.
        message: String,
    },

    /// Sending on the socket failed.
    #[error("send failed: {message}")]
    Send {
        /// Underlying failure description.
        message: String,
    },
}

/// Failure of a channel request.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The remote answered with an `error` payload.
    #[error("remote returned an error")]
    Remote {
        /// The wire `error` field, verbatim.
        error: Value,
    },

    /// The channel closed while the request was pending, or a request
    /// was attempted on an already-closed channel.
    #[error("channel closed")]
    Closed,

    /// A malformed or version-mismatched message was involved.
    #[error("protocol violation: {message}")]
    ProtocolViolation {
        /// What was wrong with the message.
        message: String,
    },

    /// The configured request deadline elapsed with no response.
    #[error("request timed out")]
    Timeout,

    /// The underlying socket failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Error returned by an inbound-call handler, serialized under the
/// response's `error` field.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct CallError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

impl CallError {
    /// Standard code for a method the handler does not implement.
    pub const METHOD_NOT_FOUND: i64 = -32601;

    /// Build a call error.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Wire form: `{"code": …, "message": …}`.
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "code": self.code, "message": self.message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_error_keeps_payload() {
        let err = ChannelError::Remote {
            error: json!({"message": "denied"}),
        };
        let ChannelError::Remote { error } = err else {
            panic!("expected remote variant");
        };
        assert_eq!(error["message"], "denied");
    }

    #[test]
    fn transport_error_converts() {
        let err: ChannelError = TransportError::NotOpen.into();
        assert_eq!(err.to_string(), "socket is not open");
    }

    #[test]
    fn call_error_wire_form() {
        let err = CallError::new(CallError::METHOD_NOT_FOUND, "no such method");
        let v = err.to_value();
        assert_eq!(v["code"], -32601);
        assert_eq!(v["message"], "no such method");
        assert_eq!(err.to_string(), "no such method");
    }

    #[test]
    fn closed_display() {
        assert_eq!(ChannelError::Closed.to_string(), "channel closed");
    }
}
