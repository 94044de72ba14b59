use workerwire_sexp::{ReadError, Value};

/// A value could not be turned into a frame.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// serde could not represent the input as a value.
    #[error("value is not serializable: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A frame block could not be turned back into a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The block is not valid base64.
    #[error("invalid base64 in frame: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded bytes are not UTF-8.
    #[error("frame text is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// The text is not a single readable value.
    #[error("unreadable value: {0}")]
    Syntax(#[from] ReadError),
}

/// Failure surfaced to whoever consumes a worker's output.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// The peer sent bytes that do not decode. The bad span has been skipped.
    #[error("malformed data from peer: {0}")]
    Decode(#[from] DecodeError),

    /// The peer sent an explicit `(error ...)` message.
    #[error("peer signalled error: {}", render_payload(.payload))]
    Remote { payload: Vec<Value> },

    /// Unconsumed input grew past the configured limit and was discarded.
    #[error("receive buffer overflow ({size} bytes pending, max {max})")]
    Overflow { size: usize, max: usize },
}

fn render_payload(payload: &[Value]) -> String {
    let items: Vec<String> = payload.iter().map(Value::to_string).collect();
    format!("({})", items.join(" "))
}

/// Errors from reading or writing frames on a stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream was closed before a complete frame was exchanged.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_renders_payload() {
        let err = ProtocolError::Remote {
            payload: vec![Value::string("boom"), 3.into()],
        };
        assert_eq!(err.to_string(), "peer signalled error: (\"boom\" 3)");
    }
}
