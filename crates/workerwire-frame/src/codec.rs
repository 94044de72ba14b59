use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, BytesMut};
use serde::Serialize;
use workerwire_sexp::{read_str, to_value, Value};

use crate::error::{DecodeError, EncodeError};

/// Opens and closes every frame block.
pub const FRAME_DELIMITER: u8 = b'"';

/// Ends every frame record.
pub const RECORD_TERMINATOR: u8 = b'\n';

/// Default bound on unconsumed receive-buffer bytes: 16 MiB.
pub const DEFAULT_MAX_PENDING: usize = 16 * 1024 * 1024;

/// Encode a value as a transport-safe block.
///
/// The block is base64 of the value's printed UTF-8 text, so it never
/// contains the frame delimiter and is plain ASCII.
pub fn encode_value(value: &Value) -> String {
    STANDARD.encode(value.to_string())
}

/// Encode any serializable value.
pub fn encode_serializable<T: Serialize + ?Sized>(value: &T) -> Result<String, EncodeError> {
    let value = to_value(value)?;
    Ok(encode_value(&value))
}

/// Decode a block produced by [`encode_value`].
///
/// ASCII whitespace inside the block is ignored, so line-wrapped base64 is
/// accepted.
pub fn decode_value(block: &[u8]) -> Result<Value, DecodeError> {
    let compact: Vec<u8> = block
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let raw = STANDARD.decode(compact)?;
    let text = String::from_utf8(raw)?;
    Ok(read_str(&text)?)
}

/// Append one complete frame record for `value` to `dst`.
///
/// Wire format:
/// ```text
/// "<base64(utf8(printed-value))>"\n
/// ```
pub fn encode_frame(value: &Value, dst: &mut BytesMut) {
    let block = encode_value(value);
    dst.reserve(block.len() + 3);
    dst.put_u8(FRAME_DELIMITER);
    dst.put_slice(block.as_bytes());
    dst.put_u8(FRAME_DELIMITER);
    dst.put_u8(RECORD_TERMINATOR);
}

/// Configuration for frame reading.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum unconsumed bytes a receive buffer may hold. Default: 16 MiB.
    pub max_pending: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sample() -> Value {
        Value::list([
            Value::symbol("event"),
            42.into(),
            "naïve \"quoted\" ✓".into(),
            Value::Vector(vec![Value::Float(-0.5), Value::nil()]),
        ])
    }

    #[test]
    fn block_is_base64_alphabet_only() {
        let block = encode_value(&sample());
        assert!(block
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=')));
    }

    #[test]
    fn frame_is_quoted_line() {
        let mut buf = BytesMut::new();
        encode_frame(&Value::list([1.into(), 2.into(), 3.into()]), &mut buf);
        assert_eq!(&buf[..], b"\"KDEgMiAzKQ==\"\n");
    }

    #[test]
    fn decode_accepts_wrapped_base64() {
        let block = encode_value(&sample());
        let (head, tail) = block.split_at(block.len() / 2);
        let wrapped = format!("{head}\n  {tail}\n");
        assert_eq!(decode_value(wrapped.as_bytes()).unwrap(), sample());
    }

    #[test]
    fn decode_rejects_bad_base64() {
        let err = decode_value(b"(1 2 3)").unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn decode_rejects_non_utf8() {
        let block = STANDARD.encode([0xff, 0xfe]);
        let err = decode_value(block.as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::Utf8(_)));
    }

    #[test]
    fn decode_rejects_unreadable_text() {
        for text in ["(1 2", "1 2", "#<buffer>"] {
            let block = STANDARD.encode(text);
            let err = decode_value(block.as_bytes()).unwrap_err();
            assert!(matches!(err, DecodeError::Syntax(_)), "{text}");
        }
    }

    #[test]
    fn serializable_values_encode() {
        let block = encode_serializable(&serde_json::json!({"ok": true})).unwrap();
        assert_eq!(
            decode_value(block.as_bytes()).unwrap(),
            Value::list([Value::list(["ok".into(), Value::symbol("t")])])
        );
    }

    #[test]
    fn unserializable_values_fail_to_encode() {
        let mut map = std::collections::BTreeMap::new();
        map.insert((1, 2), "pair key");
        let err = encode_serializable(&map).unwrap_err();
        assert!(matches!(err, EncodeError::Serialize(_)));
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            any::<i64>().prop_map(Value::Int),
            (-1e12f64..1e12).prop_map(Value::Float),
            ".*".prop_map(Value::Str),
            "[a-z][a-z0-9-]{0,8}".prop_map(Value::Symbol),
        ];
        leaf.prop_recursive(3, 24, 5, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..5).prop_map(Value::List),
                prop::collection::vec(inner, 0..5).prop_map(Value::Vector),
            ]
        })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(value in arb_value()) {
            let block = encode_value(&value);
            prop_assert_eq!(decode_value(block.as_bytes()).unwrap(), value);
        }
    }
}
