use workerwire_frame::{ProtocolError, Value};

/// Head symbol of an error event.
pub const ERROR_TAG: &str = "error";

/// Payload of an error event: a list of two or more elements headed by the
/// symbol `error`.
pub fn error_payload(value: &Value) -> Option<&[Value]> {
    match value.tagged(ERROR_TAG) {
        Some(payload) if !payload.is_empty() => Some(payload),
        _ => None,
    }
}

/// Route parsed values, in order, to `deliver`.
///
/// An error event stops the batch: it becomes [`ProtocolError::Remote`] and
/// the values after it in the same batch are dropped. Returns the number of
/// values delivered.
pub fn dispatch<F>(values: Vec<Value>, mut deliver: F) -> Result<usize, ProtocolError>
where
    F: FnMut(Value),
{
    let total = values.len();
    for (index, value) in values.into_iter().enumerate() {
        if let Some(payload) = error_payload(&value) {
            let dropped = total - index - 1;
            if dropped > 0 {
                tracing::warn!(dropped, "dropping values after error event");
            }
            return Err(ProtocolError::Remote {
                payload: payload.to_vec(),
            });
        }
        deliver(value);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use workerwire_frame::{encode_value, ReceiveBuffer};

    use super::*;

    fn error_event(payload: Vec<Value>) -> Value {
        let mut items = vec![Value::symbol(ERROR_TAG)];
        items.extend(payload);
        Value::List(items)
    }

    #[test]
    fn delivers_in_order() {
        let mut seen = Vec::new();
        let delivered = dispatch(vec![1.into(), "two".into()], |value| seen.push(value)).unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(seen, vec![Value::from(1), Value::from("two")]);
    }

    #[test]
    fn error_event_becomes_remote_error() {
        let wire = format!("\"{}\"\n", encode_value(&error_event(vec!["boom".into()])));
        let values = ReceiveBuffer::new().feed(wire.as_bytes()).unwrap();

        let mut calls = 0;
        let err = dispatch(values, |_| calls += 1).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Remote {
                payload: vec!["boom".into()]
            }
        );
        assert_eq!(calls, 0);
    }

    #[test]
    fn error_event_drops_rest_of_batch() {
        let values = vec![
            1.into(),
            error_event(vec![Value::symbol("quota"), 5.into()]),
            2.into(),
        ];
        let mut seen = Vec::new();
        let err = dispatch(values, |value| seen.push(value)).unwrap_err();
        assert_eq!(seen, vec![Value::from(1)]);
        assert!(matches!(err, ProtocolError::Remote { payload } if payload.len() == 2));
    }

    #[test]
    fn bare_error_symbol_list_is_data() {
        let lone = Value::list([Value::symbol(ERROR_TAG)]);
        let string_head = Value::list(["error".into(), "not a tag".into()]);
        let mut seen = Vec::new();
        dispatch(vec![lone.clone(), string_head.clone()], |value| seen.push(value)).unwrap();
        assert_eq!(seen, vec![lone, string_head]);
    }

    #[test]
    fn empty_batch() {
        assert_eq!(dispatch(Vec::new(), |_| unreachable!()).unwrap(), 0);
    }
}
