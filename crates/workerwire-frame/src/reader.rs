use std::io::BufRead;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Buf, BytesMut};
use workerwire_sexp::{read_partial, Partial, Value};

use crate::codec::{decode_value, FrameConfig, FRAME_DELIMITER, RECORD_TERMINATOR};
use crate::error::{DecodeError, FrameError, ProtocolError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Accumulates output chunks from a peer and extracts complete values.
///
/// Bytes are read with the general value grammar. A string token is a frame
/// and is decoded; a bare symbol is stray noise and is dropped (so is a frame
/// that decodes to a bare symbol); any other value is delivered as read.
/// Whatever has not formed a complete token stays buffered for the next chunk.
#[derive(Debug)]
pub struct ReceiveBuffer {
    buf: BytesMut,
    config: FrameConfig,
    /// A malformed token already skipped in a call that also produced values;
    /// reported by the next call.
    pending_error: Option<ProtocolError>,
    /// Set after an overflow cut a record short; input is discarded through
    /// the next record terminator.
    resync: bool,
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}

enum Token {
    Deliver(Value),
    Noise,
}

fn classify(value: Value) -> std::result::Result<Token, DecodeError> {
    match value {
        Value::Str(block) => match decode_value(block.as_bytes())? {
            Value::Symbol(_) => Ok(Token::Noise),
            decoded => Ok(Token::Deliver(decoded)),
        },
        Value::Symbol(_) => Ok(Token::Noise),
        other => Ok(Token::Deliver(other)),
    }
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            pending_error: None,
            resync: false,
        }
    }

    /// Append `chunk` and return every value it completes, in stream order.
    ///
    /// A malformed token (bad syntax, or a frame that does not decode) is
    /// removed from the buffer and reported as [`ProtocolError::Decode`]. If
    /// the same pass already produced values, those are returned and the
    /// error is reported by the next call instead, so nothing is lost.
    /// Bytes after the bad token are parsed by later calls, including calls
    /// with an empty chunk.
    ///
    /// If the unconsumed suffix grows past `max_pending` without producing a
    /// value, it is discarded along with the rest of its record, and parsing
    /// resumes after the next newline.
    pub fn feed(&mut self, chunk: &[u8]) -> std::result::Result<Vec<Value>, ProtocolError> {
        self.buf.extend_from_slice(chunk);
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }
        if self.resync && !self.skip_to_record_boundary() {
            return Ok(Vec::new());
        }

        let mut values = Vec::new();
        let mut cursor = 0usize;
        let mut bad: Option<(DecodeError, usize)> = None;

        loop {
            match read_partial(&self.buf, cursor) {
                Partial::Complete { value, end } => match classify(value) {
                    Ok(Token::Deliver(value)) => {
                        values.push(value);
                        cursor = end;
                    }
                    Ok(Token::Noise) => {
                        tracing::trace!(offset = cursor, "dropping bare symbol from stream");
                        cursor = end;
                    }
                    Err(err) => {
                        bad = Some((err, end));
                        break;
                    }
                },
                Partial::Incomplete => break,
                Partial::Malformed { error, end } => {
                    bad = Some((error.into(), end));
                    break;
                }
            }
        }

        let mut failure = None;
        if let Some((err, end)) = bad {
            tracing::warn!(
                skipped = end - cursor,
                error = %err,
                "skipping malformed token in stream"
            );
            cursor = end;
            if values.is_empty() {
                failure = Some(ProtocolError::Decode(err));
            } else {
                self.pending_error = Some(ProtocolError::Decode(err));
            }
        }

        self.buf.advance(cursor);

        if let Some(err) = failure {
            return Err(err);
        }
        if values.is_empty() && self.buf.len() > self.config.max_pending {
            let size = self.buf.len();
            self.resync = !self.buf.ends_with(&[RECORD_TERMINATOR]);
            self.buf.clear();
            return Err(ProtocolError::Overflow {
                size,
                max: self.config.max_pending,
            });
        }

        tracing::trace!(
            values = values.len(),
            pending = self.buf.len(),
            "parsed stream chunk"
        );
        Ok(values)
    }

    /// Drop bytes through the next newline. False if none has arrived yet.
    fn skip_to_record_boundary(&mut self) -> bool {
        match self.buf.iter().position(|&b| b == RECORD_TERMINATOR) {
            Some(at) => {
                tracing::debug!(skipped = at + 1, "resumed at record boundary after overflow");
                self.buf.advance(at + 1);
                self.resync = false;
                true
            }
            None => {
                self.buf.clear();
                false
            }
        }
    }

    /// The unconsumed suffix.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Whether the next call to [`feed`](Self::feed) will report an error
    /// left over from the previous pass.
    pub fn has_pending_error(&self) -> bool {
        self.pending_error.is_some()
    }

    /// Drop all buffered bytes and any unreported error.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.pending_error = None;
        self.resync = false;
    }

    /// Current configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

/// A receive buffer that can be handed to a worker while the caller keeps a handle.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<ReceiveBuffer>>,
}

impl SharedBuffer {
    pub fn new(buffer: ReceiveBuffer) -> Self {
        Self {
            inner: Arc::new(Mutex::new(buffer)),
        }
    }

    /// Lock the buffer. A panic in another holder does not make it unusable.
    pub fn lock(&self) -> MutexGuard<'_, ReceiveBuffer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn feed(&self, chunk: &[u8]) -> std::result::Result<Vec<Value>, ProtocolError> {
        self.lock().feed(chunk)
    }

    /// Copy of the unconsumed suffix.
    pub fn pending(&self) -> Vec<u8> {
        self.lock().pending().to_vec()
    }

    /// True if both handles refer to the same buffer.
    pub fn ptr_eq(&self, other: &SharedBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Read exactly one framed value from a line-oriented stream (blocking).
///
/// This is the single-shot counterpart of [`ReceiveBuffer`] for a peer that
/// writes whole records: one line, frame quotes stripped, base64 and UTF-8
/// decoded, one value read. Blank lines are skipped. Returns
/// [`FrameError::ConnectionClosed`] at end of input.
pub fn read_value<R: BufRead>(reader: &mut R) -> Result<Value> {
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 || !line.ends_with(b"\n") {
            return Err(FrameError::ConnectionClosed);
        }

        let block = line.trim_ascii();
        if block.is_empty() {
            continue;
        }
        let block = match block {
            [FRAME_DELIMITER, inner @ .., FRAME_DELIMITER] => inner,
            other => other,
        };
        return Ok(decode_value(block)?);
    }
}

/// Reads framed values from any `BufRead` stream, one record per line.
pub struct FrameReader<T> {
    inner: T,
}

impl<T: BufRead> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Read the next value (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn recv(&mut self) -> Result<Value> {
        read_value(&mut self.inner)
    }

    /// Like [`recv`](Self::recv), but a clean EOF is `Ok(None)`.
    pub fn try_recv(&mut self) -> Result<Option<Value>> {
        match self.recv() {
            Ok(value) => Ok(Some(value)),
            Err(FrameError::ConnectionClosed) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::BytesMut;
    use proptest::prelude::*;

    use super::*;
    use crate::codec::{encode_frame, encode_value};

    fn frame(value: &Value) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(value, &mut buf);
        buf.to_vec()
    }

    fn one_two_three() -> Value {
        Value::list([1.into(), 2.into(), 3.into()])
    }

    #[test]
    fn split_frame_is_reassembled() {
        let wire = frame(&one_two_three());
        let (head, tail) = wire.split_at(4);

        let mut buffer = ReceiveBuffer::new();
        assert_eq!(buffer.feed(head).unwrap(), Vec::<Value>::new());
        assert_eq!(buffer.feed(tail).unwrap(), vec![one_two_three()]);
    }

    #[test]
    fn every_split_offset_yields_exactly_one_value() {
        let value = Value::list([
            Value::symbol("event"),
            "naïve ✓".into(),
            Value::Vector(vec![Value::Float(2.5)]),
        ]);
        let wire = frame(&value);

        for offset in 0..=wire.len() {
            let (head, tail) = wire.split_at(offset);
            let mut buffer = ReceiveBuffer::new();
            let mut values = buffer.feed(head).unwrap();
            values.extend(buffer.feed(tail).unwrap());
            assert_eq!(values, vec![value.clone()], "split at {offset}");
        }
    }

    #[test]
    fn multiple_frames_in_one_chunk() {
        let mut wire = frame(&Value::from(1));
        wire.extend(frame(&Value::from("two")));
        wire.extend(frame(&one_two_three()));

        let mut buffer = ReceiveBuffer::new();
        assert_eq!(
            buffer.feed(&wire).unwrap(),
            vec![Value::from(1), Value::from("two"), one_two_three()]
        );
        assert_eq!(buffer.pending(), b"\n");
    }

    #[test]
    fn consumed_bytes_are_pruned() {
        let mut buffer = ReceiveBuffer::new();
        for i in 0..1000 {
            let values = buffer.feed(&frame(&Value::from(i))).unwrap();
            assert_eq!(values, vec![Value::from(i)]);
            assert!(buffer.len() <= 1);
        }
    }

    #[test]
    fn empty_refeed_is_idempotent() {
        let wire = frame(&one_two_three());
        let mut buffer = ReceiveBuffer::new();
        buffer.feed(&wire[..wire.len() - 5]).unwrap();
        let before = buffer.pending().to_vec();

        assert!(buffer.feed(b"").unwrap().is_empty());
        assert_eq!(buffer.pending(), before.as_slice());
    }

    #[test]
    fn bare_symbols_are_noise() {
        let mut buffer = ReceiveBuffer::new();
        let mut wire = b"Loading worker... done\n".to_vec();
        wire.extend(frame(&Value::from(7)));

        assert_eq!(buffer.feed(&wire).unwrap(), vec![Value::from(7)]);
    }

    #[test]
    fn frame_decoding_to_symbol_is_dropped() {
        // Known limitation: a peer cannot deliver a bare symbol as data.
        let mut buffer = ReceiveBuffer::new();
        let mut wire = frame(&Value::symbol("done"));
        wire.extend(frame(&Value::list([Value::symbol("done")])));

        assert_eq!(
            buffer.feed(&wire).unwrap(),
            vec![Value::list([Value::symbol("done")])]
        );
    }

    #[test]
    fn raw_values_pass_through() {
        let mut buffer = ReceiveBuffer::new();
        assert_eq!(
            buffer.feed(b"(1 2 3) 42\n").unwrap(),
            vec![one_two_three(), Value::from(42)]
        );
    }

    #[test]
    fn trailing_atom_waits_for_delimiter() {
        let mut buffer = ReceiveBuffer::new();
        assert!(buffer.feed(b"12").unwrap().is_empty());
        assert_eq!(buffer.feed(b"34\n").unwrap(), vec![Value::from(1234)]);
    }

    #[test]
    fn malformed_token_then_valid_frame() {
        let mut wire = b"#<process worker>".to_vec();
        wire.extend(frame(&one_two_three()));

        let mut buffer = ReceiveBuffer::new();
        let err = buffer.feed(&wire).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(DecodeError::Syntax(_))));

        assert_eq!(buffer.feed(b"").unwrap(), vec![one_two_three()]);
        assert!(buffer.feed(b"").unwrap().is_empty());
    }

    #[test]
    fn malformed_token_across_chunks() {
        let mut wire = b"\"not base64!\"\n".to_vec();
        wire.extend(frame(&one_two_three()));

        for offset in 1..wire.len() {
            let (head, tail) = wire.split_at(offset);
            let mut buffer = ReceiveBuffer::new();
            let mut errors = 0;
            let mut values = Vec::new();
            for chunk in [head, tail, b"".as_slice(), b"".as_slice()] {
                match buffer.feed(chunk) {
                    Ok(parsed) => values.extend(parsed),
                    Err(ProtocolError::Decode(DecodeError::Base64(_))) => errors += 1,
                    Err(other) => panic!("unexpected error {other}"),
                }
            }
            assert_eq!(errors, 1, "split at {offset}");
            assert_eq!(values, vec![one_two_three()], "split at {offset}");
        }
    }

    #[test]
    fn error_after_values_is_reported_next_call() {
        let mut wire = frame(&Value::from(1));
        wire.extend(b") ");
        wire.extend(frame(&Value::from(2)));

        let mut buffer = ReceiveBuffer::new();
        assert_eq!(buffer.feed(&wire).unwrap(), vec![Value::from(1)]);
        assert!(buffer.has_pending_error());

        let pending = buffer.pending().to_vec();
        let err = buffer.feed(b"").unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
        assert_eq!(buffer.pending(), pending.as_slice());

        assert_eq!(buffer.feed(b"").unwrap(), vec![Value::from(2)]);
    }

    #[test]
    fn overflow_resumes_at_next_record() {
        let mut buffer = ReceiveBuffer::with_config(FrameConfig { max_pending: 16 });
        let err = buffer.feed(b"\"AAAAAAAAAAAAAAAAAAAAAAAA").unwrap_err();
        assert!(matches!(err, ProtocolError::Overflow { max: 16, .. }));
        assert!(buffer.is_empty());

        let mut rest = b"AAAA\"\n".to_vec();
        for n in 0..4i64 {
            rest.extend(frame(&Value::from(n)));
        }
        assert_eq!(
            buffer.feed(&rest).unwrap(),
            (0..4i64).map(Value::from).collect::<Vec<_>>()
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn overflow_tail_spanning_chunks_is_discarded() {
        let mut buffer = ReceiveBuffer::with_config(FrameConfig { max_pending: 16 });
        assert!(buffer.feed(b"\"AAAAAAAAAAAAAAAAAAAA").is_err());

        assert!(buffer.feed(b"AAAA").unwrap().is_empty());
        assert!(buffer.is_empty());
        assert!(buffer.feed(b"AA").unwrap().is_empty());

        let mut rest = b"\"\n".to_vec();
        rest.extend(frame(&Value::from(7)));
        assert_eq!(buffer.feed(&rest).unwrap(), vec![Value::from(7)]);
    }

    #[test]
    fn overflow_at_record_end_keeps_next_record() {
        let mut buffer = ReceiveBuffer::with_config(FrameConfig { max_pending: 16 });
        assert!(buffer.feed(b"(1 2 3 4 5 6 7 8 9\n").is_err());
        assert_eq!(
            buffer.feed(&frame(&Value::from(5))).unwrap(),
            vec![Value::from(5)]
        );
    }

    #[test]
    fn deep_nesting_is_malformed_not_fatal() {
        let mut buffer = ReceiveBuffer::new();
        let mut errors = 0;
        let mut result = buffer.feed(&[b'('; 200_000]);
        while let Err(err) = result {
            assert!(matches!(err, ProtocolError::Decode(_)));
            errors += 1;
            result = buffer.feed(b"");
        }
        assert!(errors > 0 && errors <= 200_000 / workerwire_sexp::MAX_DEPTH);
        assert!(buffer.len() < workerwire_sexp::MAX_DEPTH);
    }

    #[test]
    fn deeply_nested_frame_is_rejected() {
        let deep = format!("{}{}", "(".repeat(1000), ")".repeat(1000));
        let mut wire = format!("\"{}\"\n", STANDARD.encode(deep)).into_bytes();
        wire.extend(frame(&Value::from(1)));

        let mut buffer = ReceiveBuffer::new();
        assert!(matches!(buffer.feed(&wire), Err(ProtocolError::Decode(_))));
        assert_eq!(buffer.feed(b"").unwrap(), vec![Value::from(1)]);
    }

    #[test]
    fn clear_drops_pending_state() {
        let mut buffer = ReceiveBuffer::new();
        buffer.feed(b"\"partial").unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(!buffer.has_pending_error());
    }

    #[test]
    fn shared_buffer_handles_see_same_state() {
        let shared = SharedBuffer::default();
        let other = shared.clone();
        shared.feed(b"\"abc").unwrap();

        assert!(shared.ptr_eq(&other));
        assert_eq!(other.pending(), b"\"abc");
    }

    #[test]
    fn read_value_reads_one_line() {
        let mut wire = frame(&one_two_three());
        wire.extend(frame(&Value::from("next")));
        let mut cursor = Cursor::new(wire);

        assert_eq!(read_value(&mut cursor).unwrap(), one_two_three());
        assert_eq!(read_value(&mut cursor).unwrap(), Value::from("next"));
        assert!(matches!(
            read_value(&mut cursor),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn read_value_accepts_unquoted_block_and_blank_lines() {
        let line = format!("\n\n{}\n", encode_value(&Value::from(9)));
        let mut cursor = Cursor::new(line.into_bytes());
        assert_eq!(read_value(&mut cursor).unwrap(), Value::from(9));
    }

    #[test]
    fn read_value_without_newline_is_closed() {
        let mut wire = frame(&Value::from(1));
        wire.pop();
        let mut cursor = Cursor::new(wire);
        assert!(matches!(
            read_value(&mut cursor),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn read_value_reports_decode_errors() {
        let mut cursor = Cursor::new(b"\"%%%\"\n".to_vec());
        assert!(matches!(
            read_value(&mut cursor),
            Err(FrameError::Decode(DecodeError::Base64(_)))
        ));
    }

    #[test]
    fn frame_reader_try_recv_ends_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(frame(&Value::from(1))));
        assert_eq!(reader.try_recv().unwrap(), Some(Value::from(1)));
        assert_eq!(reader.try_recv().unwrap(), None);
        let _ = reader.get_ref();
        let _ = reader.get_mut();
        let _inner = reader.into_inner();
    }

    fn arb_payload() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::Int),
            ".*".prop_map(Value::Str),
            prop::collection::vec(any::<i32>().prop_map(Value::from), 0..4).prop_map(Value::List),
        ]
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_result(
            values in prop::collection::vec(arb_payload(), 1..8),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..6),
        ) {
            let mut wire = Vec::new();
            for value in &values {
                wire.extend(frame(value));
            }

            let mut offsets: Vec<usize> = cuts.iter().map(|cut| cut.index(wire.len() + 1)).collect();
            offsets.sort_unstable();

            let mut buffer = ReceiveBuffer::new();
            let mut parsed = Vec::new();
            let mut start = 0;
            for offset in offsets.into_iter().chain(std::iter::once(wire.len())) {
                parsed.extend(buffer.feed(&wire[start..offset]).unwrap());
                start = offset;
            }

            let mut whole = ReceiveBuffer::new();
            prop_assert_eq!(&parsed, &whole.feed(&wire).unwrap());
            prop_assert_eq!(parsed, values);
        }
    }
}
