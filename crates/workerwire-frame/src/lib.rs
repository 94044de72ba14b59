//! Framing of structured values over a worker's standard streams.
//!
//! Every message travels as one record:
//! - a `"` frame delimiter
//! - the base64 encoding of the value's printed UTF-8 text
//! - a closing `"` and a `\n` record terminator
//!
//! There is no length prefix. The receiving side reads the stream with the
//! general value grammar, so a frame is simply a string token, and keeps
//! whatever has not formed a complete token yet for the next chunk.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_value, encode_frame, encode_serializable, encode_value, FrameConfig,
    DEFAULT_MAX_PENDING, FRAME_DELIMITER, RECORD_TERMINATOR,
};
pub use error::{DecodeError, EncodeError, FrameError, ProtocolError, Result};
pub use reader::{read_value, FrameReader, ReceiveBuffer, SharedBuffer};
pub use workerwire_sexp::Value;
pub use writer::FrameWriter;
