//! Structured values and their external s-expression representation.
//!
//! This is the lowest layer of workerwire. A [`Value`] is printed with
//! [`Value::to_string`] (the canonical form) and read back with
//! [`read_str`] for complete input or [`read_partial`] for a stream prefix
//! that may still be growing.

pub mod error;
pub mod json;
pub mod printer;
pub mod reader;
pub mod value;

pub use error::{ReadError, ReadErrorKind, Result};
pub use json::{from_json, to_value};
pub use reader::{read_partial, read_str, Partial, MAX_DEPTH};
pub use value::Value;
