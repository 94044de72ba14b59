use std::collections::HashMap;

use crate::error::{ReadError, ReadErrorKind, Result};
use crate::value::Value;

/// Outcome of reading one value from a possibly incomplete prefix.
#[derive(Debug, Clone, PartialEq)]
pub enum Partial {
    /// A whole value was read; `end` is the offset just past it.
    Complete { value: Value, end: usize },
    /// The input ran out before a value was complete (or held only whitespace).
    Incomplete,
    /// The input contains a bad token; `end` is the offset just past it.
    Malformed { error: ReadError, end: usize },
}

/// Read one value starting at `start` from a stream prefix.
///
/// Running out of input anywhere, including in the middle of a number or
/// symbol that more bytes could extend, yields [`Partial::Incomplete`].
pub fn read_partial(input: &[u8], start: usize) -> Partial {
    let mut reader = Reader::new(input, start, false);
    match reader.read_value() {
        Ok(value) => Partial::Complete {
            value,
            end: reader.pos,
        },
        Err(Stop::Incomplete) => Partial::Incomplete,
        Err(Stop::Malformed(error)) => Partial::Malformed {
            error,
            end: reader.pos.max(start + 1).min(input.len()),
        },
    }
}

/// Read exactly one value from complete input.
///
/// Surrounding whitespace and comments are allowed; anything else after the
/// value is [`ReadErrorKind::TrailingData`].
pub fn read_str(input: &str) -> Result<Value> {
    let bytes = input.as_bytes();
    let mut reader = Reader::new(bytes, 0, true);
    let value = reader.read_value().map_err(|stop| stop.into_error(bytes.len()))?;
    reader
        .skip_atmosphere()
        .map_err(|stop| stop.into_error(bytes.len()))?;
    if reader.pos < bytes.len() {
        return Err(ReadError::new(ReadErrorKind::TrailingData, reader.pos));
    }
    Ok(value)
}

/// Returns true if `token`, printed bare, would read back as a number.
pub(crate) fn is_numeric_token(token: &str) -> bool {
    parse_integer(token).is_some() || parse_float(token).is_some()
}

enum Stop {
    Incomplete,
    Malformed(ReadError),
}

impl Stop {
    fn into_error(self, len: usize) -> ReadError {
        match self {
            Stop::Incomplete => ReadError::new(ReadErrorKind::UnexpectedEof, len),
            Stop::Malformed(error) => error,
        }
    }
}

enum Label {
    Pending,
    Ready(Value),
}

/// Deepest nesting of lists, vectors and quotes the reader accepts.
pub const MAX_DEPTH: usize = 256;

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
    /// When set, end of input terminates tokens instead of meaning "wait for more".
    at_end: bool,
    labels: HashMap<u64, Label>,
}

type Step<T> = std::result::Result<T, Stop>;

fn malformed<T>(kind: ReadErrorKind, offset: usize) -> Step<T> {
    Err(Stop::Malformed(ReadError::new(kind, offset)))
}

fn is_delimiter(b: u8) -> bool {
    is_space(b) || matches!(b, b'(' | b')' | b'[' | b']' | b'"' | b';' | b'\'' | b'`' | b',')
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0c)
}

fn utf8_len(lead: u8) -> usize {
    match lead {
        0xf0..=0xf7 => 4,
        0xe0..=0xef => 3,
        0xc0..=0xdf => 2,
        _ => 1,
    }
}

impl<'a> Reader<'a> {
    fn new(input: &'a [u8], start: usize, at_end: bool) -> Self {
        Self {
            input,
            pos: start,
            depth: 0,
            at_end,
            labels: HashMap::new(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    /// End of input inside a value: incomplete for streams, an error otherwise.
    fn eof<T>(&self) -> Step<T> {
        if self.at_end {
            malformed(ReadErrorKind::UnexpectedEof, self.pos)
        } else {
            Err(Stop::Incomplete)
        }
    }

    fn skip_atmosphere(&mut self) -> Step<()> {
        loop {
            match self.peek() {
                Some(b) if is_space(b) => self.pos += 1,
                Some(b';') => match self.input[self.pos..].iter().position(|&b| b == b'\n') {
                    Some(offset) => self.pos += offset + 1,
                    None if self.at_end => self.pos = self.input.len(),
                    None => return Err(Stop::Incomplete),
                },
                _ => return Ok(()),
            }
        }
    }

    fn read_value(&mut self) -> Step<Value> {
        if self.depth >= MAX_DEPTH {
            return malformed(ReadErrorKind::TooDeep(MAX_DEPTH), self.pos);
        }
        self.depth += 1;
        let value = self.read_datum();
        self.depth -= 1;
        value
    }

    fn read_datum(&mut self) -> Step<Value> {
        self.skip_atmosphere()?;
        let start = self.pos;
        let Some(b) = self.peek() else {
            return if self.at_end {
                malformed(ReadErrorKind::UnexpectedEof, start)
            } else {
                Err(Stop::Incomplete)
            };
        };

        match b {
            b'(' => {
                self.pos += 1;
                self.read_sequence(b')').map(Value::List)
            }
            b'[' => {
                self.pos += 1;
                self.read_sequence(b']').map(Value::Vector)
            }
            b')' | b']' => {
                self.pos += 1;
                malformed(ReadErrorKind::UnexpectedClose(b as char), start)
            }
            b'"' => self.read_string().map(Value::Str),
            b'\'' => {
                self.pos += 1;
                let quoted = self.read_value()?;
                Ok(Value::List(vec![Value::symbol("quote"), quoted]))
            }
            b'`' | b',' => {
                self.pos += 1;
                malformed(ReadErrorKind::InvalidSyntax((b as char).to_string()), start)
            }
            b'?' => self.read_character(),
            b'#' => self.read_dispatch(),
            _ => self.read_atom(),
        }
    }

    fn read_sequence(&mut self, close: u8) -> Step<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            self.skip_atmosphere()?;
            let start = self.pos;
            match self.peek() {
                None => return self.eof(),
                Some(b) if b == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(b @ (b')' | b']')) => {
                    self.pos += 1;
                    return malformed(ReadErrorKind::UnexpectedClose(b as char), start);
                }
                Some(b'.') if self.lone_dot()? => {
                    self.pos += 1;
                    return malformed(
                        ReadErrorKind::InvalidSyntax("dotted pair".to_string()),
                        start,
                    );
                }
                Some(_) => items.push(self.read_value()?),
            }
        }
    }

    /// Whether the `.` at the cursor stands alone (dotted-pair syntax).
    fn lone_dot(&self) -> Step<bool> {
        match self.input.get(self.pos + 1) {
            Some(&next) => Ok(is_delimiter(next)),
            None if self.at_end => Ok(true),
            None => Err(Stop::Incomplete),
        }
    }

    fn read_string(&mut self) -> Step<String> {
        let start = self.pos;
        self.pos += 1;
        let mut out = Vec::new();
        // A bad escape does not end the token; keep scanning to the closing quote
        // so the whole literal is skipped as one unit.
        let mut deferred: Option<ReadErrorKind> = None;

        loop {
            let Some(b) = self.bump() else {
                return self.eof();
            };
            match b {
                b'"' => break,
                b'\\' => {
                    let Some(escape) = self.bump() else {
                        return self.eof();
                    };
                    match self.read_escape(escape) {
                        Ok(Some(c)) => push_char(&mut out, c),
                        Ok(None) => {}
                        Err(kind) => {
                            deferred.get_or_insert(kind);
                        }
                    }
                }
                other => out.push(other),
            }
        }

        if let Some(kind) = deferred {
            return malformed(kind, start);
        }
        String::from_utf8(out).or_else(|_| malformed(ReadErrorKind::InvalidUtf8, start))
    }

    /// Decode the escape following a backslash. `Ok(None)` for escapes that
    /// produce nothing (escaped newline or space).
    fn read_escape(&mut self, escape: u8) -> std::result::Result<Option<char>, ReadErrorKind> {
        let c = match escape {
            b'\n' | b' ' => return Ok(None),
            b'n' => '\n',
            b't' => '\t',
            b'r' => '\r',
            b'e' => '\u{1b}',
            b'a' => '\u{7}',
            b'f' => '\u{c}',
            b'b' => '\u{8}',
            b'v' => '\u{b}',
            b'd' => '\u{7f}',
            b'0'..=b'7' => {
                let mut code = u32::from(escape - b'0');
                for _ in 0..2 {
                    match self.peek() {
                        Some(d @ b'0'..=b'7') => {
                            code = code * 8 + u32::from(d - b'0');
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                return char_from_code(code, "\\NNN").map(Some);
            }
            b'x' => {
                let digits = self.take_hex(usize::MAX);
                if self.peek() == Some(b'\\') && self.input.get(self.pos + 1) == Some(&b' ') {
                    self.pos += 2;
                }
                return parse_hex(&digits, "\\x").map(Some);
            }
            b'u' => return self.fixed_hex(4, "\\u").map(Some),
            b'U' => return self.fixed_hex(8, "\\U").map(Some),
            other => {
                // Any other escaped byte stands for itself; re-read it as a
                // full UTF-8 character.
                let start = self.pos - 1;
                let len = utf8_len(other);
                let end = (start + len).min(self.input.len());
                self.pos = end;
                return std::str::from_utf8(&self.input[start..end])
                    .ok()
                    .and_then(|s| s.chars().next())
                    .map(Some)
                    .ok_or(ReadErrorKind::InvalidUtf8);
            }
        };
        Ok(Some(c))
    }

    fn take_hex(&mut self, max: usize) -> String {
        let mut digits = String::new();
        while digits.len() < max {
            match self.peek() {
                Some(d) if d.is_ascii_hexdigit() => {
                    digits.push(d as char);
                    self.pos += 1;
                }
                _ => break,
            }
        }
        digits
    }

    fn fixed_hex(&mut self, width: usize, name: &str) -> std::result::Result<char, ReadErrorKind> {
        let digits = self.take_hex(width);
        if digits.len() != width {
            return Err(ReadErrorKind::InvalidEscape(format!("{name}{digits}")));
        }
        parse_hex(&digits, name)
    }

    fn read_character(&mut self) -> Step<Value> {
        let start = self.pos;
        self.pos += 1;
        let Some(b) = self.bump() else {
            return self.eof();
        };

        let c = if b == b'\\' {
            let Some(escape) = self.bump() else {
                return self.eof();
            };
            match self.read_escape(escape) {
                Ok(Some(c)) => c,
                Ok(None) => ' ',
                Err(kind) => return malformed(kind, start),
            }
        } else {
            let len = utf8_len(b);
            let begin = self.pos - 1;
            if begin + len > self.input.len() {
                return self.eof();
            }
            self.pos = begin + len;
            match std::str::from_utf8(&self.input[begin..self.pos])
                .ok()
                .and_then(|s| s.chars().next())
            {
                Some(c) => c,
                None => return malformed(ReadErrorKind::InvalidUtf8, start),
            }
        };

        match self.peek() {
            None if !self.at_end => Err(Stop::Incomplete),
            Some(next) if !is_delimiter(next) => {
                self.skip_token();
                let text = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
                malformed(ReadErrorKind::InvalidSyntax(text), start)
            }
            _ => Ok(Value::Int(i64::from(u32::from(c)))),
        }
    }

    fn read_dispatch(&mut self) -> Step<Value> {
        let start = self.pos;
        self.pos += 1;
        let Some(b) = self.peek() else {
            return self.eof();
        };

        match b {
            b'#' => {
                self.pos += 1;
                Ok(Value::Symbol(String::new()))
            }
            b'0'..=b'9' => {
                let digits_start = self.pos;
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.pos += 1;
                }
                let digits = std::str::from_utf8(&self.input[digits_start..self.pos])
                    .unwrap_or_default();
                let Ok(label) = digits.parse::<u64>() else {
                    return malformed(ReadErrorKind::IntegerOverflow(digits.to_string()), start);
                };
                match self.bump() {
                    None => self.eof(),
                    Some(b'=') => {
                        self.labels.insert(label, Label::Pending);
                        let value = self.read_value()?;
                        self.labels.insert(label, Label::Ready(value.clone()));
                        Ok(value)
                    }
                    Some(b'#') => match self.labels.get(&label) {
                        Some(Label::Ready(value)) => Ok(value.clone()),
                        Some(Label::Pending) => {
                            malformed(ReadErrorKind::CircularReference(label), start)
                        }
                        None => malformed(ReadErrorKind::UndefinedLabel(label), start),
                    },
                    Some(other) => malformed(
                        ReadErrorKind::InvalidSyntax(format!("#{digits}{}", other as char)),
                        start,
                    ),
                }
            }
            other => {
                self.pos += 1;
                malformed(
                    ReadErrorKind::InvalidSyntax(format!("#{}", other as char)),
                    start,
                )
            }
        }
    }

    fn skip_token(&mut self) {
        while let Some(b) = self.peek() {
            if is_delimiter(b) {
                break;
            }
            self.pos += 1;
        }
    }

    fn read_atom(&mut self) -> Step<Value> {
        let start = self.pos;
        let mut text = Vec::new();
        let mut escaped = false;

        loop {
            match self.peek() {
                None if self.at_end => break,
                None => return Err(Stop::Incomplete),
                Some(b) if is_delimiter(b) => break,
                Some(b'\\') => {
                    self.pos += 1;
                    let Some(next) = self.bump() else {
                        return self.eof();
                    };
                    escaped = true;
                    text.push(next);
                }
                Some(b) => {
                    self.pos += 1;
                    text.push(b);
                }
            }
        }

        let Ok(token) = String::from_utf8(text) else {
            return malformed(ReadErrorKind::InvalidUtf8, start);
        };
        if escaped {
            return Ok(Value::Symbol(token));
        }
        if token == "." {
            return malformed(ReadErrorKind::InvalidSyntax(token), start);
        }
        if let Some(parsed) = parse_integer(&token) {
            return match parsed {
                Some(n) => Ok(Value::Int(n)),
                None => malformed(ReadErrorKind::IntegerOverflow(token), start),
            };
        }
        if let Some(f) = parse_float(&token) {
            return Ok(Value::Float(f));
        }
        Ok(Value::Symbol(token))
    }
}

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

fn char_from_code(code: u32, name: &str) -> std::result::Result<char, ReadErrorKind> {
    char::from_u32(code).ok_or_else(|| ReadErrorKind::InvalidEscape(format!("{name} {code:#x}")))
}

fn parse_hex(digits: &str, name: &str) -> std::result::Result<char, ReadErrorKind> {
    let code = u32::from_str_radix(digits, 16)
        .map_err(|_| ReadErrorKind::InvalidEscape(format!("{name}{digits}")))?;
    char_from_code(code, name)
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

fn strip_sign(token: &str) -> &str {
    token.strip_prefix(['+', '-']).unwrap_or(token)
}

/// `[+-]?DIGITS.?`: `Some(None)` when it has integer shape but overflows.
fn parse_integer(token: &str) -> Option<Option<i64>> {
    let body = token.strip_suffix('.').unwrap_or(token);
    let digits = strip_sign(body);
    if digits.is_empty() || !all_digits(digits) {
        return None;
    }
    Some(body.parse::<i64>().ok())
}

fn parse_float(token: &str) -> Option<f64> {
    let negative = token.starts_with('-');
    let body = strip_sign(token);

    if let Some(mantissa) = body.strip_suffix("e+INF") {
        return is_decimal(mantissa).then_some(if negative {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        });
    }
    if let Some(mantissa) = body.strip_suffix("e+NaN") {
        return is_decimal(mantissa).then_some(f64::NAN);
    }

    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(i) => (&body[..i], Some(&body[i + 1..])),
        None => (body, None),
    };
    let (whole, fraction) = match mantissa.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (mantissa, None),
    };
    if !all_digits(whole) || !fraction.map_or(true, all_digits) {
        return None;
    }
    let fraction_digits = fraction.map_or(0, str::len);
    if whole.is_empty() && fraction_digits == 0 {
        return None;
    }
    match exponent {
        Some(exp) => {
            let exp_digits = strip_sign(exp);
            if exp_digits.is_empty() || !all_digits(exp_digits) {
                return None;
            }
        }
        // Without an exponent a float needs fraction digits; `1.` is an integer.
        None if fraction_digits == 0 => return None,
        None => {}
    }
    token.parse::<f64>().ok()
}

fn is_decimal(mantissa: &str) -> bool {
    match mantissa.split_once('.') {
        Some((whole, fraction)) => {
            !whole.is_empty() && !fraction.is_empty() && all_digits(whole) && all_digits(fraction)
        }
        None => false,
    }
}
