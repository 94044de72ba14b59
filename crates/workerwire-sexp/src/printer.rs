//! Canonical printed representation.
//!
//! Every value prints to text that [`crate::read_str`] reads back as an
//! equal value (NaN aside, which never compares equal).

use std::fmt::{self, Write};

use crate::reader::is_numeric_token;
use crate::value::Value;

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write_float(f, *x),
            Value::Str(s) => write_string(f, s),
            Value::Symbol(name) => write_symbol(f, name),
            Value::List(items) => write_sequence(f, '(', ')', items),
            Value::Vector(items) => write_sequence(f, '[', ']', items),
        }
    }
}

fn write_float(f: &mut fmt::Formatter<'_>, x: f64) -> fmt::Result {
    if x.is_nan() {
        f.write_str("0.0e+NaN")
    } else if x.is_infinite() {
        f.write_str(if x > 0.0 { "1.0e+INF" } else { "-1.0e+INF" })
    } else {
        // Debug is the shortest round-trip form and always carries `.` or `e`.
        write!(f, "{x:?}")
    }
}

fn write_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        if matches!(c, '"' | '\\') {
            f.write_char('\\')?;
        }
        f.write_char(c)?;
    }
    f.write_char('"')
}

fn needs_escape(c: char, first: bool) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '(' | ')' | '[' | ']' | '"' | ';' | '\'' | '`' | ',' | '\\'
        )
        || (first && matches!(c, '#' | '?'))
}

fn write_symbol(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if name.is_empty() {
        return f.write_str("##");
    }
    if name == "." || is_numeric_token(name) {
        f.write_char('\\')?;
    }
    for (i, c) in name.chars().enumerate() {
        if needs_escape(c, i == 0) {
            f.write_char('\\')?;
        }
        f.write_char(c)?;
    }
    Ok(())
}

fn write_sequence(f: &mut fmt::Formatter<'_>, open: char, close: char, items: &[Value]) -> fmt::Result {
    f.write_char(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_char(' ')?;
        }
        write!(f, "{item}")?;
    }
    f.write_char(close)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::reader::read_str;

    fn printed(value: &Value) -> String {
        value.to_string()
    }

    #[test]
    fn prints_atoms() {
        assert_eq!(printed(&Value::Int(-12)), "-12");
        assert_eq!(printed(&Value::Float(1.0)), "1.0");
        assert_eq!(printed(&Value::Float(1e20)), "1e20");
        assert_eq!(printed(&Value::Float(f64::INFINITY)), "1.0e+INF");
        assert_eq!(printed(&Value::Float(f64::NAN)), "0.0e+NaN");
        assert_eq!(printed(&Value::string("say \"hi\"\\")), r#""say \"hi\"\\""#);
        assert_eq!(printed(&Value::symbol("foo-bar")), "foo-bar");
    }

    #[test]
    fn prints_sequences() {
        let value = Value::list([
            1.into(),
            Value::Vector(vec![Value::symbol("a"), "b".into()]),
            Value::nil(),
        ]);
        assert_eq!(printed(&value), r#"(1 [a "b"] ())"#);
    }

    #[test]
    fn escapes_awkward_symbols() {
        assert_eq!(printed(&Value::symbol("")), "##");
        assert_eq!(printed(&Value::symbol("12")), "\\12");
        assert_eq!(printed(&Value::symbol("1.5")), "\\1.5");
        assert_eq!(printed(&Value::symbol(".")), "\\.");
        assert_eq!(printed(&Value::symbol("a b")), "a\\ b");
        assert_eq!(printed(&Value::symbol("#x")), "\\#x");
        assert_eq!(printed(&Value::symbol("x#")), "x#");
        assert_eq!(printed(&Value::symbol("?q")), "\\?q");
    }

    #[test]
    fn awkward_symbols_read_back() {
        for name in ["", "12", "1.5", ".", "a b", "#x", "?q", "(paren)", "semi;colon", "1.0e+INF"] {
            let value = Value::symbol(name);
            assert_eq!(read_str(&printed(&value)).unwrap(), value, "{name:?}");
        }
    }

    #[test]
    fn non_finite_floats_read_back() {
        for x in [f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(read_str(&printed(&Value::Float(x))).unwrap(), Value::Float(x));
        }
        let nan = read_str(&printed(&Value::Float(f64::NAN))).unwrap();
        assert!(matches!(nan, Value::Float(x) if x.is_nan()));
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            any::<i64>().prop_map(Value::Int),
            any::<f64>()
                .prop_filter("NaN never compares equal", |x| !x.is_nan())
                .prop_map(Value::Float),
            any::<String>().prop_map(Value::Str),
            any::<String>().prop_map(Value::Symbol),
        ];
        leaf.prop_recursive(4, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::List),
                prop::collection::vec(inner, 0..6).prop_map(Value::Vector),
            ]
        })
    }

    proptest! {
        #[test]
        fn printed_values_read_back(value in arb_value()) {
            let text = printed(&value);
            prop_assert_eq!(read_str(&text).unwrap(), value);
        }
    }
}
