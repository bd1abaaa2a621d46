//! Value Marshalling
//!
//! Converts script values into the host's literal syntax. Everything here is
//! pure: the engine wrapper first extracts a [`ScriptValue`] and this module
//! only ever sees that owned form.

use std::fmt::Write as _;

// ─────────────────────────────────────────────────────────────────────────────
// Host Literals
// ─────────────────────────────────────────────────────────────────────────────

/// The host's "void" value. Also stands in for NaN.
pub const NIL: &str = "nil";

/// The host's "nothing" value (an empty reply).
pub const NOTHING: &str = "";

pub const TRUE: &str = "true";
pub const FALSE: &str = "false";

/// Stand-ins for the infinities, which the host's number type cannot hold.
pub const INFINITY_POSITIVE: &str = "1e39";
pub const INFINITY_NEGATIVE: &str = "-1e39";

/// Reply used when the bridge itself (not the script) failed.
pub const SYSTEM_ERROR: &str = "scriptNull";

/// Message thrown when a reply does not fit the caller's buffer.
pub const OUT_OF_BOUNDS: &str = "[OOB]";

const QUOTE_DOUBLE: char = '"';
const QUOTE_SINGLE: char = '\'';

// ─────────────────────────────────────────────────────────────────────────────
// Script Value
// ─────────────────────────────────────────────────────────────────────────────

/// An engine value reduced to what the host can represent.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    /// `null` and `undefined`
    Nil,
    Bool(bool),
    Number(f64),
    /// Strings, and everything else after the engine's string conversion
    String(String),
    Array(Vec<ScriptValue>),
}

impl ScriptValue {
    /// Serialize into host literal text.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) {
        match self {
            ScriptValue::Nil => out.push_str(NIL),
            ScriptValue::Bool(true) => out.push_str(TRUE),
            ScriptValue::Bool(false) => out.push_str(FALSE),
            ScriptValue::Number(n) => out.push_str(&number_literal(*n)),
            ScriptValue::String(s) => out.push_str(&string_literal(s)),
            ScriptValue::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_to(out);
                }
                out.push(']');
            }
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Bool(value)
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        ScriptValue::Number(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::String(value.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        ScriptValue::String(value)
    }
}

impl<T: Into<ScriptValue>> From<Vec<T>> for ScriptValue {
    fn from(values: Vec<T>) -> Self {
        ScriptValue::Array(values.into_iter().map(Into::into).collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Literal Builders
// ─────────────────────────────────────────────────────────────────────────────

/// Build a quoted string literal.
///
/// The text is enclosed in whichever quote character it does not contain, so
/// most strings need no escaping at all. When both occur, the enclosure is the
/// opposite of the first quote found and enclosure quotes inside are doubled.
pub fn string_literal(text: &str) -> String {
    let Some(first) = text.find([QUOTE_DOUBLE, QUOTE_SINGLE]) else {
        return format!("{QUOTE_DOUBLE}{text}{QUOTE_DOUBLE}");
    };

    let enclosure = if !text.contains(QUOTE_DOUBLE) {
        QUOTE_DOUBLE
    } else if !text.contains(QUOTE_SINGLE) {
        QUOTE_SINGLE
    } else if text[first..].starts_with(QUOTE_DOUBLE) {
        QUOTE_SINGLE
    } else {
        QUOTE_DOUBLE
    };

    let mut out = String::with_capacity(text.len() + text.len() / 10 + 2);
    out.push(enclosure);
    for c in text.chars() {
        if c == enclosure {
            out.push(c);
        }
        out.push(c);
    }
    out.push(enclosure);
    out
}

/// Build a `throw "<message>"` statement.
pub fn throw_statement(message: &str) -> String {
    format!("throw {}", string_literal(message))
}

/// Render a number the way the engine's own string conversion does, with the
/// values the host cannot hold replaced by sentinels.
pub fn number_literal(n: f64) -> String {
    if n.is_nan() {
        return NIL.to_string();
    }
    if n.is_infinite() {
        let sentinel = if n > 0.0 {
            INFINITY_POSITIVE
        } else {
            INFINITY_NEGATIVE
        };
        return sentinel.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }

    // `{:e}` yields the shortest round-trip digits, e.g. "1.2345e3".
    let scientific = format!("{:e}", n.abs());
    let (mantissa, exponent) = scientific
        .split_once('e')
        .unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    let k = digits.len() as i32;
    let point = exponent + 1;

    let mut out = String::with_capacity(k as usize + 8);
    if n < 0.0 {
        out.push('-');
    }

    if k <= point && point <= 21 {
        out.push_str(&digits);
        out.extend(std::iter::repeat_n('0', (point - k) as usize));
    } else if 0 < point && point <= 21 {
        let (int_part, frac_part) = digits.split_at(point as usize);
        out.push_str(int_part);
        out.push('.');
        out.push_str(frac_part);
    } else if -6 < point && point <= 0 {
        out.push_str("0.");
        out.extend(std::iter::repeat_n('0', (-point) as usize));
        out.push_str(&digits);
    } else {
        let (lead, rest) = digits.split_at(1);
        out.push_str(lead);
        if !rest.is_empty() {
            out.push('.');
            out.push_str(rest);
        }
        let e = point - 1;
        let sign = if e < 0 { '-' } else { '+' };
        let _ = write!(out, "e{sign}{}", e.abs());
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_arrays_keep_order() {
        let value = ScriptValue::Array(vec![
            ScriptValue::Number(1.0),
            ScriptValue::from(vec![2.0, 3.0]),
            ScriptValue::from("a"),
        ]);
        assert_eq!(value.serialize(), r#"[1,[2,3],"a"]"#);
        assert_eq!(ScriptValue::Array(vec![]).serialize(), "[]");
    }

    #[test]
    fn test_special_numbers() {
        assert_eq!(ScriptValue::Number(f64::NAN).serialize(), "nil");
        assert_eq!(ScriptValue::Number(f64::INFINITY).serialize(), "1e39");
        assert_eq!(ScriptValue::Number(f64::NEG_INFINITY).serialize(), "-1e39");
    }

    #[test]
    fn test_number_text() {
        assert_eq!(number_literal(42.0), "42");
        assert_eq!(number_literal(-0.0), "0");
        assert_eq!(number_literal(0.1), "0.1");
        assert_eq!(number_literal(-1.5), "-1.5");
        assert_eq!(number_literal(123.456), "123.456");
        assert_eq!(number_literal(0.000001), "0.000001");
        assert_eq!(number_literal(1.5e-7), "1.5e-7");
        assert_eq!(number_literal(1e21), "1e+21");
        assert_eq!(number_literal(1.2345e22), "1.2345e+22");
        assert_eq!(number_literal(123456789012345680000.0), "123456789012345680000");
    }

    #[test]
    fn test_nil_bool() {
        assert_eq!(ScriptValue::Nil.serialize(), "nil");
        assert_eq!(ScriptValue::Bool(true).serialize(), "true");
        assert_eq!(ScriptValue::Bool(false).serialize(), "false");
    }

    #[test]
    fn test_string_quoting() {
        assert_eq!(string_literal("plain"), r#""plain""#);
        assert_eq!(string_literal(""), r#""""#);
        assert_eq!(string_literal("it's"), r#""it's""#);
        assert_eq!(string_literal(r#"say "hi""#), r#"'say "hi"'"#);
    }

    #[test]
    fn test_string_with_both_quotes_is_terminated() {
        // first quote is ' so the enclosure is " and inner " are doubled
        assert_eq!(string_literal(r#"it's "x""#), r#""it's ""x""""#);
        // first quote is " so the enclosure is ' and inner ' are doubled
        assert_eq!(string_literal(r#""a" b's"#), r#"'"a" b''s'"#);
    }

    #[test]
    fn test_throw_statement() {
        assert_eq!(throw_statement("[OOB]"), r#"throw "[OOB]""#);
        assert_eq!(throw_statement(r#"bad "x""#), r#"throw 'bad "x"'"#);
    }
}
