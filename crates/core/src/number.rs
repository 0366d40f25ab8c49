//! Numbers
//!
//! The guest language has a single numeric kind stored as an `f64`.
//! "Is this an integer" is a derived predicate, not a separate tag: the value
//! has no fractional part and lies within the range where every integer is
//! exactly representable (`|v| <= 2^53`).
//!
//! ## Canonical text
//!
//! - integer-valued numbers render without a decimal point (`3`, `-12`)
//! - other finite numbers render in the shortest form that parses back to the
//!   same value (`0.5`, `1e-7`, `1.5e300`)
//! - specials render as `nan`, `inf`, `-inf`
//!
//! Every canonical rendering is accepted by [`parse_number`].

use crate::error::ValueError;
use std::fmt;
use std::str::FromStr;

/// Largest magnitude below which every integer is exactly representable (2^53)
pub const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A guest-language number
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
pub struct Number(f64);

impl Number {
    pub const ZERO: Number = Number(0.0);

    pub const fn new(value: f64) -> Self {
        Number(value)
    }

    /// The underlying double
    pub const fn value(self) -> f64 {
        self.0
    }

    /// True when the value has no fractional part and fits the exact integer range
    pub fn is_integer(self) -> bool {
        self.0.fract() == 0.0 && self.0.abs() <= MAX_EXACT_INTEGER
    }

    /// The integer value, if the integer predicate holds
    pub fn to_integer(self) -> Option<i64> {
        if self.is_integer() {
            Some(self.0 as i64)
        } else {
            None
        }
    }

    /// Integer-truncated form used by the integer formatting verbs
    ///
    /// Saturates at the `i64` bounds; NaN truncates to 0.
    pub fn truncate(self) -> i64 {
        self.0 as i64
    }

    pub fn is_nan(self) -> bool {
        self.0.is_nan()
    }
}

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        Number(value)
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number(value as f64)
    }
}

impl From<i32> for Number {
    fn from(value: i32) -> Self {
        Number(f64::from(value))
    }
}

impl From<u32> for Number {
    fn from(value: u32) -> Self {
        Number(f64::from(value))
    }
}

impl From<usize> for Number {
    fn from(value: usize) -> Self {
        Number(value as f64)
    }
}

impl From<Number> for f64 {
    fn from(n: Number) -> Self {
        n.0
    }
}

impl FromStr for Number {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_number(s)
    }
}

/// Render the canonical text of a double
pub(crate) fn canonical_text(value: f64) -> String {
    let n = Number(value);
    if n.is_integer() {
        return (value as i64).to_string();
    }
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    // Integral values beyond 2^53 and tiny magnitudes use exponent form
    if value.fract() == 0.0 || value.abs() < 1e-4 {
        format!("{:e}", value)
    } else {
        format!("{}", value)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&canonical_text(self.0))
    }
}

// Host-side formatting traits. Integer traits render the truncated value,
// exponent traits the full double, mirroring the verb table in `format`.

impl fmt::Binary for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Binary::fmt(&self.truncate(), f)
    }
}

impl fmt::Octal for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Octal::fmt(&self.truncate(), f)
    }
}

impl fmt::LowerHex for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.truncate(), f)
    }
}

impl fmt::UpperHex for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.truncate(), f)
    }
}

impl fmt::LowerExp for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerExp::fmt(&self.0, f)
    }
}

impl fmt::UpperExp for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperExp::fmt(&self.0, f)
    }
}

/// Parse a guest numeric literal
///
/// Accepts, after trimming surrounding whitespace and an optional sign:
/// - decimal integers and floats with optional fraction and exponent
///   (`42`, `3.`, `.5`, `1e-7`, `2.5E+3`)
/// - hexadecimal integers (`0xff`, `0X1A`)
/// - the special tokens `inf` and `nan` (case-insensitive)
///
/// Anything else fails with [`ValueError::NumberFormat`].
pub fn parse_number(text: &str) -> Result<Number, ValueError> {
    let malformed = || ValueError::NumberFormat(text.to_string());

    let trimmed = text.trim();
    let (negative, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let magnitude = if let Some(hex) = body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
    {
        parse_hex_digits(hex).ok_or_else(malformed)?
    } else if body.eq_ignore_ascii_case("inf") {
        f64::INFINITY
    } else if body.eq_ignore_ascii_case("nan") {
        f64::NAN
    } else if is_decimal_literal(body) {
        body.parse::<f64>().map_err(|_| malformed())?
    } else {
        return Err(malformed());
    };

    Ok(Number(if negative { -magnitude } else { magnitude }))
}

/// Hex integers beyond 2^53 lose precision the same way a float literal would
fn parse_hex_digits(digits: &str) -> Option<f64> {
    if digits.is_empty() {
        return None;
    }
    digits
        .chars()
        .try_fold(0.0f64, |acc, c| c.to_digit(16).map(|d| acc * 16.0 + f64::from(d)))
}

/// `digits [. digits] [(e|E) [+|-] digits]` with at least one mantissa digit
fn is_decimal_literal(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut mantissa_digits = 0;

    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        mantissa_digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            mantissa_digits += 1;
        }
    }
    if mantissa_digits == 0 {
        return false;
    }

    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        i += 1;
        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            i += 1;
        }
        let exponent_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exponent_start {
            return false;
        }
    }

    i == bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_integer_predicate() {
        assert!(Number::new(3.0).is_integer());
        assert!(Number::new(-0.0).is_integer());
        assert!(Number::new(MAX_EXACT_INTEGER).is_integer());
        assert!(!Number::new(MAX_EXACT_INTEGER * 2.0).is_integer());
        assert!(!Number::new(0.5).is_integer());
        assert!(!Number::new(f64::NAN).is_integer());
        assert!(!Number::new(f64::INFINITY).is_integer());
    }

    #[test]
    fn test_canonical_text() {
        assert_eq!(Number::new(3.0).to_string(), "3");
        assert_eq!(Number::new(-12.0).to_string(), "-12");
        assert_eq!(Number::new(-0.0).to_string(), "0");
        assert_eq!(Number::new(0.5).to_string(), "0.5");
        assert_eq!(Number::new(0.1 + 0.2).to_string(), "0.30000000000000004");
        assert_eq!(Number::new(1.5e-7).to_string(), "1.5e-7");
        assert_eq!(Number::new(1e300).to_string(), "1e300");
        assert_eq!(Number::new(f64::NAN).to_string(), "nan");
        assert_eq!(Number::new(f64::INFINITY).to_string(), "inf");
        assert_eq!(Number::new(f64::NEG_INFINITY).to_string(), "-inf");
    }

    #[test]
    fn test_display_honours_width() {
        assert_eq!(format!("{:>5}", Number::new(42.0)), "   42");
        assert_eq!(format!("{:<5}|", Number::new(1.5)), "1.5  |");
    }

    #[test]
    fn test_parse_decimal_forms() {
        assert_eq!(parse_number("42"), Ok(Number::new(42.0)));
        assert_eq!(parse_number("  -7  "), Ok(Number::new(-7.0)));
        assert_eq!(parse_number("3."), Ok(Number::new(3.0)));
        assert_eq!(parse_number(".5"), Ok(Number::new(0.5)));
        assert_eq!(parse_number("2.5E+3"), Ok(Number::new(2500.0)));
        assert_eq!(parse_number("1e-2"), Ok(Number::new(0.01)));
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_number("0xff"), Ok(Number::new(255.0)));
        assert_eq!(parse_number("0X1A"), Ok(Number::new(26.0)));
        assert_eq!(parse_number("-0x10"), Ok(Number::new(-16.0)));
    }

    #[test]
    fn test_parse_specials() {
        assert_eq!(parse_number("inf"), Ok(Number::new(f64::INFINITY)));
        assert_eq!(parse_number("-INF"), Ok(Number::new(f64::NEG_INFINITY)));
        assert!(parse_number("nan").unwrap().is_nan());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in ["", "abc", "1e", "0x", "0xg", ".", "1.2.3", "--1", "12abc", "e5", "infinity"] {
            assert_eq!(
                parse_number(text),
                Err(ValueError::NumberFormat(text.to_string())),
                "expected '{}' to be rejected",
                text
            );
        }
    }

    #[test]
    fn test_truncate_and_to_integer() {
        assert_eq!(Number::new(3.9).truncate(), 3);
        assert_eq!(Number::new(-3.9).truncate(), -3);
        assert_eq!(Number::new(f64::NAN).truncate(), 0);
        assert_eq!(Number::new(7.0).to_integer(), Some(7));
        assert_eq!(Number::new(7.5).to_integer(), None);
    }

    #[test]
    fn test_host_format_traits() {
        assert_eq!(format!("{:x}", Number::new(255.9)), "ff");
        assert_eq!(format!("{:#X}", Number::new(255.0)), "0xFF");
        assert_eq!(format!("{:b}", Number::new(5.0)), "101");
        assert_eq!(format!("{:o}", Number::new(8.0)), "10");
        assert_eq!(format!("{:e}", Number::new(1500.0)), "1.5e3");
    }

    proptest! {
        #[test]
        fn prop_canonical_text_round_trips(
            v in proptest::num::f64::NORMAL
                | proptest::num::f64::SUBNORMAL
                | proptest::num::f64::ZERO
                | proptest::num::f64::INFINITE
        ) {
            let n = Number::new(v);
            let parsed = parse_number(&n.to_string()).unwrap();
            prop_assert_eq!(parsed, n);
        }

        #[test]
        fn prop_integer_text_parses_as_integer(i in -(1i64 << 53)..=(1i64 << 53)) {
            let n = Number::from(i);
            let text = n.to_string();
            prop_assert!(!text.contains('.'));
            let parsed = parse_number(&text).unwrap();
            prop_assert!(parsed.is_integer());
            prop_assert_eq!(parsed.to_integer(), Some(i));
        }
    }
}
