//! Verb-dispatched formatting of values
//!
//! A [`FormatSpec`] is one printf-style directive (`%-08.3x`): flags,
//! optional width, optional precision and a verb. [`format_value`] renders a
//! single value under a spec; [`sprintf`] expands a whole template.
//!
//! Numeric verbs coerce strings through `parse_number` first. A string that
//! does not parse, and any non-numeric kind, is rendered as its plain text so
//! that formatting never fails on operand kind alone.

use crate::error::ValueError;
use crate::number::{Number, parse_number};
use crate::value::Value;
use std::str::FromStr;

/// Directive flags (`-`, `+`, space, `0`, `#`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub left: bool,
    pub plus: bool,
    pub space: bool,
    pub zero: bool,
    pub alt: bool,
}

/// One formatting directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatSpec {
    pub flags: Flags,
    pub width: Option<usize>,
    pub precision: Option<usize>,
    pub verb: char,
}

const VERBS: &str = "dibcoxXUeEfFgGsqv";

impl FormatSpec {
    /// Bare directive with no flags, width or precision
    pub fn new(verb: char) -> Self {
        FormatSpec {
            flags: Flags::default(),
            width: None,
            precision: None,
            verb,
        }
    }

    /// Parse a directive; the leading `%` is optional
    pub fn parse(text: &str) -> Result<Self, ValueError> {
        let text = text.strip_prefix('%').unwrap_or(text);
        let mut chars = text.chars().peekable();
        let mut flags = Flags::default();

        while let Some(&c) = chars.peek() {
            match c {
                '-' => flags.left = true,
                '+' => flags.plus = true,
                ' ' => flags.space = true,
                '0' => flags.zero = true,
                '#' => flags.alt = true,
                _ => break,
            }
            chars.next();
        }

        let width = take_digits(&mut chars);
        let precision = if chars.peek() == Some(&'.') {
            chars.next();
            Some(take_digits(&mut chars).unwrap_or(0))
        } else {
            None
        };

        let verb = chars.next().ok_or(ValueError::UnknownVerb('%'))?;
        if !VERBS.contains(verb) {
            return Err(ValueError::UnknownVerb(verb));
        }
        if let Some(extra) = chars.next() {
            return Err(ValueError::UnknownVerb(extra));
        }

        Ok(FormatSpec {
            flags,
            width,
            precision,
            verb,
        })
    }

    fn is_integer_verb(&self) -> bool {
        matches!(self.verb, 'd' | 'i' | 'b' | 'o' | 'x' | 'X' | 'c' | 'U')
    }

    fn is_float_verb(&self) -> bool {
        matches!(self.verb, 'e' | 'E' | 'f' | 'F' | 'g' | 'G')
    }
}

impl FromStr for FormatSpec {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FormatSpec::parse(s)
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut value: Option<usize> = None;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        value = Some(value.unwrap_or(0).saturating_mul(10).saturating_add(d as usize));
        chars.next();
    }
    value
}

/// Render one value under a directive
pub fn format_value(spec: &FormatSpec, value: &Value) -> Result<String, ValueError> {
    if spec.is_integer_verb() || spec.is_float_verb() {
        let operand = match value {
            Value::Number(n) => Some(*n),
            Value::String(s) => parse_number(s).ok(),
            _ => None,
        };
        return Ok(match operand {
            Some(n) if spec.is_integer_verb() => format_integer(spec, n),
            Some(n) => format_float(spec, n),
            None => pad(spec, "", &value.describe(), false),
        });
    }

    match spec.verb {
        's' => {
            let text = value.describe();
            let text = match spec.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            };
            Ok(pad(spec, "", &text, false))
        }
        'q' => {
            let text = match value {
                Value::String(s) => quote(s),
                other => other.describe(),
            };
            Ok(pad(spec, "", &text, false))
        }
        'v' => Ok(pad(spec, "", &value.describe(), false)),
        other => Err(ValueError::UnknownVerb(other)),
    }
}

/// Expand every `%` directive of `template` against `args` in order
///
/// `%%` produces a literal percent sign. Running out of arguments is an
/// error naming the missing argument position.
pub fn sprintf(template: &str, args: &[Value]) -> Result<String, ValueError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut next_arg = 0;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let directive = &rest[pos + 1..];
        if let Some(after) = directive.strip_prefix('%') {
            out.push('%');
            rest = after;
            continue;
        }

        let end = directive
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, c)| i + c.len_utf8())
            .ok_or(ValueError::UnknownVerb('%'))?;
        let spec = FormatSpec::parse(&directive[..end])?;
        let arg = args.get(next_arg).ok_or_else(|| {
            ValueError::raise(format!(
                "bad argument #{} to 'format' (no value)",
                next_arg + 1
            ))
        })?;
        out.push_str(&format_value(&spec, arg)?);
        next_arg += 1;
        rest = &directive[end..];
    }
    out.push_str(rest);
    Ok(out)
}

fn sign_prefix(spec: &FormatSpec, negative: bool) -> &'static str {
    if negative {
        "-"
    } else if spec.flags.plus {
        "+"
    } else if spec.flags.space {
        " "
    } else {
        ""
    }
}

fn format_integer(spec: &FormatSpec, n: Number) -> String {
    let v = n.value();
    if !v.is_finite() {
        return pad(spec, "", &n.to_string(), false);
    }
    let truncated = n.truncate();
    let negative = truncated < 0;
    let magnitude = truncated.unsigned_abs();

    match spec.verb {
        'c' => {
            let c = u32::try_from(truncated)
                .ok()
                .and_then(char::from_u32)
                .unwrap_or(char::REPLACEMENT_CHARACTER);
            return pad(spec, "", &c.to_string(), false);
        }
        'U' => {
            let sign = if negative { "-" } else { "" };
            return pad(spec, sign, &format!("U+{:04X}", magnitude), false);
        }
        _ => {}
    }

    let (radix_prefix, digits) = match spec.verb {
        'b' => ("0b", format!("{:b}", magnitude)),
        'o' => ("0", format!("{:o}", magnitude)),
        'x' => ("0x", format!("{:x}", magnitude)),
        'X' => ("0X", format!("{:X}", magnitude)),
        _ => ("", magnitude.to_string()),
    };
    let digits = match spec.precision {
        Some(p) if digits.len() < p => format!("{}{}", "0".repeat(p - digits.len()), digits),
        _ => digits,
    };

    let mut prefix = sign_prefix(spec, negative).to_string();
    if spec.flags.alt && !(spec.verb == 'o' && digits.starts_with('0')) {
        prefix.push_str(radix_prefix);
    }
    pad(spec, &prefix, &digits, spec.precision.is_none())
}

fn format_float(spec: &FormatSpec, n: Number) -> String {
    let v = n.value();
    let upper = spec.verb.is_ascii_uppercase();
    let negative = v.is_sign_negative() && !n.is_nan() && v != 0.0;
    let prefix = sign_prefix(spec, negative);

    if !v.is_finite() {
        let text = if n.is_nan() { "nan" } else { "inf" };
        let text = if upper { text.to_uppercase() } else { text.to_string() };
        return pad(spec, prefix, &text, false);
    }

    let magnitude = v.abs();
    let body = match (spec.verb, spec.precision) {
        ('e' | 'E', precision) => c_exponent(magnitude, precision.unwrap_or(6), upper),
        ('f' | 'F', precision) => format!("{:.*}", precision.unwrap_or(6), magnitude),
        (_, None) => {
            let text = Number::new(magnitude).to_string();
            if upper { text.to_uppercase() } else { text }
        }
        (_, Some(precision)) => c_general(magnitude, precision, upper, spec.flags.alt),
    };
    pad(spec, prefix, &body, true)
}

/// C-style exponent form: at least two exponent digits, explicit sign
fn c_exponent(v: f64, precision: usize, upper: bool) -> String {
    let text = format!("{:.*e}", precision, v);
    let (mantissa, exponent) = text.split_once('e').unwrap_or((&text, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    format!(
        "{}{}{}{:02}",
        mantissa,
        if upper { 'E' } else { 'e' },
        if exponent < 0 { '-' } else { '+' },
        exponent.abs()
    )
}

/// C `%g`: shortest of fixed and exponent form at `precision` significant digits
fn c_general(v: f64, precision: usize, upper: bool, alt: bool) -> String {
    let p = precision.max(1);
    let probe = format!("{:.*e}", p - 1, v);
    let exponent: i64 = probe
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);

    let text = if exponent >= -4 && exponent < p as i64 {
        format!("{:.*}", (p as i64 - 1 - exponent) as usize, v)
    } else {
        c_exponent(v, p - 1, upper)
    };
    if alt {
        return text;
    }

    let marker = if upper { 'E' } else { 'e' };
    match text.split_once(marker) {
        Some((mantissa, exponent)) => {
            format!("{}{}{}", strip_fraction_zeros(mantissa), marker, exponent)
        }
        None => strip_fraction_zeros(&text).to_string(),
    }
}

fn strip_fraction_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Apply width; `zero_ok` allows zero fill between prefix and body
fn pad(spec: &FormatSpec, prefix: &str, body: &str, zero_ok: bool) -> String {
    let len = prefix.chars().count() + body.chars().count();
    let width = spec.width.unwrap_or(0);
    if len >= width {
        return format!("{}{}", prefix, body);
    }
    let fill = width - len;
    if spec.flags.left {
        format!("{}{}{}", prefix, body, " ".repeat(fill))
    } else if spec.flags.zero && zero_ok {
        format!("{}{}{}", prefix, "0".repeat(fill), body)
    } else {
        format!("{}{}{}", " ".repeat(fill), prefix, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;

    fn fmt(spec: &str, value: impl Into<Value>) -> String {
        format_value(&FormatSpec::parse(spec).unwrap(), &value.into()).unwrap()
    }

    #[test]
    fn test_parse_spec() {
        let spec = FormatSpec::parse("%-08.3x").unwrap();
        assert!(spec.flags.left);
        assert!(spec.flags.zero);
        assert_eq!(spec.width, Some(8));
        assert_eq!(spec.precision, Some(3));
        assert_eq!(spec.verb, 'x');

        let bare: FormatSpec = "d".parse().unwrap();
        assert_eq!(bare, FormatSpec::new('d'));
    }

    #[test]
    fn test_parse_rejects_unknown_verb() {
        assert_eq!(FormatSpec::parse("%y"), Err(ValueError::UnknownVerb('y')));
        assert_eq!(FormatSpec::parse("%5"), Err(ValueError::UnknownVerb('%')));
        assert_eq!(FormatSpec::parse("%dd"), Err(ValueError::UnknownVerb('d')));
    }

    #[test]
    fn test_integer_verbs() {
        assert_eq!(fmt("d", 42), "42");
        assert_eq!(fmt("d", 3.9), "3");
        assert_eq!(fmt("d", -3.9), "-3");
        assert_eq!(fmt("+d", 5), "+5");
        assert_eq!(fmt("05d", -42), "-0042");
        assert_eq!(fmt("-5d", 42), "42   ");
        assert_eq!(fmt("b", 5), "101");
        assert_eq!(fmt("o", 8), "10");
        assert_eq!(fmt("#o", 8), "010");
        assert_eq!(fmt("x", 255), "ff");
        assert_eq!(fmt("#X", 255), "0XFF");
        assert_eq!(fmt("#x", -255), "-0xff");
        assert_eq!(fmt(".4d", 7), "0007");
    }

    #[test]
    fn test_char_and_code_point() {
        assert_eq!(fmt("c", 65), "A");
        assert_eq!(fmt("c", -1), "\u{FFFD}");
        assert_eq!(fmt("U", 0x1F600), "U+1F600");
        assert_eq!(fmt("U", 65), "U+0041");
    }

    #[test]
    fn test_float_verbs() {
        assert_eq!(fmt("f", 3.14159), "3.141590");
        assert_eq!(fmt(".2f", 3.14159), "3.14");
        assert_eq!(fmt("e", 1500), "1.500000e+03");
        assert_eq!(fmt(".2E", 0.000123), "1.23E-04");
        assert_eq!(fmt("g", 0.5), "0.5");
        assert_eq!(fmt("g", 1e20), "1e20");
        assert_eq!(fmt(".3g", 1234.5), "1.23e+03");
        assert_eq!(fmt(".3g", 0.0001234), "0.000123");
        assert_eq!(fmt(".4g", 2.5), "2.5");
        assert_eq!(fmt("#.4g", 2.5), "2.500");
        assert_eq!(fmt("08.2f", -1.5), "-0001.50");
        assert_eq!(fmt("f", f64::INFINITY), "inf");
        assert_eq!(fmt("F", f64::NEG_INFINITY), "-INF");
    }

    #[test]
    fn test_numeric_verb_on_string() {
        assert_eq!(fmt("d", "0x10"), "16");
        assert_eq!(fmt(".1f", " 2.26 "), "2.3");
        assert_eq!(fmt("d", "hello"), "hello");
        assert_eq!(fmt("5x", "zz"), "   zz");
    }

    #[test]
    fn test_numeric_verb_on_other_kinds() {
        assert_eq!(fmt("d", Value::TRUE), "true");
        assert_eq!(fmt("d", Value::Nil), "nil");
        let t = Table::new();
        assert!(fmt("d", t).starts_with("table: 0x"));
    }

    #[test]
    fn test_text_verbs() {
        assert_eq!(fmt("s", "hello"), "hello");
        assert_eq!(fmt(".3s", "hello"), "hel");
        assert_eq!(fmt("7s", "hi"), "     hi");
        assert_eq!(fmt("-4s", "ab"), "ab  ");
        assert_eq!(fmt("s", 1.5), "1.5");
        assert_eq!(fmt("q", "a\"b\n"), "\"a\\\"b\\n\"");
        assert_eq!(fmt("q", 7), "7");
        assert_eq!(fmt("v", 2.0), "2");
        assert_eq!(fmt("v", Value::Nil), "nil");
    }

    #[test]
    fn test_sprintf() {
        let out = sprintf(
            "%s has %d items (%.1f%%)",
            &[Value::from("cart"), Value::from(3), Value::from(42.3)],
        )
        .unwrap();
        assert_eq!(out, "cart has 3 items (42.3%)");

        let err = sprintf("%d and %d", &[Value::from(1)]).unwrap_err();
        assert_eq!(err.to_string(), "bad argument #2 to 'format' (no value)");
        assert_eq!(
            sprintf("%z", &[Value::from(1)]),
            Err(ValueError::UnknownVerb('z'))
        );
    }
}
