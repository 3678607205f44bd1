use crate::parse::{Conversion, FormatCode};

/// Render the placeholder body (no literal prefix/suffix) for a number.
pub(crate) fn render(code: &FormatCode, x: f64) -> String {
    if !x.is_finite() {
        let body = if x.is_nan() {
            "nan".to_string()
        } else if x > 0.0 {
            "inf".to_string()
        } else {
            "-inf".to_string()
        };
        return code.pad(body, false);
    }

    let body = match code.conversion {
        Conversion::Int => {
            let rounded = x.round();
            with_sign(code, rounded < 0.0, format!("{}", rounded.abs() as i64))
        }
        Conversion::Fixed => {
            let precision = code.precision.unwrap_or(6);
            let formatted = format!("{:.*}", precision, x.abs());
            // -0.4 at precision 0 renders "0", not "-0".
            let negative = x < 0.0 && formatted.bytes().any(|b| (b'1'..=b'9').contains(&b));
            with_sign(code, negative, formatted)
        }
        Conversion::Scientific { upper } => {
            let precision = code.precision.unwrap_or(6);
            let formatted = scientific(x.abs(), precision, upper);
            with_sign(code, x < 0.0, formatted)
        }
        Conversion::General { upper } => {
            let formatted = general(x.abs(), code.precision.unwrap_or(6).max(1), upper);
            let negative = x < 0.0 && formatted != "0";
            with_sign(code, negative, formatted)
        }
        Conversion::Str => format!("{x}"),
    };

    code.pad(body, true)
}

fn with_sign(code: &FormatCode, negative: bool, unsigned: String) -> String {
    if negative {
        format!("-{unsigned}")
    } else if code.plus_sign {
        format!("+{unsigned}")
    } else if code.space_sign {
        format!(" {unsigned}")
    } else {
        unsigned
    }
}

/// `d.dddde+XX` with a signed exponent of at least two digits (C semantics;
/// Rust's `{:e}` writes `1.5e2`).
fn scientific(x: f64, precision: usize, upper: bool) -> String {
    let rust = format!("{:.*e}", precision, x);
    let (mantissa, exp) = match rust.split_once('e') {
        Some(parts) => parts,
        // `{:e}` always emits an exponent; keep the raw digits if not.
        None => (rust.as_str(), "0"),
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    let e = if upper { 'E' } else { 'e' };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}{e}{sign}{:02}", exp.abs())
}

/// C `%g`: `p` significant digits, fixed or scientific by exponent, trailing
/// zeros stripped.
fn general(x: f64, p: usize, upper: bool) -> String {
    if x == 0.0 {
        return "0".to_string();
    }

    // Round to p significant digits first; the exponent that picks the
    // representation is the exponent *after* rounding (9.99e2 at p=2 is 1e+03).
    let rounded = format!("{:.*e}", p - 1, x);
    let (_, exp) = rounded.split_once('e').unwrap_or((rounded.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp >= -4 && exp < p as i32 {
        let precision = (p as i32 - 1 - exp).max(0) as usize;
        strip_trailing_zeros(format!("{:.*}", precision, x))
    } else {
        let mantissa_full = scientific(x, p - 1, upper);
        let e = if upper { 'E' } else { 'e' };
        match mantissa_full.split_once(e) {
            Some((mantissa, exp_part)) => {
                format!("{}{e}{exp_part}", strip_trailing_zeros(mantissa.to_string()))
            }
            None => mantissa_full,
        }
    }
}

fn strip_trailing_zeros(s: String) -> String {
    if !s.contains('.') {
        return s;
    }
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}
