use crate::number;
use std::fmt;

/// Conversion kind of a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// `%d` / `%i` — integer; non-integral inputs round to nearest.
    Int,
    /// `%f` / `%F` — fixed-point, default precision 6.
    Fixed,
    /// `%e` / `%E` — scientific with a signed two-digit exponent.
    Scientific { upper: bool },
    /// `%g` / `%G` — shortest of fixed/scientific, trailing zeros stripped.
    General { upper: bool },
    /// `%s` — string passthrough.
    Str,
}

/// A parsed format code: literal prefix, one placeholder, literal suffix.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatCode {
    pub(crate) prefix: String,
    pub(crate) suffix: String,
    pub(crate) left_align: bool,
    pub(crate) zero_pad: bool,
    pub(crate) plus_sign: bool,
    pub(crate) space_sign: bool,
    pub(crate) width: Option<usize>,
    pub(crate) precision: Option<usize>,
    pub(crate) conversion: Conversion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The code contains no `%` placeholder at all.
    NoPlaceholder,
    /// More than one placeholder; a cell renders exactly one value.
    MultiplePlaceholders,
    UnsupportedConversion(char),
    /// The code ends in the middle of a placeholder (e.g. `"%."`).
    Truncated,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::NoPlaceholder => f.write_str("format code has no % placeholder"),
            ParseError::MultiplePlaceholders => {
                f.write_str("format code has more than one % placeholder")
            }
            ParseError::UnsupportedConversion(c) => {
                write!(f, "unsupported conversion character {c:?}")
            }
            ParseError::Truncated => f.write_str("format code ends inside a placeholder"),
        }
    }
}

impl std::error::Error for ParseError {}

impl FormatCode {
    pub fn parse(code: &str) -> Result<Self, ParseError> {
        let mut parsed: Option<FormatCode> = None;
        let mut literal = String::new();
        let mut chars = code.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            match chars.peek() {
                Some('%') => {
                    chars.next();
                    literal.push('%');
                    continue;
                }
                None => return Err(ParseError::Truncated),
                Some(_) => {}
            }
            if parsed.is_some() {
                return Err(ParseError::MultiplePlaceholders);
            }

            let mut spec = FormatCode {
                prefix: std::mem::take(&mut literal),
                suffix: String::new(),
                left_align: false,
                zero_pad: false,
                plus_sign: false,
                space_sign: false,
                width: None,
                precision: None,
                conversion: Conversion::Fixed,
            };

            while let Some(&flag) = chars.peek() {
                match flag {
                    '-' => spec.left_align = true,
                    '0' => spec.zero_pad = true,
                    '+' => spec.plus_sign = true,
                    ' ' => spec.space_sign = true,
                    _ => break,
                }
                chars.next();
            }

            spec.width = take_digits(&mut chars);

            if chars.peek() == Some(&'.') {
                chars.next();
                spec.precision = Some(take_digits(&mut chars).unwrap_or(0));
            }

            let conv = chars.next().ok_or(ParseError::Truncated)?;
            spec.conversion = match conv {
                'd' | 'i' => Conversion::Int,
                'f' | 'F' => Conversion::Fixed,
                'e' => Conversion::Scientific { upper: false },
                'E' => Conversion::Scientific { upper: true },
                'g' => Conversion::General { upper: false },
                'G' => Conversion::General { upper: true },
                's' => Conversion::Str,
                other => return Err(ParseError::UnsupportedConversion(other)),
            };

            parsed = Some(spec);
        }

        let mut spec = parsed.ok_or(ParseError::NoPlaceholder)?;
        spec.suffix = literal;
        Ok(spec)
    }

    pub fn conversion(&self) -> Conversion {
        self.conversion
    }

    /// Render a number against this code.
    pub fn render_number(&self, x: f64) -> String {
        let body = number::render(self, x);
        format!("{}{}{}", self.prefix, body, self.suffix)
    }

    /// Render text against this code (applies width/alignment only).
    pub fn render_text(&self, s: &str) -> String {
        let body = self.pad(s.to_string(), false);
        format!("{}{}{}", self.prefix, body, self.suffix)
    }

    /// Apply width padding. Zero padding only applies to numeric bodies and
    /// inserts after any leading sign.
    pub(crate) fn pad(&self, body: String, numeric: bool) -> String {
        let Some(width) = self.width else {
            return body;
        };
        if body.chars().count() >= width {
            return body;
        }
        let fill = width - body.chars().count();
        if self.left_align {
            let mut out = body;
            out.extend(std::iter::repeat(' ').take(fill));
            out
        } else if self.zero_pad && numeric {
            let (sign, digits) = match body.strip_prefix(['-', '+', ' ']) {
                Some(rest) => (&body[..1], rest),
                None => ("", body.as_str()),
            };
            let mut out = String::with_capacity(width);
            out.push_str(sign);
            out.extend(std::iter::repeat('0').take(fill));
            out.push_str(digits);
            out
        } else {
            let mut out = String::with_capacity(width);
            out.extend(std::iter::repeat(' ').take(fill));
            out.push_str(&body);
            out
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut value: Option<usize> = None;
    while let Some(c) = chars.peek() {
        let Some(d) = c.to_digit(10) else { break };
        value = Some(value.unwrap_or(0) * 10 + d as usize);
        chars.next();
    }
    value
}
