#![forbid(unsafe_code)]

//! printf-style numeric format codes.
//!
//! Evaluation files attach C/printf format strings (`"%.3f"`, `"%8.2f"`,
//! `"%d"`, `"%.2e"`, `"%g"`, optionally with literal text around the
//! placeholder, e.g. `"%.1f s"`) to columns and aggregations. This crate
//! parses such a code once into a [`FormatCode`] and renders values against
//! it without any per-cell re-parsing.
//!
//! Only a single placeholder per code is supported — a table cell holds one
//! value. `%%` escapes a literal percent sign.

mod number;
mod parse;

pub use parse::{Conversion, FormatCode, ParseError};
