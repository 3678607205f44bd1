//! Output sinks: render a table to a console listing, delimited text, or a
//! LaTeX tabular.
//!
//! The engine's job ends at producing well-formed tables with per-column
//! format codes; sinks are deliberately small renderers over any
//! [`io::Write`] destination.

use crate::table::Table;
use std::collections::BTreeMap;
use std::io::{self, Write};
use verdict_format::{Conversion, FormatCode};
use verdict_model::Value;

/// Per-column format codes plus the placeholder for missing values.
#[derive(Debug, Clone)]
pub struct Formatters {
    codes: BTreeMap<String, FormatCode>,
    missing_rep: String,
}

impl Formatters {
    pub fn new(missing_rep: impl Into<String>) -> Self {
        Self {
            codes: BTreeMap::new(),
            missing_rep: missing_rep.into(),
        }
    }

    pub fn insert(&mut self, column: impl Into<String>, code: FormatCode) {
        self.codes.insert(column.into(), code);
    }

    /// Render one cell of the named column.
    pub fn render(&self, column: &str, value: &Value) -> String {
        if value.is_missing() {
            return self.missing_rep.clone();
        }
        match self.codes.get(column) {
            None => value.to_string(),
            Some(code) => match (code.conversion(), value.as_number()) {
                (Conversion::Str, _) => code.render_text(&value.to_string()),
                (_, Some(x)) => code.render_number(x),
                // A numeric code over text renders the raw value.
                (_, None) => value.to_string(),
            },
        }
    }
}

/// Destination format for [`stream_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    /// Console listing with a `Data for <name>:` heading.
    Stdout,
    /// Comma-separated values with a header row.
    Csv,
    /// LaTeX tabular.
    Tex,
    /// Plain fixed-width text, no heading.
    Txt,
}

/// Render `table` into `out` in the sink's format.
pub fn stream_table(
    table: &Table,
    name: &str,
    sink: Sink,
    formatters: &Formatters,
    out: &mut dyn Write,
) -> io::Result<()> {
    match sink {
        Sink::Stdout => {
            writeln!(out, "Data for {name}:")?;
            write_fixed_width(table, formatters, out)
        }
        Sink::Txt => write_fixed_width(table, formatters, out),
        Sink::Csv => write_csv(table, formatters, out),
        Sink::Tex => write_tex(table, formatters, out),
    }
}

fn rendered_rows(table: &Table, formatters: &Formatters) -> Vec<Vec<String>> {
    table
        .rows()
        .map(|row| {
            table
                .columns()
                .iter()
                .zip(row)
                .map(|(column, value)| formatters.render(column, value))
                .collect()
        })
        .collect()
}

fn write_fixed_width(
    table: &Table,
    formatters: &Formatters,
    out: &mut dyn Write,
) -> io::Result<()> {
    let rows = rendered_rows(table, formatters);
    let mut widths: Vec<usize> = table.columns().iter().map(|c| c.chars().count()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    for (idx, column) in table.columns().iter().enumerate() {
        if idx > 0 {
            write!(out, "  ")?;
        }
        write!(out, "{column:>width$}", width = widths[idx])?;
    }
    writeln!(out)?;
    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            if idx > 0 {
                write!(out, "  ")?;
            }
            write!(out, "{cell:>width$}", width = widths[idx])?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn write_csv(table: &Table, formatters: &Formatters, out: &mut dyn Write) -> io::Result<()> {
    let header: Vec<String> = table.columns().iter().map(|c| csv_escape(c)).collect();
    writeln!(out, "{}", header.join(","))?;
    for row in rendered_rows(table, formatters) {
        let cells: Vec<String> = row.iter().map(|c| csv_escape(c)).collect();
        writeln!(out, "{}", cells.join(","))?;
    }
    Ok(())
}

fn csv_escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

fn write_tex(table: &Table, formatters: &Formatters, out: &mut dyn Write) -> io::Result<()> {
    let spec = "r".repeat(table.columns().len());
    writeln!(out, "\\begin{{tabular}}{{{spec}}}")?;
    let header: Vec<String> = table
        .columns()
        .iter()
        .map(|c| tex_escape(c))
        .collect();
    writeln!(out, "{} \\\\", header.join(" & "))?;
    writeln!(out, "\\hline")?;
    for row in rendered_rows(table, formatters) {
        let cells: Vec<String> = row.iter().map(|c| tex_escape(c)).collect();
        writeln!(out, "{} \\\\", cells.join(" & "))?;
    }
    writeln!(out, "\\end{{tabular}}")?;
    Ok(())
}

fn tex_escape(cell: &str) -> String {
    let mut escaped = String::with_capacity(cell.len());
    for c in cell.chars() {
        match c {
            '&' | '%' | '#' | '_' | '$' => {
                escaped.push('\\');
                escaped.push(c);
            }
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table() -> Table {
        let mut t = Table::new(vec!["Problem".into(), "Time".into()]);
        t.push_row(vec!["p_1".into(), Value::Number(1.5)]);
        t.push_row(vec!["p2".into(), Value::Missing]);
        t
    }

    fn formatters() -> Formatters {
        let mut f = Formatters::new("-");
        f.insert("Time", FormatCode::parse("%.2f").unwrap());
        f
    }

    fn render(sink: Sink) -> String {
        let mut out = Vec::new();
        stream_table(&table(), "sample", sink, &formatters(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn csv_renders_formatted_cells_and_placeholder() {
        assert_eq!(render(Sink::Csv), "Problem,Time\np_1,1.50\np2,-\n");
    }

    #[test]
    fn stdout_listing_is_aligned_and_titled() {
        let text = render(Sink::Stdout);
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Data for sample:"));
        assert_eq!(lines.next(), Some("Problem  Time"));
        assert_eq!(lines.next(), Some("    p_1  1.50"));
        assert_eq!(lines.next(), Some("     p2     -"));
    }

    #[test]
    fn tex_escapes_special_characters() {
        let text = render(Sink::Tex);
        assert!(text.starts_with("\\begin{tabular}{rr}"));
        assert!(text.contains("p\\_1 & 1.50 \\\\"));
        assert!(text.ends_with("\\end{tabular}\n"));
    }

    #[test]
    fn csv_quotes_cells_with_separators() {
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape("plain"), "plain");
    }

    #[test]
    fn unformatted_columns_use_display() {
        let f = formatters();
        assert_eq!(f.render("Problem", &Value::Text("p1".into())), "p1");
        assert_eq!(f.render("Time", &Value::Int(3)), "3.00");
        assert_eq!(f.render("Time", &Value::Missing), "-");
    }
}
