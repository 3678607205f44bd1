use crate::error::EngineError;
use ahash::AHashMap;
use verdict_model::{Value, ValueKey};

/// A rectangular, column-ordered table of [`Value`]s.
///
/// Row order is significant and preserved by every operation except the
/// explicitly sorting ones; all iteration is deterministic.
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    by_name: AHashMap<String, usize>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        let mut by_name = AHashMap::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            let previous = by_name.insert(name.clone(), idx);
            debug_assert!(previous.is_none(), "duplicate table column {name:?}");
        }
        Self {
            columns,
            rows: Vec::new(),
            by_name,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_pos(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn row(&self, index: usize) -> &[Value] {
        &self.rows[index]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Value]> {
        self.rows.iter().map(|r| r.as_slice())
    }

    /// Cell lookup by row index and column name; unknown columns read as
    /// missing, like absent raw keys on a record.
    pub fn value(&self, row: usize, column: &str) -> &Value {
        static MISSING: Value = Value::Missing;
        match self.column_pos(column) {
            Some(col) => &self.rows[row][col],
            None => &MISSING,
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        debug_assert_eq!(row.len(), self.columns.len(), "row arity mismatch");
        self.rows.push(row);
    }

    /// Append a fully materialized column. The values must cover every row.
    pub fn add_column(&mut self, name: impl Into<String>, values: Vec<Value>) {
        let name = name.into();
        debug_assert_eq!(values.len(), self.rows.len(), "column length mismatch");
        debug_assert!(
            !self.by_name.contains_key(&name),
            "duplicate table column {name:?}"
        );
        self.by_name.insert(name.clone(), self.columns.len());
        self.columns.push(name);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
    }

    /// Sub-table of the given rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Table {
        let mut out = Table::new(self.columns.clone());
        for &idx in indices {
            out.push_row(self.rows[idx].clone());
        }
        out
    }

    /// Stable-sort rows by the sort keys of the given columns.
    ///
    /// Fails with [`EngineError::MissingIndexColumn`] if a column is absent.
    pub fn sort_rows_by(&mut self, columns: &[String]) -> Result<(), EngineError> {
        let positions = self.column_positions(columns)?;
        self.rows.sort_by_cached_key(|row| {
            positions
                .iter()
                .map(|&pos| row[pos].key())
                .collect::<Vec<ValueKey>>()
        });
        Ok(())
    }

    fn column_positions(&self, columns: &[String]) -> Result<Vec<usize>, EngineError> {
        columns
            .iter()
            .map(|name| {
                self.column_pos(name)
                    .ok_or_else(|| EngineError::MissingIndexColumn(name.clone()))
            })
            .collect()
    }

    /// Pivot into a wide table: one output row per distinct `row_levels`
    /// key, one output column per (distinct `col_levels` key x value
    /// column), labeled `value(colkey)`.
    ///
    /// Output rows sort by row key, output columns by pivot key order under
    /// `sort`: group-major keeps all columns of one col-key together,
    /// column-major keeps all col-keys of one value column together. The
    /// first row wins when two input rows share a (row key, col key) cell.
    pub fn pivot(
        &self,
        row_levels: &[String],
        col_levels: &[String],
        value_columns: &[String],
        sort: PivotSort,
    ) -> Result<Table, EngineError> {
        let row_positions = self.column_positions(row_levels)?;
        let col_positions = self.column_positions(col_levels)?;
        let value_positions = self.column_positions(value_columns)?;

        // Distinct row/column keys in sort-key order.
        let mut row_keys: Vec<(Vec<ValueKey>, Vec<Value>)> = Vec::new();
        let mut col_keys: Vec<(Vec<ValueKey>, String)> = Vec::new();
        let mut cells: AHashMap<(Vec<ValueKey>, Vec<ValueKey>, usize), Value> = AHashMap::new();

        for row in &self.rows {
            let row_key: Vec<ValueKey> = row_positions.iter().map(|&p| row[p].key()).collect();
            let col_key: Vec<ValueKey> = col_positions.iter().map(|&p| row[p].key()).collect();

            if !row_keys.iter().any(|(key, _)| *key == row_key) {
                let display = row_positions.iter().map(|&p| row[p].clone()).collect();
                row_keys.push((row_key.clone(), display));
            }
            if !col_keys.iter().any(|(key, _)| *key == col_key) {
                let display = col_positions
                    .iter()
                    .map(|&p| row[p].to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                col_keys.push((col_key.clone(), display));
            }

            for (slot, &p) in value_positions.iter().enumerate() {
                cells
                    .entry((row_key.clone(), col_key.clone(), slot))
                    .or_insert_with(|| row[p].clone());
            }
        }

        row_keys.sort_by(|a, b| a.0.cmp(&b.0));
        col_keys.sort_by(|a, b| a.0.cmp(&b.0));

        let mut columns: Vec<String> = row_levels.to_vec();
        // (col key slot, value slot) in header order.
        let mut layout: Vec<(usize, usize)> = Vec::new();
        match sort {
            PivotSort::GroupMajor => {
                for (ck, _) in col_keys.iter().enumerate() {
                    for slot in 0..value_columns.len() {
                        layout.push((ck, slot));
                    }
                }
            }
            PivotSort::ColumnMajor => {
                for slot in 0..value_columns.len() {
                    for (ck, _) in col_keys.iter().enumerate() {
                        layout.push((ck, slot));
                    }
                }
            }
        }
        for &(ck, slot) in &layout {
            if col_levels.is_empty() {
                columns.push(value_columns[slot].clone());
            } else {
                columns.push(format!("{}({})", value_columns[slot], col_keys[ck].1));
            }
        }

        let mut out = Table::new(columns);
        for (row_key, display) in &row_keys {
            let mut row: Vec<Value> = display.clone();
            for &(ck, slot) in &layout {
                let cell = cells
                    .get(&(row_key.clone(), col_keys[ck].0.clone(), slot))
                    .cloned()
                    .unwrap_or(Value::Missing);
                row.push(cell);
            }
            out.push_row(row);
        }
        Ok(out)
    }
}

/// Header ordering for [`Table::pivot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotSort {
    /// All value columns of one pivot key adjacent (`Time(a) Nodes(a) Time(b) ...`).
    GroupMajor,
    /// All pivot keys of one value column adjacent (`Time(a) Time(b) Nodes(a) ...`).
    ColumnMajor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Table {
        let mut t = Table::new(vec![
            "Problem".into(),
            "Settings".into(),
            "Time".into(),
            "Nodes".into(),
        ]);
        t.push_row(vec![
            "p2".into(),
            "default".into(),
            Value::Number(1.0),
            Value::Int(10),
        ]);
        t.push_row(vec![
            "p1".into(),
            "default".into(),
            Value::Number(2.0),
            Value::Int(20),
        ]);
        t.push_row(vec![
            "p1".into(),
            "fast".into(),
            Value::Number(0.5),
            Value::Int(5),
        ]);
        t
    }

    #[test]
    fn select_rows_preserves_requested_order() {
        let t = sample();
        let sub = t.select_rows(&[2, 0]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.value(0, "Settings"), &Value::Text("fast".into()));
        assert_eq!(sub.value(1, "Problem"), &Value::Text("p2".into()));
    }

    #[test]
    fn pivot_group_major() {
        let t = sample();
        let wide = t
            .pivot(
                &["Problem".into()],
                &["Settings".into()],
                &["Time".into(), "Nodes".into()],
                PivotSort::GroupMajor,
            )
            .unwrap();
        assert_eq!(
            wide.columns(),
            &[
                "Problem",
                "Time(default)",
                "Nodes(default)",
                "Time(fast)",
                "Nodes(fast)"
            ]
        );
        // Rows sort by key: p1 before p2.
        assert_eq!(wide.value(0, "Problem"), &Value::Text("p1".into()));
        assert_eq!(wide.value(0, "Time(fast)"), &Value::Number(0.5));
        // p2 never ran under "fast": missing cell.
        assert_eq!(wide.value(1, "Time(fast)"), &Value::Missing);
    }

    #[test]
    fn pivot_column_major() {
        let t = sample();
        let wide = t
            .pivot(
                &["Problem".into()],
                &["Settings".into()],
                &["Time".into(), "Nodes".into()],
                PivotSort::ColumnMajor,
            )
            .unwrap();
        assert_eq!(
            wide.columns(),
            &[
                "Problem",
                "Time(default)",
                "Time(fast)",
                "Nodes(default)",
                "Nodes(fast)"
            ]
        );
    }

    #[test]
    fn pivot_rejects_missing_index_column() {
        let t = sample();
        let err = t
            .pivot(
                &["Instance".into()],
                &["Settings".into()],
                &["Time".into()],
                PivotSort::GroupMajor,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingIndexColumn(name) if name == "Instance"));
    }
}
