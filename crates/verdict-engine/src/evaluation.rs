//! The evaluation orchestrator.
//!
//! Drives the full pipeline over one experiment: materialize columns,
//! synthesize the optimal-auto baseline if requested, compute relative
//! columns against the baseline setting, evaluate filter groups, and
//! aggregate each group per setting. Produces the instance-wise table and
//! the aggregated table, and retains each group's filtered sub-table and
//! summary for later export.

use crate::columns::ColumnEvaluator;
use crate::error::EngineError;
use crate::filter::{FilterGroup, GroupEngine};
use crate::registry::DataKeyRegistry;
use crate::spec::{
    DefaultGroup, EvaluationSpec, SortLevel, OPT_AUTO_SETTING, PROBLEM_KEY, SOLVING_TIME_KEY,
    STATUS_KEY, TIME_LIMIT_KEY,
};
use crate::stream::Formatters;
use crate::table::{PivotSort, Table};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use verdict_format::FormatCode;
use verdict_model::{Experiment, Status, Value, ValueKey};

/// Outputs of one [`Evaluation::evaluate`] run.
#[derive(Debug)]
pub struct EvaluationResult {
    /// Instance-wise table, pivoted by the configured index split.
    pub instances: Table,
    /// Per-group, per-setting summary table.
    pub aggregated: Table,
    /// Locally recovered numeric conditions across the run.
    pub incidents: usize,
}

/// A validated evaluation, reusable across experiments.
///
/// Lifecycle: configure (the `set_*` family), then [`evaluate`] per
/// experiment. Each run replaces the retained per-group tables wholesale;
/// [`group_table`]/[`group_aggregate`] expose the last run's results.
///
/// [`evaluate`]: Evaluation::evaluate
/// [`group_table`]: Evaluation::group_table
/// [`group_aggregate`]: Evaluation::group_aggregate
#[derive(Debug)]
pub struct Evaluation {
    spec: EvaluationSpec,
    registry: DataKeyRegistry,
    group_tables: BTreeMap<String, Table>,
    group_aggregates: BTreeMap<String, Table>,
}

impl Evaluation {
    pub fn new(spec: EvaluationSpec) -> Result<Self, EngineError> {
        spec.validate()?;
        let registry = spec.registry()?;
        Ok(Self {
            spec,
            registry,
            group_tables: BTreeMap::new(),
            group_aggregates: BTreeMap::new(),
        })
    }

    pub fn from_xml(text: &str) -> Result<Self, EngineError> {
        Self::new(EvaluationSpec::from_xml(text)?)
    }

    pub fn spec(&self) -> &EvaluationSpec {
        &self.spec
    }

    pub fn registry(&self) -> &DataKeyRegistry {
        &self.registry
    }

    /// Replace the index levels of the instance-wise table.
    pub fn set_index(&mut self, levels: Vec<String>) {
        self.spec.index = levels;
        self.spec.index_split = self.spec.index_split.min(self.spec.index.len());
    }

    /// Index levels before `position` become rows, the rest pivot to
    /// column headers.
    pub fn set_index_split(&mut self, position: usize) {
        self.spec.index_split = position;
    }

    /// Override the comparison baseline.
    pub fn set_default_group(&mut self, default_group: DefaultGroup) {
        self.spec.default_group = default_group;
    }

    /// Override the format code of relative ("Q") columns.
    pub fn set_compare_format(&mut self, code: &str) -> Result<(), EngineError> {
        FormatCode::parse(code).map_err(|source| EngineError::BadFormatCode {
            code: code.to_string(),
            source,
        })?;
        self.spec.compare_format = code.to_string();
        Ok(())
    }

    /// The filter groups selected for output, in declaration order.
    pub fn active_filter_groups(&self) -> &[FilterGroup] {
        &self.spec.groups
    }

    /// The last run's filtered instance-wise sub-table of a group.
    pub fn group_table(&self, group: &str) -> Option<&Table> {
        self.group_tables.get(group)
    }

    /// The last run's per-setting summary of a group.
    pub fn group_aggregate(&self, group: &str) -> Option<&Table> {
        self.group_aggregates.get(group)
    }

    /// Run the pipeline over one experiment.
    pub fn evaluate(&mut self, experiment: &dyn Experiment) -> Result<EvaluationResult, EngineError> {
        if self.spec.index.is_empty() {
            return Err(EngineError::spec("the index needs at least one level"));
        }
        if self.spec.index_split > self.spec.index.len() {
            return Err(EngineError::BadIndexSplit {
                position: self.spec.index_split,
                levels: self.spec.index.len(),
            });
        }

        let base = self.build_base_table(experiment);
        debug!(rows = base.len(), "collected testrun table");

        // Index levels must exist as declared columns or raw keys; a
        // missing level fails here rather than silently reindexing.
        for level in &self.spec.index {
            if !self.registry.contains(level) && base.column_pos(level).is_none() {
                return Err(EngineError::MissingIndexColumn(level.clone()));
            }
        }

        let evaluator = ColumnEvaluator::new(&self.registry);
        let enriched = evaluator.enrich(&base, &self.wanted_columns())?;
        let mut incidents = enriched.incidents;
        let mut table = enriched.table;

        let baseline_setting = match &self.spec.default_group {
            DefaultGroup::Setting(name) => name.clone(),
            DefaultGroup::OptAuto { rel_tol, abs_tol } => {
                self.synthesize_opt_auto(&mut table, *rel_tol, *abs_tol);
                OPT_AUTO_SETTING.to_string()
            }
        };

        let value_columns = self.add_compare_columns(&mut table, &baseline_setting, &mut incidents);

        // Instance-wise output: rows x pivoted column headers.
        let row_levels = &self.spec.index[..self.spec.index_split];
        let col_levels = &self.spec.index[self.spec.index_split..];
        let sort = match self.spec.sort_level {
            SortLevel::Group => PivotSort::GroupMajor,
            SortLevel::Column => PivotSort::ColumnMajor,
        };
        let instances = table.pivot(row_levels, col_levels, &value_columns, sort)?;

        // Filter groups and their per-setting summaries. The retained
        // tables are replaced wholesale on every run.
        self.group_tables.clear();
        self.group_aggregates.clear();

        let mut engine = GroupEngine::new(&self.spec.filters, &self.spec.groups)?;
        let mut aggregated_parts: Vec<(String, Table)> = Vec::new();
        for group in &self.spec.groups {
            let members = engine.membership(&group.name, &table)?;
            let sub = table.select_rows(&members);
            let summary = self.aggregate_group(group, &sub, &baseline_setting);
            debug!(group = %group.name, rows = sub.len(), "filter group evaluated");
            self.group_tables.insert(group.name.clone(), sub);
            self.group_aggregates
                .insert(group.name.clone(), summary.clone());
            aggregated_parts.push((group.name.clone(), summary));
        }
        let aggregated = concat_group_summaries(&aggregated_parts);

        Ok(EvaluationResult {
            instances,
            aggregated,
            incidents,
        })
    }

    /// Formatters for rendering one of this evaluation's output tables.
    pub fn formatters(&self, table: &Table) -> Formatters {
        let mut formatters = Formatters::new(&self.spec.missing_rep);

        // Format codes per base label, Q labels via the compare format.
        let mut base_codes: BTreeMap<String, Option<String>> = BTreeMap::new();
        let mut compare_labels: BTreeSet<String> = BTreeSet::new();
        for column in &self.spec.columns {
            base_codes.insert(column.name.clone(), column.format.clone());
            if column.compare {
                compare_labels.insert(format!("{}Q", column.name));
            }
            for agg in &column.aggregations {
                base_codes.insert(agg.label(), agg.format.clone().or_else(|| column.format.clone()));
                compare_labels.insert(format!("{}Q", agg.label()));
            }
        }
        for group in &self.spec.groups {
            for agg in &group.aggregations {
                base_codes.insert(agg.label(), agg.format.clone());
                compare_labels.insert(format!("{}Q", agg.label()));
            }
        }

        for label in table.columns() {
            // Pivoted headers look like "Time(default)"; strip the key.
            let base = match label.split_once('(') {
                Some((prefix, _)) => prefix,
                None => label.as_str(),
            };
            let code = if compare_labels.contains(base) {
                Some(self.spec.compare_format.clone())
            } else {
                base_codes.get(base).cloned().flatten()
            };
            if let Some(code) = code {
                // Validated when the spec was built.
                if let Ok(parsed) = FormatCode::parse(&code) {
                    formatters.insert(label.clone(), parsed);
                }
            }
        }
        formatters
    }

    /// Raw testrun records as a table: identity columns first, then every
    /// collected raw key.
    fn build_base_table(&self, experiment: &dyn Experiment) -> Table {
        let identity = [PROBLEM_KEY, self.spec.group_key.as_str(), STATUS_KEY];
        let mut columns: Vec<String> = identity.iter().map(|s| s.to_string()).collect();
        let data_keys: Vec<String> = experiment
            .data_keys()
            .into_iter()
            .filter(|k| !identity.contains(&k.as_str()))
            .collect();
        columns.extend(data_keys.iter().cloned());

        let mut table = Table::new(columns);
        for record in experiment.data_table() {
            let mut row: Vec<Value> = Vec::with_capacity(3 + data_keys.len());
            row.push(Value::Text(record.problem.clone()));
            row.push(Value::Text(record.setting.clone()));
            row.push(Value::Text(record.status.as_str().to_string()));
            for key in &data_keys {
                row.push(record.value(key));
            }
            table.push_row(row);
        }
        table
    }

    /// Everything the run needs materialized: user columns, filter and
    /// aggregation inputs, index levels, and the bookkeeping keys.
    fn wanted_columns(&self) -> BTreeSet<String> {
        let mut wanted: BTreeSet<String> = BTreeSet::new();
        for column in &self.spec.columns {
            wanted.insert(column.name.clone());
        }
        for filter in &self.spec.filters {
            wanted.extend(filter.needed_columns().into_iter().map(str::to_string));
        }
        for group in &self.spec.groups {
            for agg in &group.aggregations {
                wanted.insert(agg.column.clone());
            }
        }
        wanted.extend(self.spec.index.iter().cloned());
        wanted.insert(PROBLEM_KEY.to_string());
        wanted.insert(self.spec.group_key.clone());
        wanted.insert(STATUS_KEY.to_string());
        wanted.insert(SOLVING_TIME_KEY.to_string());
        wanted.insert(TIME_LIMIT_KEY.to_string());
        wanted
    }

    /// Append one synthesized row per problem under the reserved
    /// optimal-auto setting: best status and minimal numbers over the rows
    /// within tolerance of the per-problem best time.
    fn synthesize_opt_auto(&self, table: &mut Table, rel_tol: f64, abs_tol: f64) {
        let mut problems: Vec<Value> = Vec::new();
        let mut rows_by_problem: BTreeMap<ValueKey, Vec<usize>> = BTreeMap::new();
        for row in 0..table.len() {
            let problem = table.value(row, PROBLEM_KEY).clone();
            let key = problem.key();
            if !rows_by_problem.contains_key(&key) {
                problems.push(problem.clone());
            }
            rows_by_problem.entry(key).or_default().push(row);
        }

        let columns: Vec<String> = table.columns().to_vec();
        let mut synthesized: Vec<Vec<Value>> = Vec::new();

        for problem in &problems {
            let rows = &rows_by_problem[&problem.key()];

            let times: Vec<Option<f64>> = rows
                .iter()
                .map(|&r| table.value(r, SOLVING_TIME_KEY).as_number())
                .collect();
            let best_time = times.iter().flatten().copied().fold(None, |acc, x| {
                Some(match acc {
                    None => x,
                    Some(best) => f64::min(best, x),
                })
            });

            // Rows within tolerance of the best time supply the data; with
            // no usable time anywhere, every row qualifies.
            let qualifying: Vec<usize> = match best_time {
                Some(best) => rows
                    .iter()
                    .zip(&times)
                    .filter(|(_, t)| {
                        matches!(t, Some(x) if *x <= best * (1.0 + rel_tol) + abs_tol)
                    })
                    .map(|(&r, _)| r)
                    .collect(),
                None => rows.clone(),
            };
            let chosen = *qualifying.first().unwrap_or(&rows[0]);

            let status = Status::best(
                qualifying
                    .iter()
                    .map(|&r| row_status(table, r)),
            );

            let time_limit = {
                let limits: Vec<f64> = rows
                    .iter()
                    .filter_map(|&r| table.value(r, TIME_LIMIT_KEY).as_number())
                    .collect();
                if limits.is_empty() {
                    Value::Missing
                } else {
                    Value::Number(limits.iter().sum::<f64>() / limits.len() as f64)
                }
            };

            let row: Vec<Value> = columns
                .iter()
                .map(|name| {
                    if name == PROBLEM_KEY {
                        problem.clone()
                    } else if *name == self.spec.group_key {
                        Value::Text(OPT_AUTO_SETTING.to_string())
                    } else if name == STATUS_KEY {
                        Value::Text(status.as_str().to_string())
                    } else if name == SOLVING_TIME_KEY {
                        best_time.map(Value::Number).unwrap_or(Value::Missing)
                    } else if name == TIME_LIMIT_KEY {
                        time_limit.clone()
                    } else {
                        // Numeric payloads take the minimum over qualifying
                        // rows; anything else comes from the first of them.
                        let minimum = qualifying
                            .iter()
                            .filter_map(|&r| table.value(r, name).as_number())
                            .fold(None, |acc: Option<f64>, x| {
                                Some(acc.map_or(x, |best| best.min(x)))
                            });
                        match minimum {
                            Some(x) => Value::Number(x),
                            None => table.value(chosen, name).clone(),
                        }
                    }
                })
                .collect();
            synthesized.push(row);
        }

        for row in synthesized {
            table.push_row(row);
        }
    }

    /// Append a `<name>Q` column for every compare-flagged column: the
    /// row's value divided by the baseline setting's value for the same
    /// problem. Returns the instance-wise value column order (each column
    /// followed by its relative column).
    fn add_compare_columns(
        &self,
        table: &mut Table,
        baseline_setting: &str,
        incidents: &mut usize,
    ) -> Vec<String> {
        let mut value_columns: Vec<String> = Vec::new();

        for column in &self.spec.columns {
            value_columns.push(column.name.clone());
            if !column.compare {
                continue;
            }

            // Baseline value per problem, from the baseline setting's rows.
            let mut baseline: BTreeMap<ValueKey, Value> = BTreeMap::new();
            for row in 0..table.len() {
                let setting = table.value(row, &self.spec.group_key);
                if setting.as_text() == Some(baseline_setting) {
                    baseline
                        .entry(table.value(row, PROBLEM_KEY).key())
                        .or_insert_with(|| table.value(row, &column.name).clone());
                }
            }

            let mut misses = 0usize;
            let mut values: Vec<Value> = Vec::with_capacity(table.len());
            for row in 0..table.len() {
                let value = table.value(row, &column.name);
                let problem = table.value(row, PROBLEM_KEY).key();
                let q = match baseline.get(&problem) {
                    None => {
                        misses += 1;
                        Value::Missing
                    }
                    Some(base) => divide(value, base, incidents),
                };
                values.push(q);
            }
            if misses > 0 {
                warn!(
                    column = %column.name,
                    baseline = %baseline_setting,
                    rows = misses,
                    "no baseline row for some problems; relative values are missing"
                );
            }

            let label = format!("{}Q", column.name);
            table.add_column(label.clone(), values);
            value_columns.push(label);
        }

        value_columns
    }

    /// One summary row per setting present in the group's sub-table:
    /// outcome tallies, the configured aggregates, and relative columns
    /// against the baseline setting's row.
    fn aggregate_group(&self, group: &FilterGroup, sub: &Table, baseline_setting: &str) -> Table {
        // Group-level aggregations override the column-level ones.
        let specs: Vec<crate::aggregate::AggregationSpec> = if group.aggregations.is_empty() {
            self.spec
                .columns
                .iter()
                .flat_map(|c| c.aggregations.iter().cloned())
                .collect()
        } else {
            group.aggregations.clone()
        };

        // Settings in sort-key order, independent of input order.
        let mut settings: Vec<Value> = Vec::new();
        let mut rows_by_setting: BTreeMap<ValueKey, Vec<usize>> = BTreeMap::new();
        for row in 0..sub.len() {
            let setting = sub.value(row, &self.spec.group_key).clone();
            rows_by_setting
                .entry(setting.key())
                .or_insert_with(|| {
                    settings.push(setting.clone());
                    Vec::new()
                })
                .push(row);
        }
        settings.sort_by_cached_key(Value::key);

        let mut columns: Vec<String> = vec![
            self.spec.group_key.clone(),
            "count".to_string(),
            "solved".to_string(),
            "timeout".to_string(),
            "fail".to_string(),
            "abort".to_string(),
            "unknown".to_string(),
        ];
        for spec in &specs {
            columns.push(spec.label());
        }
        for spec in &specs {
            columns.push(format!("{}Q", spec.label()));
        }

        let mut summary = Table::new(columns);
        let mut aggregate_rows: Vec<Vec<Value>> = Vec::new();
        for setting in &settings {
            let rows = &rows_by_setting[&setting.key()];
            let mut out: Vec<Value> = vec![setting.clone()];
            out.extend(self.tallies(sub, rows));
            for spec in &specs {
                let values: Vec<&Value> = rows.iter().map(|&r| sub.value(r, &spec.column)).collect();
                out.push(crate::aggregate::aggregate(
                    values.into_iter(),
                    spec.function,
                    spec.shift,
                ));
            }
            aggregate_rows.push(out);
        }

        // Relative part: divide by the baseline setting's row, falling back
        // to the first row when the baseline setting is absent from the
        // group.
        let baseline_row = aggregate_rows
            .iter()
            .position(|row| row[0].as_text() == Some(baseline_setting));
        if baseline_row.is_none() && !aggregate_rows.is_empty() {
            warn!(
                group = %group.name,
                baseline = %baseline_setting,
                "baseline setting not in group; comparing against the first setting"
            );
        }
        let baseline_values: Option<Vec<Value>> = baseline_row
            .or(if aggregate_rows.is_empty() { None } else { Some(0) })
            .map(|idx| aggregate_rows[idx].clone());

        let tally_count = 6;
        for mut row in aggregate_rows {
            let mut relatives: Vec<Value> = Vec::with_capacity(specs.len());
            for slot in 0..specs.len() {
                let idx = 1 + tally_count + slot;
                let q = match &baseline_values {
                    Some(base) => {
                        let mut scratch = 0usize;
                        divide(&row[idx], &base[idx], &mut scratch)
                    }
                    None => Value::Missing,
                };
                relatives.push(q);
            }
            row.extend(relatives);
            summary.push_row(row);
        }
        summary
    }

    /// Outcome tallies for one set of rows: count, solved, timeouts,
    /// fails, aborts, unknowns.
    fn tallies(&self, table: &Table, rows: &[usize]) -> Vec<Value> {
        let mut solved = 0i64;
        let mut timeout = 0i64;
        let mut fail = 0i64;
        let mut abort = 0i64;
        let mut unknown = 0i64;
        for &row in rows {
            let status = row_status(table, row);
            if status.is_time_limit() {
                timeout += 1;
            }
            if status.is_fail() {
                fail += 1;
            }
            if status.is_abort() {
                abort += 1;
            }
            if status.is_unknown() {
                unknown += 1;
            }

            let time = table.value(row, SOLVING_TIME_KEY).as_number();
            let limit = table.value(row, TIME_LIMIT_KEY).as_number();
            let is_solved = match (time, limit) {
                // The collector convention: finished within the limit and
                // not failed or aborted counts as solved.
                (Some(t), Some(l)) => t < l && !status.is_fail() && !status.is_abort(),
                _ => status == Status::Ok,
            };
            if is_solved {
                solved += 1;
            }
        }
        vec![
            Value::Int(rows.len() as i64),
            Value::Int(solved),
            Value::Int(timeout),
            Value::Int(fail),
            Value::Int(abort),
            Value::Int(unknown),
        ]
    }
}

fn row_status(table: &Table, row: usize) -> Status {
    match table.value(row, STATUS_KEY).as_text() {
        Some(text) => text.parse().unwrap_or(Status::Unknown),
        None => Status::Unknown,
    }
}

/// `lhs / rhs` with missing propagation; division by zero and non-finite
/// results recover as missing and count as incidents.
fn divide(lhs: &Value, rhs: &Value, incidents: &mut usize) -> Value {
    let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) else {
        return Value::Missing;
    };
    if b == 0.0 {
        *incidents += 1;
        return Value::Missing;
    }
    let q = a / b;
    if q.is_finite() {
        Value::Number(q)
    } else {
        *incidents += 1;
        Value::Missing
    }
}

/// Stack per-group summaries into one table with a leading group column.
/// Columns are the union over groups, in first-appearance order.
fn concat_group_summaries(parts: &[(String, Table)]) -> Table {
    let mut columns: Vec<String> = vec!["Group".to_string()];
    for (_, table) in parts {
        for column in table.columns() {
            if !columns.iter().any(|c| c == column) {
                columns.push(column.clone());
            }
        }
    }

    let mut out = Table::new(columns.clone());
    for (name, table) in parts {
        for row in 0..table.len() {
            let mut values: Vec<Value> = Vec::with_capacity(columns.len());
            values.push(Value::Text(name.clone()));
            for column in &columns[1..] {
                values.push(table.value(row, column).clone());
            }
            out.push_row(values);
        }
    }
    out
}
