use crate::aggregate::AggregationSpec;
use crate::ast::{BinaryOp, Expr, Func, UnaryOp};
use crate::error::EngineError;
use crate::registry::DataKeyRegistry;
use crate::table::Table;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;
use verdict_model::Value;

/// How a column produces its value per instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnKind {
    /// Looked up from the raw testrun table under `source`.
    Raw { source: String },
    /// The same literal for every instance.
    Constant { value: Value },
    /// Computed from other columns, row-wise.
    Derived { expr: Expr },
}

/// Replacement for missing values, applied after the column is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MissingPolicy {
    Literal(Value),
    /// Take the value of another column on the same row.
    Column(String),
}

/// A named column definition with its rendering and aggregation attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
    /// printf code used when rendering this column.
    pub format: Option<String>,
    pub missing_as: Option<MissingPolicy>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    /// Emit a relative column (name + `Q`) against the baseline setting.
    pub compare: bool,
    pub aggregations: Vec<AggregationSpec>,
}

impl ColumnDef {
    pub fn raw(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(
            name,
            ColumnKind::Raw {
                source: source.into(),
            },
        )
    }

    pub fn constant(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(
            name,
            ColumnKind::Constant {
                value: value.into(),
            },
        )
    }

    pub fn derived(name: impl Into<String>, expr: Expr) -> Self {
        Self::new(name, ColumnKind::Derived { expr })
    }

    fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            format: None,
            missing_as: None,
            min_value: None,
            max_value: None,
            compare: false,
            aggregations: Vec::new(),
        }
    }

    pub fn with_format(mut self, code: impl Into<String>) -> Self {
        self.format = Some(code.into());
        self
    }

    pub fn with_compare(mut self) -> Self {
        self.compare = true;
        self
    }

    pub fn with_missing_as(mut self, policy: MissingPolicy) -> Self {
        self.missing_as = Some(policy);
        self
    }

    pub fn with_clamp(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    pub fn with_aggregation(mut self, agg: AggregationSpec) -> Self {
        self.aggregations.push(agg);
        self
    }

    /// Registry columns this definition reads from.
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps = BTreeSet::new();
        if let ColumnKind::Derived { expr } = &self.kind {
            expr.column_refs(&mut deps);
        }
        if let Some(MissingPolicy::Column(other)) = &self.missing_as {
            deps.insert(other.clone());
        }
        deps
    }
}

/// Result of materializing columns over a testrun table.
#[derive(Debug)]
pub struct Enriched {
    pub table: Table,
    /// Count of locally recovered numeric conditions (division by zero,
    /// log of a non-positive value, overflow). Recorded so callers can
    /// flag runs whose derived data is partially missing.
    pub incidents: usize,
}

/// Materializes registry columns over a raw table.
///
/// Works column-at-a-time in dependency order, which doubles as the
/// memoization: every (instance, column) pair is computed exactly once.
pub struct ColumnEvaluator<'a> {
    registry: &'a DataKeyRegistry,
}

impl<'a> ColumnEvaluator<'a> {
    pub fn new(registry: &'a DataKeyRegistry) -> Self {
        Self { registry }
    }

    /// Topological order over the derived columns reachable from `wanted`.
    ///
    /// Fails with the full cycle path before any row is touched.
    pub fn derived_order(&self, wanted: &BTreeSet<String>) -> Result<Vec<String>, EngineError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        let mut marks: AHashMap<String, Mark> = AHashMap::new();
        let mut order: Vec<String> = Vec::new();

        // Iterative DFS; (name, expanded) pairs on the explicit stack.
        for start in wanted {
            if marks.contains_key(start.as_str()) {
                continue;
            }
            let mut stack: Vec<(String, bool)> = vec![(start.clone(), false)];
            let mut path: Vec<String> = Vec::new();

            while let Some((name, expanded)) = stack.pop() {
                if expanded {
                    path.pop();
                    marks.insert(name.clone(), Mark::Done);
                    if matches!(
                        self.registry.get(&name).map(|d| &d.kind),
                        Some(ColumnKind::Derived { .. })
                    ) {
                        order.push(name);
                    }
                    continue;
                }
                match marks.get(name.as_str()) {
                    Some(Mark::Done) => continue,
                    Some(Mark::InProgress) => {
                        let cycle_start = path.iter().position(|p| *p == name).unwrap_or(0);
                        let mut cycle: Vec<String> = path[cycle_start..].to_vec();
                        cycle.push(name);
                        return Err(EngineError::CyclicDependency { path: cycle });
                    }
                    None => {}
                }
                marks.insert(name.clone(), Mark::InProgress);
                path.push(name.clone());
                stack.push((name.clone(), true));
                if let Some(def) = self.registry.get(&name) {
                    // Deterministic visit order keeps the reported cycle stable.
                    for dep in def.dependencies().into_iter().rev() {
                        stack.push((dep, false));
                    }
                }
            }
        }
        Ok(order)
    }

    /// Materialize every column in `wanted` (plus dependencies) over `base`.
    ///
    /// Base columns not described by the registry pass through unchanged;
    /// names unknown to both the registry and the base table fill with
    /// missing values (the raw key simply was not collected).
    pub fn enrich(&self, base: &Table, wanted: &BTreeSet<String>) -> Result<Enriched, EngineError> {
        let needed = self.closure(wanted);
        let order = self.derived_order(&needed)?;
        let rows = base.len();
        let mut incidents = 0usize;

        let mut materialized: AHashMap<String, Vec<Value>> = AHashMap::new();

        // Pass through base columns first (includes the identity columns).
        for name in &needed {
            if self.registry.contains(name) {
                continue;
            }
            let values = match base.column_pos(name) {
                Some(pos) => base.rows().map(|row| row[pos].clone()).collect(),
                None => {
                    warn!(column = %name, "column not present in the testrun data; filling with missing values");
                    vec![Value::Missing; rows]
                }
            };
            materialized.insert(name.clone(), values);
        }

        // Raw and constant registry columns have no intra-registry deps.
        for def in self.registry.iter() {
            if !needed.contains(&def.name) {
                continue;
            }
            let values = match &def.kind {
                ColumnKind::Raw { source } => match base.column_pos(source) {
                    Some(pos) => base.rows().map(|row| row[pos].clone()).collect(),
                    None => {
                        warn!(column = %def.name, source = %source, "raw source column not present; filling with missing values");
                        vec![Value::Missing; rows]
                    }
                },
                ColumnKind::Constant { value } => vec![value.clone(); rows],
                ColumnKind::Derived { .. } => continue,
            };
            let values = self.apply_policies(values, def, &materialized);
            materialized.insert(def.name.clone(), values);
        }

        // Derived columns in dependency order.
        for name in &order {
            let def = self.registry.resolve(name)?;
            let ColumnKind::Derived { expr } = &def.kind else {
                continue;
            };
            let mut values = Vec::with_capacity(rows);
            for row in 0..rows {
                let ctx = EvalCtx {
                    columns: &materialized,
                    row,
                };
                values.push(eval_expr(expr, &ctx, &mut incidents));
            }
            let values = self.apply_policies(values, def, &materialized);
            materialized.insert(def.name.clone(), values);
        }

        // Assemble in deterministic order: base passthrough columns in base
        // order, then registry columns in declaration order.
        let mut columns: Vec<String> = Vec::new();
        for name in base.columns() {
            if needed.contains(name) && !self.registry.contains(name) {
                columns.push(name.clone());
            }
        }
        for def in self.registry.iter() {
            if needed.contains(&def.name) {
                columns.push(def.name.clone());
            }
        }

        let mut table = Table::new(columns.clone());
        for row in 0..rows {
            let mut out = Vec::with_capacity(columns.len());
            for name in &columns {
                // Every assembled column was materialized above.
                let values = &materialized[name];
                out.push(values[row].clone());
            }
            table.push_row(out);
        }

        Ok(Enriched { table, incidents })
    }

    /// Expand `wanted` with the dependencies of every reachable definition.
    fn closure(&self, wanted: &BTreeSet<String>) -> BTreeSet<String> {
        let mut needed: BTreeSet<String> = BTreeSet::new();
        let mut queue: Vec<String> = wanted.iter().cloned().collect();
        while let Some(name) = queue.pop() {
            if !needed.insert(name.clone()) {
                continue;
            }
            if let Some(def) = self.registry.get(&name) {
                queue.extend(def.dependencies());
            }
        }
        needed
    }

    fn apply_policies(
        &self,
        mut values: Vec<Value>,
        def: &ColumnDef,
        materialized: &AHashMap<String, Vec<Value>>,
    ) -> Vec<Value> {
        if let Some(policy) = &def.missing_as {
            for (row, value) in values.iter_mut().enumerate() {
                if !value.is_missing() {
                    continue;
                }
                *value = match policy {
                    MissingPolicy::Literal(v) => v.clone(),
                    MissingPolicy::Column(other) => materialized
                        .get(other)
                        .map(|col| col[row].clone())
                        .unwrap_or(Value::Missing),
                };
            }
        }
        if def.min_value.is_some() || def.max_value.is_some() {
            for value in values.iter_mut() {
                let Some(mut x) = value.as_number() else {
                    continue;
                };
                if let Some(min) = def.min_value {
                    x = x.max(min);
                }
                if let Some(max) = def.max_value {
                    x = x.min(max);
                }
                *value = Value::Number(x);
            }
        }
        values
    }
}

struct EvalCtx<'t> {
    columns: &'t AHashMap<String, Vec<Value>>,
    row: usize,
}

impl EvalCtx<'_> {
    fn lookup(&self, name: &str) -> Value {
        self.columns
            .get(name)
            .map(|col| col[self.row].clone())
            .unwrap_or(Value::Missing)
    }
}

/// Evaluate one expression on one row.
///
/// Missing operands yield missing results; locally recovered numeric
/// conditions (division by zero, log of a non-positive value, overflow)
/// yield missing and bump the incident counter.
fn eval_expr(expr: &Expr, ctx: &EvalCtx<'_>, incidents: &mut usize) -> Value {
    match expr {
        Expr::Column(name) => ctx.lookup(name),
        Expr::Number(n) => Value::Number(*n),
        Expr::Bool(b) => Value::Bool(*b),
        Expr::Text(s) => Value::Text(s.clone()),
        Expr::Unary(op, inner) => {
            let value = eval_expr(inner, ctx, incidents);
            match op {
                UnaryOp::Neg => match value.as_number() {
                    Some(n) => Value::Number(-n),
                    None => Value::Missing,
                },
                UnaryOp::Not => match value.as_bool() {
                    Some(b) => Value::Bool(!b),
                    None => Value::Missing,
                },
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval_expr(lhs, ctx, incidents);
            let rhs = eval_expr(rhs, ctx, incidents);
            eval_binary(*op, &lhs, &rhs, incidents)
        }
        Expr::Call(func, args) => eval_call(*func, args, ctx, incidents),
    }
}

fn eval_binary(op: BinaryOp, lhs: &Value, rhs: &Value, incidents: &mut usize) -> Value {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) else {
                return Value::Missing;
            };
            if op == BinaryOp::Div && b == 0.0 {
                *incidents += 1;
                return Value::Missing;
            }
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => unreachable!(),
            };
            if result.is_finite() {
                Value::Number(result)
            } else {
                *incidents += 1;
                Value::Missing
            }
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            match lhs.loose_cmp(rhs) {
                Some(ordering) => {
                    let holds = match op {
                        BinaryOp::Lt => ordering.is_lt(),
                        BinaryOp::Le => ordering.is_le(),
                        BinaryOp::Gt => ordering.is_gt(),
                        BinaryOp::Ge => ordering.is_ge(),
                        _ => unreachable!(),
                    };
                    Value::Bool(holds)
                }
                None => Value::Missing,
            }
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            if lhs.is_missing() || rhs.is_missing() {
                return Value::Missing;
            }
            let eq = lhs.loose_eq(rhs);
            Value::Bool(if op == BinaryOp::Eq { eq } else { !eq })
        }
        BinaryOp::And | BinaryOp::Or => match (lhs.as_bool(), rhs.as_bool()) {
            (Some(a), Some(b)) => Value::Bool(if op == BinaryOp::And { a && b } else { a || b }),
            _ => Value::Missing,
        },
    }
}

fn eval_call(func: Func, args: &[Expr], ctx: &EvalCtx<'_>, incidents: &mut usize) -> Value {
    match func {
        Func::If => {
            let cond = eval_expr(&args[0], ctx, incidents);
            // Only the taken branch is evaluated, so the untaken branch
            // cannot record spurious numeric incidents.
            match cond.as_bool() {
                Some(true) => eval_expr(&args[1], ctx, incidents),
                Some(false) => eval_expr(&args[2], ctx, incidents),
                None => Value::Missing,
            }
        }
        Func::Log | Func::Log10 => {
            let value = eval_expr(&args[0], ctx, incidents);
            let Some(x) = value.as_number() else {
                return Value::Missing;
            };
            if x <= 0.0 {
                *incidents += 1;
                return Value::Missing;
            }
            let result = if func == Func::Log { x.ln() } else { x.log10() };
            Value::Number(result)
        }
        Func::Abs => {
            let value = eval_expr(&args[0], ctx, incidents);
            match value.as_number() {
                Some(x) => Value::Number(x.abs()),
                None => Value::Missing,
            }
        }
        Func::Min | Func::Max => {
            let mut acc: Option<f64> = None;
            for arg in args {
                let value = eval_expr(arg, ctx, incidents);
                let Some(x) = value.as_number() else {
                    return Value::Missing;
                };
                acc = Some(match acc {
                    None => x,
                    Some(best) => {
                        if func == Func::Min {
                            best.min(x)
                        } else {
                            best.max(x)
                        }
                    }
                });
            }
            match acc {
                Some(x) => Value::Number(x),
                None => Value::Missing,
            }
        }
    }
}
