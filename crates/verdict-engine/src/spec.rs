//! The declarative evaluation specification and its XML form.
//!
//! A spec document is parsed once, validated eagerly (unknown references,
//! duplicate keys, dependency cycles, malformed format codes all fail here,
//! before any data is touched), and then applied to any number of
//! experiments.
//!
//! ```xml
//! <Evaluation groupkey="Settings" defaultgroup="default" index="Problem Settings">
//!   <Column name="Time" origcolname="SolvingTime" format="%.1f" compare="true">
//!     <Aggregation function="shmean" shift="10" format="%.1f"/>
//!   </Column>
//!   <Column name="Speed" expr="Nodes / Time"/>
//!   <Filter name="hard" column="Time" operator="ge" value="10"/>
//!   <FilterGroup name="hard">
//!     <FilterRef name="hard"/>
//!   </FilterGroup>
//! </Evaluation>
//! ```

use crate::aggregate::{AggFunction, AggregationSpec};
use crate::columns::{ColumnDef, ColumnKind, MissingPolicy};
use crate::error::EngineError;
use crate::filter::{Filter, FilterGroup, FilterOp, GroupEngine, GroupJoin, GroupMember, Operand};
use crate::parser::parse_expr;
use crate::registry::DataKeyRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use verdict_format::FormatCode;
use verdict_model::Value;

/// Baseline designation for relative ("Q") columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultGroup {
    /// A literal setting name, e.g. `"default"`.
    Setting(String),
    /// Synthesize a per-instance virtual best setting and compare against
    /// it. A row counts as optimal when
    /// `time <= best_time * (1 + rel_tol) + abs_tol` for its instance.
    OptAuto { rel_tol: f64, abs_tol: f64 },
}

/// Which pivot level orders the instance-wise table's column headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortLevel {
    Group,
    Column,
}

pub const DEFAULT_GROUP_KEY: &str = "Settings";
pub const DEFAULT_DEFAULT_GROUP: &str = "default";
pub const DEFAULT_COMPARE_FORMAT: &str = "%.3f";
pub const DEFAULT_MISSING_REP: &str = "-";
/// Setting name carried by synthesized optimal-auto rows.
pub const OPT_AUTO_SETTING: &str = "OPT. AUTO";
/// Identity column holding the problem name.
pub const PROBLEM_KEY: &str = "Problem";
/// Raw keys consulted by the outcome tallies and optimal-auto synthesis.
pub const STATUS_KEY: &str = "Status";
pub const SOLVING_TIME_KEY: &str = "SolvingTime";
pub const TIME_LIMIT_KEY: &str = "TimeLimit";

/// Root of the declarative evaluation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSpec {
    /// Column that names the solver setting; pivots to column headers.
    pub group_key: String,
    pub default_group: DefaultGroup,
    /// printf code for relative ("Q") columns.
    pub compare_format: String,
    /// Placeholder rendered for missing values.
    pub missing_rep: String,
    /// Multi-level row key of the instance-wise table.
    pub index: Vec<String>,
    /// Index levels before the split become rows, the rest pivot to
    /// column headers.
    pub index_split: usize,
    pub sort_level: SortLevel,
    pub columns: Vec<ColumnDef>,
    pub filters: Vec<Filter>,
    pub groups: Vec<FilterGroup>,
}

impl Default for EvaluationSpec {
    fn default() -> Self {
        Self::new(DEFAULT_GROUP_KEY)
    }
}

impl EvaluationSpec {
    pub fn new(group_key: impl Into<String>) -> Self {
        let group_key = group_key.into();
        Self {
            index: vec![PROBLEM_KEY.to_string(), group_key.clone()],
            group_key,
            default_group: DefaultGroup::Setting(DEFAULT_DEFAULT_GROUP.to_string()),
            compare_format: DEFAULT_COMPARE_FORMAT.to_string(),
            missing_rep: DEFAULT_MISSING_REP.to_string(),
            index_split: 1,
            sort_level: SortLevel::Group,
            columns: Vec::new(),
            filters: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_group(mut self, group: FilterGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Build the data-key registry from the declared columns.
    pub fn registry(&self) -> Result<DataKeyRegistry, EngineError> {
        let mut registry = DataKeyRegistry::new();
        for column in &self.columns {
            registry.register(column.clone(), false)?;
        }
        Ok(registry)
    }

    /// Eager validation; every fatal condition surfaces here, before any
    /// experiment data is read.
    pub fn validate(&self) -> Result<(), EngineError> {
        let registry = self.registry()?;

        // Derived-column cycles.
        let all: BTreeSet<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        crate::columns::ColumnEvaluator::new(&registry).derived_order(&all)?;

        // Filter/group references, group cycles, regex patterns.
        GroupEngine::new(&self.filters, &self.groups)?;

        // Format codes.
        parse_format(&self.compare_format)?;
        for column in &self.columns {
            if let Some(code) = &column.format {
                parse_format(code)?;
            }
            for agg in &column.aggregations {
                if !registry.contains(&agg.column) {
                    return Err(EngineError::UnknownKey(agg.column.clone()));
                }
                if let Some(code) = &agg.format {
                    parse_format(code)?;
                }
                check_shift(agg)?;
            }
        }
        for group in &self.groups {
            for agg in &group.aggregations {
                if !registry.contains(&agg.column) {
                    return Err(EngineError::UnknownKey(agg.column.clone()));
                }
                if let Some(code) = &agg.format {
                    parse_format(code)?;
                }
                check_shift(agg)?;
            }
        }

        // Index shape.
        if self.index.is_empty() {
            return Err(EngineError::spec("the index needs at least one level"));
        }
        if self.index_split > self.index.len() {
            return Err(EngineError::BadIndexSplit {
                position: self.index_split,
                levels: self.index.len(),
            });
        }

        if let DefaultGroup::OptAuto { rel_tol, abs_tol } = &self.default_group {
            if *rel_tol < 0.0 || *abs_tol < 0.0 {
                return Err(EngineError::spec(
                    "optimal-auto tolerances must be non-negative",
                ));
            }
        }

        Ok(())
    }

    pub fn from_xml(text: &str) -> Result<Self, EngineError> {
        let doc = roxmltree::Document::parse(text)
            .map_err(|e| EngineError::spec(format!("not well-formed XML: {e}")))?;
        let root = doc.root_element();
        if root.tag_name().name() != "Evaluation" {
            return Err(EngineError::spec(format!(
                "expected an <Evaluation> root, found <{}>",
                root.tag_name().name()
            )));
        }

        let group_key = root
            .attribute("groupkey")
            .unwrap_or(DEFAULT_GROUP_KEY)
            .to_string();
        let mut spec = EvaluationSpec::new(group_key);

        if let Some(name) = root.attribute("defaultgroup") {
            spec.default_group = DefaultGroup::Setting(name.to_string());
        }
        if let Some(tols) = root.attribute("optauto") {
            spec.default_group = parse_opt_auto(tols)?;
        }
        if let Some(code) = root.attribute("comparecolformat") {
            spec.compare_format = code.to_string();
        }
        if let Some(rep) = root.attribute("missingrep") {
            spec.missing_rep = rep.to_string();
        }
        if let Some(index) = root.attribute("index") {
            spec.index = index.split_whitespace().map(str::to_string).collect();
            // Default split: the last level pivots to column headers.
            spec.index_split = spec.index.len().saturating_sub(1).max(1);
        }
        if let Some(split) = root.attribute("indexsplit") {
            spec.index_split = split.parse().map_err(|_| {
                EngineError::spec(format!("indexsplit is not a number: {split:?}"))
            })?;
        }
        if let Some(level) = root.attribute("sortlevel") {
            spec.sort_level = match level {
                "group" | "0" => SortLevel::Group,
                "column" | "1" => SortLevel::Column,
                other => {
                    return Err(EngineError::spec(format!(
                        "sortlevel must be \"group\" or \"column\", found {other:?}"
                    )))
                }
            };
        }

        for child in root.children().filter(|n| n.is_element()) {
            match child.tag_name().name() {
                "Column" => {
                    let column = parse_column(&child)?;
                    spec.columns.push(column);
                }
                "Filter" => {
                    let filter = parse_filter(&child)?;
                    spec.filters.push(filter);
                }
                "FilterGroup" => {
                    let group = parse_group(&child, &mut spec.filters)?;
                    spec.groups.push(group);
                }
                other => {
                    return Err(EngineError::spec(format!(
                        "unexpected element <{other}> under <Evaluation>"
                    )))
                }
            }
        }

        spec.validate()?;
        Ok(spec)
    }
}

fn parse_format(code: &str) -> Result<FormatCode, EngineError> {
    FormatCode::parse(code).map_err(|source| EngineError::BadFormatCode {
        code: code.to_string(),
        source,
    })
}

fn check_shift(agg: &AggregationSpec) -> Result<(), EngineError> {
    if agg.function == AggFunction::ShiftedGeoMean && agg.shift <= 0.0 {
        return Err(EngineError::spec(format!(
            "shifted geometric mean over {:?} needs a positive shift, found {}",
            agg.column, agg.shift
        )));
    }
    Ok(())
}

fn parse_opt_auto(tols: &str) -> Result<DefaultGroup, EngineError> {
    let parts: Vec<&str> = tols.split_whitespace().collect();
    let [rel, abs] = parts.as_slice() else {
        return Err(EngineError::spec(format!(
            "optauto needs two tolerances (relative absolute), found {tols:?}"
        )));
    };
    let rel_tol: f64 = rel
        .parse()
        .map_err(|_| EngineError::spec(format!("optauto relative tolerance is not a number: {rel:?}")))?;
    let abs_tol: f64 = abs
        .parse()
        .map_err(|_| EngineError::spec(format!("optauto absolute tolerance is not a number: {abs:?}")))?;
    Ok(DefaultGroup::OptAuto { rel_tol, abs_tol })
}

fn parse_column(node: &roxmltree::Node<'_, '_>) -> Result<ColumnDef, EngineError> {
    let origcolname = node.attribute("origcolname");
    let name = node
        .attribute("name")
        .or(origcolname)
        .ok_or_else(|| EngineError::spec("<Column> needs a name or origcolname attribute"))?
        .to_string();

    let kind = match (origcolname, node.attribute("expr"), node.attribute("constant")) {
        (Some(source), None, None) => ColumnKind::Raw {
            source: source.to_string(),
        },
        (None, Some(expr), None) => {
            let expr = parse_expr(expr).map_err(|e| EngineError::BadExpression {
                column: name.clone(),
                message: e.to_string(),
            })?;
            ColumnKind::Derived { expr }
        }
        (None, None, Some(constant)) => ColumnKind::Constant {
            value: Value::parse_literal(constant)
                .unwrap_or_else(|| Value::Text(constant.to_string())),
        },
        _ => {
            return Err(EngineError::spec(format!(
                "column {name:?} needs exactly one of origcolname, expr, or constant"
            )))
        }
    };

    let mut column = ColumnDef {
        name: name.clone(),
        kind,
        format: node.attribute("format").map(str::to_string),
        missing_as: None,
        min_value: parse_opt_number(node, "minval")?,
        max_value: parse_opt_number(node, "maxval")?,
        compare: parse_flag(node, "compare")?,
        aggregations: Vec::new(),
    };

    if let Some(nanrep) = node.attribute("nanrep") {
        column.missing_as = Some(match Value::parse_literal(nanrep) {
            Some(value) => MissingPolicy::Literal(value),
            None => MissingPolicy::Column(nanrep.to_string()),
        });
    }

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "Aggregation" => {
                let agg = parse_aggregation(&child, Some(&name))?;
                column.aggregations.push(agg);
            }
            other => {
                return Err(EngineError::spec(format!(
                    "unexpected element <{other}> under column {name:?}"
                )))
            }
        }
    }

    Ok(column)
}

fn parse_aggregation(
    node: &roxmltree::Node<'_, '_>,
    column: Option<&str>,
) -> Result<AggregationSpec, EngineError> {
    let column = match node.attribute("column").or(column) {
        Some(c) => c.to_string(),
        None => {
            return Err(EngineError::spec(
                "<Aggregation> outside a column needs a column attribute",
            ))
        }
    };
    let function_name = node
        .attribute("function")
        .ok_or_else(|| EngineError::spec(format!("aggregation of {column:?} needs a function")))?;
    let function = AggFunction::from_name(function_name).ok_or_else(|| {
        EngineError::spec(format!(
            "unknown aggregation function {function_name:?} for column {column:?}"
        ))
    })?;

    let mut agg = AggregationSpec::new(column.clone(), function);
    if let Some(shift) = node.attribute("shift") {
        agg.shift = shift.parse().map_err(|_| {
            EngineError::spec(format!("aggregation shift is not a number: {shift:?}"))
        })?;
    }
    if let Some(code) = node.attribute("format") {
        agg.format = Some(code.to_string());
    }
    if let Some(name) = node.attribute("name") {
        agg.name = Some(name.to_string());
    }
    Ok(agg)
}

fn parse_filter(node: &roxmltree::Node<'_, '_>) -> Result<Filter, EngineError> {
    let name = node
        .attribute("name")
        .ok_or_else(|| EngineError::spec("<Filter> needs a name attribute"))?
        .to_string();
    let column = node
        .attribute("column")
        .ok_or_else(|| EngineError::spec(format!("filter {name:?} needs a column attribute")))?
        .to_string();
    let op_name = node
        .attribute("operator")
        .ok_or_else(|| EngineError::spec(format!("filter {name:?} needs an operator attribute")))?;
    let op = match op_name {
        "eq" => FilterOp::Eq,
        "ne" => FilterOp::Ne,
        "lt" => FilterOp::Lt,
        "le" => FilterOp::Le,
        "gt" => FilterOp::Gt,
        "ge" => FilterOp::Ge,
        "between" => FilterOp::Between,
        "matches" => FilterOp::Matches,
        "ismissing" => FilterOp::IsMissing,
        other => {
            return Err(EngineError::spec(format!(
                "unknown filter operator {other:?} in filter {name:?}"
            )))
        }
    };

    let operand = |value_attr: &str, column_attr: &str| -> Option<Operand> {
        if let Some(other) = node.attribute(column_attr) {
            return Some(Operand::Column(other.to_string()));
        }
        node.attribute(value_attr).map(|raw| {
            // Regex patterns stay text even when they look numeric.
            if op == FilterOp::Matches {
                Operand::Literal(Value::Text(raw.to_string()))
            } else {
                Operand::Literal(
                    Value::parse_literal(raw).unwrap_or_else(|| Value::Text(raw.to_string())),
                )
            }
        })
    };

    let value = operand("value", "column2");
    let value2 = operand("value2", "column3");

    match op {
        FilterOp::IsMissing => {}
        FilterOp::Between => {
            if value.is_none() || value2.is_none() {
                return Err(EngineError::spec(format!(
                    "between filter {name:?} needs value and value2"
                )));
            }
        }
        _ => {
            if value.is_none() {
                return Err(EngineError::spec(format!(
                    "filter {name:?} needs a value or column2 attribute"
                )));
            }
        }
    }

    Ok(Filter {
        name,
        column,
        op,
        value,
        value2,
    })
}

fn parse_group(
    node: &roxmltree::Node<'_, '_>,
    filters: &mut Vec<Filter>,
) -> Result<FilterGroup, EngineError> {
    let name = node
        .attribute("name")
        .ok_or_else(|| EngineError::spec("<FilterGroup> needs a name attribute"))?
        .to_string();
    let join = match node.attribute("operator").unwrap_or("all") {
        "all" | "and" => GroupJoin::All,
        "any" | "or" => GroupJoin::Any,
        other => {
            return Err(EngineError::spec(format!(
                "unknown group operator {other:?} in group {name:?}"
            )))
        }
    };

    let mut group = FilterGroup::new(name.clone(), join);
    group.negate = parse_flag(node, "negate")?;

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "FilterRef" => {
                let target = child.attribute("name").ok_or_else(|| {
                    EngineError::spec(format!("<FilterRef> in group {name:?} needs a name"))
                })?;
                group.members.push(GroupMember::Filter(target.to_string()));
            }
            "GroupRef" => {
                let target = child.attribute("name").ok_or_else(|| {
                    EngineError::spec(format!("<GroupRef> in group {name:?} needs a name"))
                })?;
                group.members.push(GroupMember::Group(target.to_string()));
            }
            "Filter" => {
                // Inline filters register globally and join by reference.
                let filter = parse_filter(&child)?;
                group.members.push(GroupMember::Filter(filter.name.clone()));
                filters.push(filter);
            }
            "Aggregation" => {
                let agg = parse_aggregation(&child, None)?;
                group.aggregations.push(agg);
            }
            other => {
                return Err(EngineError::spec(format!(
                    "unexpected element <{other}> under group {name:?}"
                )))
            }
        }
    }

    Ok(group)
}

fn parse_flag(node: &roxmltree::Node<'_, '_>, attr: &str) -> Result<bool, EngineError> {
    match node.attribute(attr) {
        None => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(EngineError::spec(format!(
            "attribute {attr}={other:?} is not a boolean"
        ))),
    }
}

fn parse_opt_number(
    node: &roxmltree::Node<'_, '_>,
    attr: &str,
) -> Result<Option<f64>, EngineError> {
    match node.attribute(attr) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| {
            EngineError::spec(format!("attribute {attr}={raw:?} is not a number"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SPEC: &str = r#"
        <Evaluation groupkey="Settings" defaultgroup="default" comparecolformat="%.2f"
                    index="Problem Settings" sortlevel="group">
          <Column name="Time" origcolname="SolvingTime" format="%.1f" compare="true">
            <Aggregation function="shmean" shift="10" format="%.1f"/>
            <Aggregation function="mean"/>
          </Column>
          <Column name="Nodes" origcolname="Nodes"/>
          <Column name="Speed" expr="Nodes / Time" nanrep="0"/>
          <Filter name="hard" column="Time" operator="ge" value="10"/>
          <FilterGroup name="all"/>
          <FilterGroup name="hard">
            <FilterRef name="hard"/>
          </FilterGroup>
          <FilterGroup name="easy" negate="true">
            <GroupRef name="hard"/>
          </FilterGroup>
        </Evaluation>
    "#;

    #[test]
    fn parses_a_complete_document() {
        let spec = EvaluationSpec::from_xml(SPEC).unwrap();
        assert_eq!(spec.group_key, "Settings");
        assert_eq!(
            spec.default_group,
            DefaultGroup::Setting("default".to_string())
        );
        assert_eq!(spec.compare_format, "%.2f");
        assert_eq!(spec.columns.len(), 3);
        assert_eq!(spec.columns[0].aggregations.len(), 2);
        assert_eq!(spec.columns[0].aggregations[0].shift, 10.0);
        assert!(spec.columns[0].compare);
        assert_eq!(spec.filters.len(), 1);
        assert_eq!(spec.groups.len(), 3);
        assert!(spec.groups[2].negate);
    }

    #[test]
    fn inline_filters_register_globally() {
        let text = r#"
            <Evaluation>
              <Column name="Time" origcolname="SolvingTime"/>
              <FilterGroup name="fast" operator="all">
                <Filter name="fast" column="Time" operator="lt" value="1"/>
              </FilterGroup>
            </Evaluation>
        "#;
        let spec = EvaluationSpec::from_xml(text).unwrap();
        assert_eq!(spec.filters.len(), 1);
        assert_eq!(
            spec.groups[0].members,
            vec![GroupMember::Filter("fast".to_string())]
        );
    }

    #[test]
    fn opt_auto_tolerances() {
        let text = r#"
            <Evaluation optauto="0.05 1.0">
              <Column name="Time" origcolname="SolvingTime"/>
            </Evaluation>
        "#;
        let spec = EvaluationSpec::from_xml(text).unwrap();
        assert_eq!(
            spec.default_group,
            DefaultGroup::OptAuto {
                rel_tol: 0.05,
                abs_tol: 1.0
            }
        );
    }

    #[test]
    fn rejects_unknown_group_references() {
        let text = r#"
            <Evaluation>
              <FilterGroup name="broken">
                <FilterRef name="ghost"/>
              </FilterGroup>
            </Evaluation>
        "#;
        assert!(matches!(
            EvaluationSpec::from_xml(text),
            Err(EngineError::UnknownFilter(name)) if name == "ghost"
        ));
    }

    #[test]
    fn rejects_cyclic_derived_columns_at_parse_time() {
        let text = r#"
            <Evaluation>
              <Column name="A" expr="B + 1"/>
              <Column name="B" expr="A + 1"/>
            </Evaluation>
        "#;
        assert!(matches!(
            EvaluationSpec::from_xml(text),
            Err(EngineError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_columns() {
        let text = r#"
            <Evaluation>
              <Column name="Time" origcolname="SolvingTime"/>
              <Column name="Time" origcolname="TotalTime"/>
            </Evaluation>
        "#;
        assert!(matches!(
            EvaluationSpec::from_xml(text),
            Err(EngineError::DuplicateKey(name)) if name == "Time"
        ));
    }

    #[test]
    fn rejects_bad_format_codes() {
        let text = r#"
            <Evaluation>
              <Column name="Time" origcolname="SolvingTime" format="plain"/>
            </Evaluation>
        "#;
        assert!(matches!(
            EvaluationSpec::from_xml(text),
            Err(EngineError::BadFormatCode { code, .. }) if code == "plain"
        ));
    }

    #[test]
    fn rejects_malformed_xml_and_wrong_roots() {
        assert!(matches!(
            EvaluationSpec::from_xml("<Evaluation"),
            Err(EngineError::SpecParse { .. })
        ));
        assert!(matches!(
            EvaluationSpec::from_xml("<Report/>"),
            Err(EngineError::SpecParse { .. })
        ));
    }

    #[test]
    fn spec_round_trips_through_serde() {
        let spec = EvaluationSpec::from_xml(SPEC).unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        let back: EvaluationSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}
