#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Declarative evaluation engine for solver benchmark testruns.
//!
//! An [`EvaluationSpec`] — parsed once from an XML document or built
//! programmatically — describes columns to extract or derive, named filter
//! groups over instances, and per-group aggregation statistics. An
//! [`Evaluation`] applies the spec to any experiment exposing the
//! [`Experiment`](verdict_model::Experiment) trait and produces two
//! deterministic tables: the instance-wise table (one row key per problem,
//! settings pivoted into column headers) and the aggregated table (one row
//! per filter group and setting).
//!
//! The pipeline runs in three sequential phases: column materialization
//! (dependency-ordered, memoized), filter-group membership (composable
//! AND/OR/NOT predicate trees over the enriched table), and per-group
//! aggregation (mean, shifted geometric mean, counts, and friends, with
//! missing values excluded). Relative "Q" columns compare every setting
//! against a baseline: either a literal setting name or a synthesized
//! per-instance optimal setting.
//!
//! Missing data is a value, not an exception: recovered numeric conditions
//! (division by zero, logarithms of non-positive values) become missing
//! cells and are tallied on the [`EvaluationResult`].
//!
//! ```
//! use verdict_engine::Evaluation;
//! use verdict_model::{InstanceRecord, Status, TestRunData};
//!
//! let spec = r#"
//!     <Evaluation groupkey="Settings" defaultgroup="default">
//!       <Column name="Time" origcolname="SolvingTime" format="%.1f" compare="true">
//!         <Aggregation function="shmean" shift="1"/>
//!       </Column>
//!       <FilterGroup name="all"/>
//!     </Evaluation>
//! "#;
//! let mut evaluation = Evaluation::from_xml(spec)?;
//!
//! let mut data = TestRunData::new();
//! data.push(
//!     InstanceRecord::new("p1", "default", Status::Ok).with_value("SolvingTime", 2.0),
//! )?;
//! data.push(
//!     InstanceRecord::new("p1", "fast", Status::Ok).with_value("SolvingTime", 1.0),
//! )?;
//!
//! let result = evaluation.evaluate(&data)?;
//! assert_eq!(result.instances.columns()[0], "Problem");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod aggregate;
pub mod ast;
pub mod columns;
pub mod error;
pub mod evaluation;
pub mod filter;
pub mod parser;
pub mod registry;
pub mod spec;
pub mod stream;
pub mod table;

pub use aggregate::{AggFunction, AggregationSpec};
pub use ast::{BinaryOp, Expr, Func, UnaryOp};
pub use columns::{ColumnDef, ColumnEvaluator, ColumnKind, Enriched, MissingPolicy};
pub use error::EngineError;
pub use evaluation::{Evaluation, EvaluationResult};
pub use filter::{Filter, FilterGroup, FilterOp, GroupEngine, GroupJoin, GroupMember, Operand};
pub use parser::{parse_expr, ExprParseError};
pub use registry::DataKeyRegistry;
pub use spec::{DefaultGroup, EvaluationSpec, SortLevel};
pub use stream::{stream_table, Formatters, Sink};
pub use table::{PivotSort, Table};
