use crate::status::Status;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::experiment::Experiment;

/// One testrun row: a (problem instance, solver setting) pair together with
/// the collector's outcome tag and the raw figures parsed from the log.
///
/// Records are immutable once collected; the engine reads them through
/// [`Experiment`](crate::Experiment) and never writes back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub problem: String,
    pub setting: String,
    pub status: Status,
    /// Raw named values. A `BTreeMap` keeps key iteration deterministic.
    pub values: BTreeMap<String, Value>,
}

impl InstanceRecord {
    pub fn new(problem: impl Into<String>, setting: impl Into<String>, status: Status) -> Self {
        Self {
            problem: problem.into(),
            setting: setting.into(),
            status,
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Look up a raw value; absent keys read as missing.
    pub fn value(&self, key: &str) -> Value {
        self.values.get(key).cloned().unwrap_or(Value::Missing)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("duplicate testrun record for problem {problem:?} under setting {setting:?}")]
    DuplicateRecord { problem: String, setting: String },
    #[error("testrun record has an empty {field} name")]
    EmptyKeyField { field: &'static str },
}

/// An in-memory testrun collection implementing [`Experiment`].
///
/// This is what embedders hand to the engine when the records come from
/// somewhere other than the stock log collector, and what the test suites
/// build their fixtures from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestRunData {
    records: Vec<InstanceRecord>,
}

impl TestRunData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, rejecting duplicates of the identifying
    /// (problem, setting) pair.
    pub fn push(&mut self, record: InstanceRecord) -> Result<(), RecordError> {
        if record.problem.is_empty() {
            return Err(RecordError::EmptyKeyField { field: "problem" });
        }
        if record.setting.is_empty() {
            return Err(RecordError::EmptyKeyField { field: "setting" });
        }
        if self
            .records
            .iter()
            .any(|r| r.problem == record.problem && r.setting == record.setting)
        {
            return Err(RecordError::DuplicateRecord {
                problem: record.problem,
                setting: record.setting,
            });
        }
        self.records.push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Experiment for TestRunData {
    fn data_table(&self) -> &[InstanceRecord] {
        &self.records
    }

    fn data_keys(&self) -> Vec<String> {
        // First-seen order across records, deduplicated.
        let mut seen = std::collections::BTreeSet::new();
        let mut keys = Vec::new();
        for record in &self.records {
            for key in record.values.keys() {
                if seen.insert(key.clone()) {
                    keys.push(key.clone());
                }
            }
        }
        keys
    }
}
