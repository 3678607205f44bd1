use thiserror::Error;

/// Fatal engine errors.
///
/// Everything here aborts the evaluation before a table is produced.
/// Recoverable per-cell conditions (division by zero, log of a non-positive
/// value, a missing baseline row) never surface as errors; they become
/// [`Value::Missing`](verdict_model::Value::Missing) and are tallied or
/// logged instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed evaluation spec: {message}")]
    SpecParse { message: String },

    #[error("duplicate data key: {0}")]
    DuplicateKey(String),

    #[error("unknown data key: {0}")]
    UnknownKey(String),

    #[error("unknown filter reference: {0}")]
    UnknownFilter(String),

    #[error("unknown filter group reference: {0}")]
    UnknownGroup(String),

    #[error("cyclic dependency: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("index column missing from the evaluated table: {0}")]
    MissingIndexColumn(String),

    #[error("index split position {position} exceeds the {levels} index levels")]
    BadIndexSplit { position: usize, levels: usize },

    #[error("invalid format code {code:?}: {source}")]
    BadFormatCode {
        code: String,
        source: verdict_format::ParseError,
    },

    #[error("invalid regex in filter {filter:?}: {message}")]
    BadRegex { filter: String, message: String },

    #[error("invalid expression for column {column:?}: {message}")]
    BadExpression { column: String, message: String },
}

impl EngineError {
    pub(crate) fn spec(message: impl Into<String>) -> Self {
        EngineError::SpecParse {
            message: message.into(),
        }
    }
}
