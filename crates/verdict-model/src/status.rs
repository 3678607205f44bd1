use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Outcome of one solver run, as tagged by the log collector.
///
/// The variant order doubles as the merge priority: when several runs of the
/// same instance are collapsed into one (e.g. for the synthesized optimal
/// setting), the earliest variant present wins.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    TimeLimit,
    NodeLimit,
    MemLimit,
    #[default]
    Unknown,
    Fail,
    Abort,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::Ok,
        Status::TimeLimit,
        Status::NodeLimit,
        Status::MemLimit,
        Status::Unknown,
        Status::Fail,
        Status::Abort,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::TimeLimit => "timelimit",
            Status::NodeLimit => "nodelimit",
            Status::MemLimit => "memlimit",
            Status::Unknown => "unknown",
            Status::Fail => "fail",
            Status::Abort => "abort",
        }
    }

    /// Collapse several outcomes into the best one by priority.
    ///
    /// Returns `Unknown` for an empty iterator.
    pub fn best<I: IntoIterator<Item = Status>>(statuses: I) -> Status {
        statuses
            .into_iter()
            .min()
            .unwrap_or(Status::Unknown)
    }

    pub fn is_fail(self) -> bool {
        matches!(self, Status::Fail)
    }

    pub fn is_abort(self) -> bool {
        matches!(self, Status::Abort)
    }

    pub fn is_time_limit(self) -> bool {
        matches!(self, Status::TimeLimit)
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, Status::Unknown)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown solver status: {0:?}")]
pub struct ParseStatusError(pub String);

impl FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Status::Ok),
            "timelimit" => Ok(Status::TimeLimit),
            "nodelimit" => Ok(Status::NodeLimit),
            "memlimit" => Ok(Status::MemLimit),
            "unknown" => Ok(Status::Unknown),
            "fail" => Ok(Status::Fail),
            "abort" => Ok(Status::Abort),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_strings() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>(), Ok(status));
        }
        assert!("solved".parse::<Status>().is_err());
    }

    #[test]
    fn best_follows_priority_order() {
        assert_eq!(
            Status::best([Status::Fail, Status::TimeLimit, Status::Abort]),
            Status::TimeLimit
        );
        assert_eq!(Status::best([Status::Abort, Status::Ok]), Status::Ok);
        assert_eq!(Status::best([]), Status::Unknown);
    }
}
