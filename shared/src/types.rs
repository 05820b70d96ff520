use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state and verdict of a submission.
///
/// `Pending`, `Compiling` and `Running` are transient; everything else is
/// terminal. `WrongAnswer` is reserved for graders layered on top of the
/// core and is never produced by the judging pipeline itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JudgeStatus {
    Pending,
    Compiling,
    Running,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompilationError,
    InternalError,
}

impl JudgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JudgeStatus::Pending => "PENDING",
            JudgeStatus::Compiling => "COMPILING",
            JudgeStatus::Running => "RUNNING",
            JudgeStatus::Accepted => "ACCEPTED",
            JudgeStatus::WrongAnswer => "WRONG_ANSWER",
            JudgeStatus::TimeLimitExceeded => "TIME_LIMIT_EXCEEDED",
            JudgeStatus::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            JudgeStatus::RuntimeError => "RUNTIME_ERROR",
            JudgeStatus::CompilationError => "COMPILATION_ERROR",
            JudgeStatus::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(JudgeStatus::Pending),
            "COMPILING" => Some(JudgeStatus::Compiling),
            "RUNNING" => Some(JudgeStatus::Running),
            "ACCEPTED" => Some(JudgeStatus::Accepted),
            "WRONG_ANSWER" => Some(JudgeStatus::WrongAnswer),
            "TIME_LIMIT_EXCEEDED" => Some(JudgeStatus::TimeLimitExceeded),
            "MEMORY_LIMIT_EXCEEDED" => Some(JudgeStatus::MemoryLimitExceeded),
            "RUNTIME_ERROR" => Some(JudgeStatus::RuntimeError),
            "COMPILATION_ERROR" => Some(JudgeStatus::CompilationError),
            "INTERNAL_ERROR" => Some(JudgeStatus::InternalError),
            _ => None,
        }
    }

    /// A terminal submission is never touched by a worker again.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            JudgeStatus::Pending | JudgeStatus::Compiling | JudgeStatus::Running
        )
    }
}

impl fmt::Display for JudgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JudgeStatus::Pending.is_terminal());
        assert!(!JudgeStatus::Compiling.is_terminal());
        assert!(!JudgeStatus::Running.is_terminal());
        assert!(JudgeStatus::Accepted.is_terminal());
        assert!(JudgeStatus::CompilationError.is_terminal());
        assert!(JudgeStatus::InternalError.is_terminal());
    }

    #[test]
    fn round_trips_through_str() {
        for status in [
            JudgeStatus::Pending,
            JudgeStatus::Compiling,
            JudgeStatus::Running,
            JudgeStatus::Accepted,
            JudgeStatus::WrongAnswer,
            JudgeStatus::TimeLimitExceeded,
            JudgeStatus::MemoryLimitExceeded,
            JudgeStatus::RuntimeError,
            JudgeStatus::CompilationError,
            JudgeStatus::InternalError,
        ] {
            assert_eq!(JudgeStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JudgeStatus::parse("SOMETHING_ELSE"), None);
    }

    #[test]
    fn serializes_screaming_snake_case() {
        let json = serde_json::to_string(&JudgeStatus::TimeLimitExceeded).unwrap();
        assert_eq!(json, "\"TIME_LIMIT_EXCEEDED\"");
    }
}
