pub mod logger;

use serde::Serialize;
use thiserror::Error;

/// 外部能力调用失败的分类
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("capability not initialized")]
    NotInitialized,

    #[error("call failed")]
    CallFailed,

    #[error("invalid response")]
    InvalidResponse,

    #[error("unsupported input")]
    UnsupportedInput,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one adapter call.
///
/// `value` is always usable: on failure it holds the degraded placeholder the
/// caller should store or display. Decisions are made on `is_ok()`, never by
/// looking at the contents of `value`.
#[derive(Debug, Clone)]
pub struct AdapterResult<T> {
    pub value: T,
    pub failure: Option<Failure>,
}

impl<T> AdapterResult<T> {
    pub fn ok(value: T) -> Self {
        Self { value, failure: None }
    }

    pub fn degraded(value: T, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            value,
            failure: Some(Failure {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }

    pub fn kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    /// The value when the call succeeded, `None` otherwise.
    pub fn into_ok(self) -> Option<T> {
        match self.failure {
            None => Some(self.value),
            Some(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_result_keeps_placeholder_value() {
        let result = AdapterResult::degraded("ERR: NO API KEY".to_string(), FailureKind::MissingCredentials, "no key");
        assert!(!result.is_ok());
        assert_eq!(result.kind(), Some(FailureKind::MissingCredentials));
        assert_eq!(result.value, "ERR: NO API KEY");
        assert!(result.into_ok().is_none());
    }

    #[test]
    fn ok_result_has_no_failure() {
        let result = AdapterResult::ok(3);
        assert!(result.is_ok());
        assert_eq!(result.kind(), None);
        assert_eq!(result.into_ok(), Some(3));
    }
}
