//! External collaborators reached from async rules.
//!
//! Both contracts are request/response over a string. Implementations are
//! expected to serialize their own calls (one in flight per process).

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    /// The engine understood the request and refused it (syntax, evaluation)
    #[error("{0}")]
    Rejected(String),

    #[error("Collaborator process failed: {0}")]
    Process(String),

    #[error("Malformed collaborator response: {0}")]
    Protocol(String),

    #[error("Collaborator timed out")]
    Timeout,
}

/// Computer-algebra engine: evaluate an expression, get an expression back
#[async_trait]
pub trait ComputerAlgebra: Send + Sync {
    async fn execute(&self, expression: &str) -> Result<String, CollaboratorError>;
}

/// Turns a plain-text formula into SVG markup
#[async_trait]
pub trait Typesetter: Send + Sync {
    async fn typeset(&self, formula: &str) -> Result<String, CollaboratorError>;
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes `= <expr>` after an optional delay; fails on `!`
    #[derive(Debug, Default)]
    pub struct EchoAlgebra {
        pub delay_ms: u64,
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl ComputerAlgebra for EchoAlgebra {
        async fn execute(&self, expression: &str) -> Result<String, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if expression.contains('!') {
                return Err(CollaboratorError::Rejected(format!(
                    "syntax error in {expression}"
                )));
            }
            Ok(format!("= {expression}"))
        }
    }

    #[derive(Debug, Default)]
    pub struct SvgTypesetter;

    #[async_trait]
    impl Typesetter for SvgTypesetter {
        async fn typeset(&self, formula: &str) -> Result<String, CollaboratorError> {
            Ok(format!("<svg><text>{formula}</text></svg>"))
        }
    }
}
