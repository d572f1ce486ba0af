use super::check::CheckError;
use crate::types::Diagnostic;
use thiserror::Error;

/// Why a test case failed
#[derive(Debug, Error)]
pub enum TestError {
    #[error("pre-check failed: {0}")]
    PreCheck(String),

    #[error("step {step}: {address}: {}", join(.diagnostics))]
    Provisioning {
        step: usize,
        address: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("step {step}: {source}")]
    Check { step: usize, source: CheckError },

    #[error("step {step}: expected an error matching {pattern:?}, got {actual}")]
    ExpectedError {
        step: usize,
        pattern: String,
        actual: String,
    },

    #[error("step {step}: import of {address}: {message}")]
    Import {
        step: usize,
        address: String,
        message: String,
    },

    #[error("destroying {address}: {}", join(.diagnostics))]
    Destroy {
        address: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("destroy check failed: {0}")]
    DestroyCheck(String),
}

impl TestError {
    /// A provisioning failure described by a single message
    pub(crate) fn provisioning(step: usize, address: &str, message: impl Into<String>) -> Self {
        TestError::Provisioning {
            step,
            address: address.to_string(),
            diagnostics: vec![Diagnostic::error(message, "")],
        }
    }
}

fn join(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisioning_lists_only_errors() {
        let err = TestError::Provisioning {
            step: 1,
            address: "aws_customer_gateway.test".to_string(),
            diagnostics: vec![
                Diagnostic::warning("slow", "took a while"),
                Diagnostic::error("Invalid bgp_asn", "must be between 1 and 4294967294"),
            ],
        };

        let message = err.to_string();
        assert!(message.starts_with("step 1: aws_customer_gateway.test: Error: Invalid bgp_asn"));
        assert!(!message.contains("slow"));
    }
}
