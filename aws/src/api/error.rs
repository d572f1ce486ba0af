use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{operation} failed ({code}): {message}")]
    Service {
        operation: &'static str,
        code: String,
        message: String,
    },

    #[error("{operation} request failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    #[error("Invalid response: {0}")]
    Invalid(String),
}

impl ApiError {
    /// Service error code, e.g. `InvalidCustomerGatewayID.NotFound`
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Service { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ApiError::NotFound(_) => true,
            ApiError::Service { code, .. } => {
                code.ends_with(".NotFound") || code == "ResourceNotFoundException"
            }
            _ => false,
        }
    }

    /// Throttling and transient server errors worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport { .. } => true,
            ApiError::Service { code, .. } => matches!(
                code.as_str(),
                "Throttling"
                    | "ThrottlingException"
                    | "RequestLimitExceeded"
                    | "InternalError"
                    | "ServiceUnavailable"
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_codes() {
        let ec2 = ApiError::Service {
            operation: "DescribeCustomerGateways",
            code: "InvalidCustomerGatewayID.NotFound".to_string(),
            message: "The customerGateway ID 'cgw-1' does not exist".to_string(),
        };
        assert!(ec2.is_not_found());
        assert!(!ec2.is_retryable());

        let pca = ApiError::Service {
            operation: "DescribeCertificateAuthority",
            code: "ResourceNotFoundException".to_string(),
            message: "gone".to_string(),
        };
        assert!(pca.is_not_found());
    }

    #[test]
    fn throttling_is_retryable() {
        let err = ApiError::Service {
            operation: "CreateCustomerGateway",
            code: "RequestLimitExceeded".to_string(),
            message: "Request limit exceeded.".to_string(),
        };
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "CreateCustomerGateway failed (RequestLimitExceeded): Request limit exceeded."
        );
    }
}
