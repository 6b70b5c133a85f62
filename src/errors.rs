use std::time::Duration;
use thiserror::Error;

/// Error of a single breaker-protected call
#[derive(Error, Debug)]
pub enum CallError {
    #[error("Circuit breaker '{name}' is open, retry in {retry_in:?}")]
    Open { name: String, retry_in: Duration },

    #[error("Call through '{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Call through '{name}' failed: {source}")]
    Failed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Call through '{name}' panicked")]
    Panicked { name: String },
}

impl CallError {
    /// Open-breaker rejections are a distinct kind: the call never ran
    pub fn is_breaker_open(&self) -> bool {
        matches!(self, CallError::Open { .. })
    }

    /// Check if the retry executor should attempt the call again
    pub fn is_retryable(&self) -> bool {
        !self.is_breaker_open()
    }

    /// Name of the breaker the call went through
    pub fn breaker_name(&self) -> &str {
        match self {
            CallError::Open { name, .. }
            | CallError::Timeout { name, .. }
            | CallError::Failed { name, .. }
            | CallError::Panicked { name } => name,
        }
    }
}

/// Crate-level error type
#[derive(Error, Debug)]
pub enum OrchestraError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Data fetch failed for {domain}: {message}")]
    DataFetch { domain: String, message: String },

    #[error("Regime detection failed: {0}")]
    RegimeDetection(String),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error("No domain produced usable output ({} errors)", errors.len())]
    NoUsableDomains { errors: Vec<String> },
}

/// Result type for engine operations
pub type OrchestraResult<T> = Result<T, OrchestraError>;

impl OrchestraError {
    /// Create a configuration error
    pub fn config_error<S: Into<String>>(message: S) -> Self {
        OrchestraError::Config(message.into())
    }

    /// Create a data fetch error for a domain
    pub fn data_fetch<S: Into<String>>(domain: S, message: S) -> Self {
        OrchestraError::DataFetch {
            domain: domain.into(),
            message: message.into(),
        }
    }

    /// Construction-time errors are fatal at startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestraError::Config(_)
                | OrchestraError::Registration(_)
                | OrchestraError::NoUsableDomains { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_is_not_retryable() {
        let open = CallError::Open {
            name: "bonds.ta_rsi".to_string(),
            retry_in: Duration::from_secs(10),
        };
        assert!(open.is_breaker_open());
        assert!(!open.is_retryable());
        assert_eq!(open.breaker_name(), "bonds.ta_rsi");

        let failed = CallError::Failed {
            name: "x".to_string(),
            source: anyhow::anyhow!("boom"),
        };
        assert!(failed.is_retryable());
        assert!(failed.to_string().contains("boom"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(OrchestraError::config_error("weights").is_fatal());
        assert!(!OrchestraError::data_fetch("crypto", "down").is_fatal());
    }
}
