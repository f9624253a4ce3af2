use thiserror::Error;

/// Errors produced by the trading agent
#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Api {
        service: String,
        status: u16,
        body: String,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("quote failed: {0}")]
    Quote(String),

    #[error("swap failed: {0}")]
    Swap(String),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("llm error: {0}")]
    Llm(String),

    #[error("insufficient funds: need {needed:.6}, have {available:.6}")]
    InsufficientFunds { needed: f64, available: f64 },
}

impl Error {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display() {
        let err = Error::validation("capital", "must be positive");
        assert_eq!(err.to_string(), "invalid capital: must be positive");
    }

    #[test]
    fn test_api_display() {
        let err = Error::Api {
            service: "jupiter".to_string(),
            status: 429,
            body: "rate limited".to_string(),
        };
        assert_eq!(err.to_string(), "jupiter returned 429: rate limited");
    }

    #[test]
    fn test_insufficient_funds_display() {
        let err = Error::InsufficientFunds {
            needed: 10.0,
            available: 2.5,
        };
        assert!(err.to_string().contains("need 10.000000"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
