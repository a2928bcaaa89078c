use thiserror::Error;

#[derive(Error, Debug)]
pub enum VchatError {
    #[error("Model could not be resolved: {0}")]
    ModelUnresolved(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Protocol(String),

    #[error("Switch rejected: {0}")]
    SwitchRejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, VchatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_message_carries_status_and_body() {
        let err = VchatError::Http {
            status: 502,
            body: "upstream down".into(),
        };
        assert_eq!(err.to_string(), "HTTP error 502: upstream down");
    }

    #[test]
    fn json_errors_convert() {
        let err: VchatError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, VchatError::Json(_)));
    }
}
