use thiserror::Error;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("failed to load model {model} from {endpoint}: {source}")]
    Load {
        model: String,
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, InferenceError>;
