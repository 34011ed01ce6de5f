use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("API request to {url} failed with status {status}")]
    Api { status: u16, url: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid timestamp '{value}': {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExporterError>;
