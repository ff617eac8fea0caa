use thiserror::Error;

/// A raw record from the store or the gateway that could not be turned into a domain value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("malformed record: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Malformed(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("realtime connection failed: {0}")]
    Realtime(String),

    #[error("undecodable store record: {0}")]
    Decode(#[from] DecodeError),

    #[error("no data directory available for the local store")]
    NoDataDir,

    #[error("store connection is poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx answer; carries the provider's `message` when it sent one.
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("undecodable gateway response: {0}")]
    Decode(#[from] DecodeError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("no config directory available on this platform")]
    NoConfigDir,

    #[error("missing setting `{0}`")]
    Missing(&'static str),

    #[error("invalid url `{0}`")]
    InvalidUrl(String),
}
