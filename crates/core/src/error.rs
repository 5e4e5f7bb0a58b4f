use thiserror::Error;

#[derive(Error, Debug)]
pub enum FractalError {
    /// Transient transport failure between a manager and the server.
    #[error("network error: {0}")]
    Network(String),

    #[error("unknown or inactive manager: {0}")]
    UnknownManager(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("adapter error: {0}")]
    Adapter(String),
}

impl FractalError {
    /// Whether the failure is worth retrying on a later cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, FractalError::Network(_))
    }
}
