use thiserror::Error;

/// Failure of any call to the platform or generation service.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("platform api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("response is missing {0}")]
    Missing(&'static str),
    #[error("response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("queued call was dropped before completion")]
    Dropped,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("settings record is missing {0}")]
    MissingSetting(&'static str),
}

/// Everything that can stop one event's pass through a chain.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed event: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}
