use thiserror::Error;

/// Errors raised while querying the IPAM source.
#[derive(Debug, Error)]
pub enum IpamError {
    #[error("IPAM request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url}: HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url}: unexpected response: {source}")]
    Decode {
        url: String,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, IpamError>;
