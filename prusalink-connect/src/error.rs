#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("upstream request failed: {0}")]
    UpstreamTransient(#[from] reqwest::Error),

    #[error("upstream returned an error response: {status}")]
    UpstreamRejected { status: reqwest::StatusCode },
}
