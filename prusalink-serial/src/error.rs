#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serial link I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link closed, cannot write")]
    LinkFault,

    #[error("no response matching the expected pattern arrived in time")]
    Timeout,
}
