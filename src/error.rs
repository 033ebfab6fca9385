/// Failures that prevent a usable frame from being recovered from the link.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("no '(' start marker in response")]
    MissingStartMarker,
    #[error("timed out waiting for the CR terminator")]
    Timeout,
    #[error("connection closed before the CR terminator")]
    ConnectionClosed,
    #[error("response exceeds {0} bytes without a CR terminator")]
    TooLong(usize),
    #[error("inverter rejected the command (NAK)")]
    Rejected,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    /// Fewer fields than the query shape requires, usually a firmware or query mismatch.
    #[error("Schema error: {found} fields received, at least {required} required")]
    Schema { found: usize, required: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_frame_error(&self) -> bool {
        matches!(self, Error::Frame(_))
    }

    pub fn is_schema_error(&self) -> bool {
        matches!(self, Error::Schema { .. })
    }
}
