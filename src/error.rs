use thiserror::Error;

pub type QuillDriverResult<T, E = QuillDriverError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum QuillDriverError {
    /// The caller drove the statement out of order (fetch before execute,
    /// execute on a live cursor, reuse without close).
    #[error("Sequence error: {0}")]
    Sequence(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Readline error: {0}")]
    Readline(#[from] rustyline::error::ReadlineError),
}
