use crate::error::{QuillDriverError, QuillDriverResult};
use crate::remote::Row;

/// Closed set of outcomes reported across the driver API boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnCode {
    Ok,
    NoData,
    SequenceError,
    Cancelled,
    RemoteError(String),
}

impl std::fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReturnCode::Ok => write!(f, "Ok"),
            ReturnCode::NoData => write!(f, "NoData"),
            ReturnCode::SequenceError => write!(f, "SequenceError"),
            ReturnCode::Cancelled => write!(f, "Cancelled"),
            ReturnCode::RemoteError(details) => write!(f, "RemoteError({})", details),
        }
    }
}

impl ReturnCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, ReturnCode::Ok)
    }

    /// Status of a call that produces no row.
    pub fn of<T>(result: &QuillDriverResult<T>) -> Self {
        match result {
            Ok(_) => ReturnCode::Ok,
            Err(err) => Self::from(err),
        }
    }

    /// Status of a fetch: `NoData` once the cursor is exhausted.
    pub fn of_fetch(result: &QuillDriverResult<Option<Row>>) -> Self {
        match result {
            Ok(Some(_)) => ReturnCode::Ok,
            Ok(None) => ReturnCode::NoData,
            Err(err) => Self::from(err),
        }
    }
}

impl From<&QuillDriverError> for ReturnCode {
    fn from(err: &QuillDriverError) -> Self {
        match err {
            QuillDriverError::Sequence(_) => ReturnCode::SequenceError,
            QuillDriverError::Cancelled => ReturnCode::Cancelled,
            QuillDriverError::Remote(details) => ReturnCode::RemoteError(details.clone()),
            // Failures inside the driver itself are reported with their
            // message; callers only distinguish them from sequence misuse.
            other => ReturnCode::RemoteError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_codes() {
        assert_eq!(ReturnCode::of_fetch(&Ok(None)), ReturnCode::NoData);
        assert_eq!(
            ReturnCode::of_fetch(&Ok(Some(Row::new(vec![])))),
            ReturnCode::Ok
        );
        assert_eq!(
            ReturnCode::of_fetch(&Err(QuillDriverError::Cancelled)),
            ReturnCode::Cancelled
        );
    }

    #[test]
    fn error_codes() {
        let seq: QuillDriverResult<()> = Err(QuillDriverError::Sequence("x".to_string()));
        assert_eq!(ReturnCode::of(&seq), ReturnCode::SequenceError);

        let remote: QuillDriverResult<()> = Err(QuillDriverError::Remote("lost".to_string()));
        assert_eq!(
            ReturnCode::of(&remote),
            ReturnCode::RemoteError("lost".to_string())
        );
        assert_eq!(ReturnCode::of(&remote).to_string(), "RemoteError(lost)");
        assert!(ReturnCode::of(&Ok::<(), QuillDriverError>(())).is_ok());
    }
}
