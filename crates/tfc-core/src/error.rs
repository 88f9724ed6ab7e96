use thiserror::Error;

pub type TfcResult<T> = Result<T, TfcError>;

#[derive(Debug, Error)]
pub enum TfcError {
    /// Invalid or contradictory configuration, detected before any I/O.
    #[error("config error: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} too small! ({got} of {need} bytes)")]
    ShortSource {
        what: &'static str,
        got: usize,
        need: usize,
    },

    #[error("key derivation error: {0}")]
    Key(String),

    #[error("cipher error: {0}")]
    Cipher(String),

    #[error("signature error: {0}")]
    Signature(String),

    #[error("interrupted")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TfcError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TfcError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        TfcError::Config(msg.into())
    }

    /// Process exit status for an error that aborted a run.
    ///
    /// Cancellation is a soft stop (1); everything else is a hard failure (2).
    pub fn exit_code(&self) -> i32 {
        match self {
            TfcError::Cancelled => 1,
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_message_includes_system_text() {
        let err = TfcError::io(
            "reading key",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "Permission denied"),
        );
        assert_eq!(err.to_string(), "reading key: Permission denied");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn short_source_message() {
        let err = TfcError::ShortSource {
            what: "rawkey",
            got: 10,
            need: 128,
        };
        assert_eq!(err.to_string(), "rawkey too small! (10 of 128 bytes)");
    }

    #[test]
    fn cancelled_is_soft() {
        assert_eq!(TfcError::Cancelled.exit_code(), 1);
        assert_eq!(TfcError::config("x").exit_code(), 2);
    }
}
