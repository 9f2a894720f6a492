use std::fmt;

use failure::Backtrace;
use failure::Context;
use failure::Fail;

/// Error information returned by this crate's API in case of errors.
#[derive(Debug)]
pub struct Error(Context<ErrorKind>);

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.0.get_context().clone()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error(Context::new(kind))
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error(inner)
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.0.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.0.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Exhaustive list of possible errors emitted by this crate.
///
/// See `# 7. ERROR HANDLING DESIGN` for the policy attached to each kind: `ConfigMissing` and
/// `IllegalState` are fatal to the caller, `InvalidArgument` is fatal to the single call only,
/// `Transient` is retried on the worker's next tick, `Abandoned` is logged but treated as a
/// successful ack for commit purposes.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "required configuration option '{}' is missing", _0)]
    ConfigMissing(&'static str),

    #[fail(display = "invalid argument: {}", _0)]
    InvalidArgument(String),

    #[fail(display = "illegal state: {}", _0)]
    IllegalState(&'static str),

    #[fail(display = "{} failed due to a transient error", _0)]
    Transient(&'static str),

    #[fail(display = "message was abandoned after exhausting retries")]
    Abandoned,

    #[fail(display = "connection to the log consumer backend failed")]
    BackendConnect,

    #[fail(display = "{} failed due to a log consumer backend error", _0)]
    Backend(&'static str),

    #[fail(display = "failed to decode {}", _0)]
    Decode(&'static str),

    #[fail(display = "failed to encode {}", _0)]
    Encode(&'static str),

    #[fail(display = "unable to spawn thread for '{}'", _0)]
    SpawnThread(&'static str),

    #[fail(display = "{}", _0)]
    Msg(String),
}

/// Short form alias for functions returning this crate's `Error`.
pub type Result<T> = ::std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use failure::Fail;

    use super::Error;
    use super::ErrorKind;

    #[test]
    fn kind_is_preserved() {
        let error: Error = ErrorKind::IllegalState("open called twice").into();
        match error.kind() {
            ErrorKind::IllegalState(msg) => assert_eq!(msg, "open called twice"),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn display_is_human_readable() {
        let error: Error = ErrorKind::ConfigMissing("consumerIdPrefix").into();
        assert_eq!(
            error.to_string(),
            "required configuration option 'consumerIdPrefix' is missing"
        );
    }

    #[test]
    fn cause_chain_is_preserved() {
        let root: Error = ErrorKind::Msg("root cause".into()).into();
        let wrapped = root.context(ErrorKind::Backend("poll"));
        let wrapped: Error = wrapped.into();
        assert!(wrapped.cause().is_some());
    }
}
