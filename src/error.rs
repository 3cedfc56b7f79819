//! Unified error types.

use std::any::Any;
use std::fmt;

/// The error type returned by keel's fallible operations.
///
/// Application-level outcomes (404, 405, a failed form decode) are expressed
/// as HTTP responses, not as `Error`s. This type surfaces construction-time
/// and infrastructure failures: invalid settings, bad route patterns, binding
/// to a port or accepting a connection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid setting `{key}`: {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    #[error("invalid route `{path}`: {reason}")]
    InvalidRoute { path: String, reason: String },
}

/// Where in the pipeline a handler fault was caught.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Middleware,
    Dispatch,
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Middleware => "middleware",
            Self::Dispatch => "dispatch",
            Self::Render => "render",
        })
    }
}

/// A panic raised by user code and caught at a pipeline boundary.
///
/// The finalizer turns it into a generic `500 Internal Server Error`; the
/// payload only ever reaches the log.
#[derive(Clone, Debug, thiserror::Error)]
#[error("handler fault during {stage}: {message}")]
pub struct HandlerFault {
    pub stage: Stage,
    pub message: String,
}

impl HandlerFault {
    pub(crate) fn from_panic(stage: Stage, payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self { stage, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_stringified() {
        let payload: Box<dyn Any + Send> = Box::new("panic flow testing");
        let fault = HandlerFault::from_panic(Stage::Dispatch, payload.as_ref());
        assert_eq!(fault.message, "panic flow testing");
        assert_eq!(fault.to_string(), "handler fault during dispatch: panic flow testing");

        let payload: Box<dyn Any + Send> = Box::new(format!("code {}", 7));
        assert_eq!(HandlerFault::from_panic(Stage::Render, payload.as_ref()).message, "code 7");

        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(
            HandlerFault::from_panic(Stage::Middleware, payload.as_ref()).message,
            "non-string panic payload"
        );
    }
}
