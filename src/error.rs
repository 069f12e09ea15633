use std::io;

use thiserror::Error;

use crate::State;

/// The default error type carried by a failed [`Promise`](crate::Promise).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    /// A producer tried to settle a promise that had already succeeded or failed.
    ///
    /// This is a misuse of the producer side, not a race. Losing to a
    /// cancellation is never reported through this variant.
    #[error("promise already settled as {0}")]
    AlreadySettled(State),
    #[error("work panicked: {0}")]
    Panicked(String),
    #[error("promise dropped before it settled")]
    Abandoned,
    #[error("failed to spawn thread {name:?}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid value {value:?} for {key}")]
    InvalidConfig { key: &'static str, value: String },
}

impl Error {
    /// Whether this error reports a broken producer contract.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::AlreadySettled(_))
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Error::Panicked(message)
    }
}
