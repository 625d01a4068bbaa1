//! Error types for Horizon Signal.

use crate::signature::{ArityRange, MismatchList, SignatureList};

/// Boxed error type that slots may return from a fallible invocation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A specialized Result type for signal operations.
pub type Result<T> = std::result::Result<T, SignalError>;

/// Errors raised by connecting, disconnecting, or emitting.
///
/// All errors are synchronous and local to the call that produced them.
/// Subscriptions whose receiver has been dropped are never reported here;
/// they are pruned silently during the next emission.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The callback cannot be invoked at all.
    #[error("cannot connect slot '{callback}': {reason}")]
    InvalidCallback {
        /// Display name of the rejected callback.
        callback: String,
        /// Why the callback is unusable.
        reason: String,
    },

    /// None of the declared signatures accepts the callback.
    #[error(
        "cannot connect slot '{callback}' taking {arity} positional arguments:\n{attempts}\n\naccepted signatures: {accepted}"
    )]
    IncompatibleSignature {
        /// Display name of the rejected callback.
        callback: String,
        /// Accepted positional argument range of the callback.
        arity: ArityRange,
        /// Every signature tried, with the reason it was rejected.
        attempts: MismatchList,
        /// All signatures declared on the channel.
        accepted: SignatureList,
    },

    /// The callback is already connected and uniqueness was required.
    #[error(
        "slot '{callback}' is already connected; use Unique::Allow to permit duplicate connections"
    )]
    DuplicateSubscription {
        /// Display name of the duplicate callback.
        callback: String,
    },

    /// The callback is not connected to this dispatcher.
    #[error("slot '{callback}' is not connected")]
    NotConnected {
        /// Display name of the missing callback.
        callback: String,
    },

    /// An emitted argument could not be converted to the slot's parameter type.
    #[error(
        "slot '{callback}' expected {expected} at position {position}, but the emitted argument was {found}"
    )]
    ArgumentType {
        /// Display name of the slot being invoked.
        callback: String,
        /// Zero-based argument position.
        position: usize,
        /// Type the slot declared.
        expected: &'static str,
        /// Type that was emitted.
        found: &'static str,
    },

    /// A slot returned an error during emission.
    #[error("slot '{callback}' failed: {source}")]
    SlotFailed {
        /// Display name of the failing slot.
        callback: String,
        /// The error the slot returned.
        #[source]
        source: BoxError,
    },
}

impl SignalError {
    /// Create an invalid-callback error.
    pub fn invalid_callback(callback: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCallback {
            callback: callback.into(),
            reason: reason.into(),
        }
    }

    /// Create a slot failure error.
    pub fn slot_failed(callback: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::SlotFailed {
            callback: callback.into(),
            source: source.into(),
        }
    }

    /// Whether this error was produced by a slot while emitting, rather than
    /// by a rejected connect or disconnect call.
    pub fn is_emission_error(&self) -> bool {
        matches!(self, Self::ArgumentType { .. } | Self::SlotFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_failed_keeps_source() {
        let err = SignalError::slot_failed("on_click", "disk full");
        assert!(err.is_emission_error());
        assert_eq!(err.to_string(), "slot 'on_click' failed: disk full");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_connect_errors_are_not_emission_errors() {
        let err = SignalError::NotConnected {
            callback: "handler".into(),
        };
        assert!(!err.is_emission_error());
        assert_eq!(err.to_string(), "slot 'handler' is not connected");
    }
}
