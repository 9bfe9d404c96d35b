//! Error types for the provider.
//!
//! Every failure is reported synchronously at the call that caused it. Failures
//! of transfers that were already accepted by the transport are reported
//! through completion events instead, never through this type.

use thiserror::Error;

use crate::transport::TransportStatus;

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Error variants for provider operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// A required argument was missing or malformed.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: &'static str,
    },

    /// The option level is not recognized.
    #[error("unsupported option level {0}")]
    UnsupportedOptionLevel(i32),

    /// The option name is not recognized at the endpoint level.
    #[error("unsupported option name {0}")]
    UnsupportedOptionName(i32),

    /// A connection-oriented operation was issued without a bound peer.
    #[error("endpoint not connected")]
    NotConnected,

    /// The request pool has no free descriptor.
    #[error("request pool exhausted ({capacity} descriptors in flight)")]
    ResourceExhausted {
        /// Capacity of the exhausted pool.
        capacity: usize,
    },

    /// The transport refused to initiate the operation.
    #[error("transport rejected operation: {0}")]
    Transport(TransportStatus),

    /// The endpoint still has operations in flight.
    #[error("endpoint busy: {outstanding} operations outstanding")]
    Busy {
        /// Number of descriptors still in flight.
        outstanding: usize,
    },

    /// The endpoint has already been closed.
    #[error("endpoint closed")]
    Closed,

    /// Provider configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ProviderError {
    pub(crate) fn invalid(reason: &'static str) -> Self {
        Self::InvalidArgument { reason }
    }

    /// Negative errno value for this error, as a fabric-interface return code.
    pub fn errno(&self) -> isize {
        let code = match self {
            Self::InvalidArgument { .. } | Self::Config(_) => libc::EINVAL,
            Self::UnsupportedOptionLevel(_) | Self::UnsupportedOptionName(_) => libc::ENOPROTOOPT,
            Self::NotConnected => libc::ENOTCONN,
            Self::ResourceExhausted { .. } => libc::EAGAIN,
            Self::Transport(status) => status.errno(),
            Self::Busy { .. } => libc::EBUSY,
            Self::Closed => libc::EBADF,
        };
        -(code as isize)
    }
}

impl From<TransportStatus> for ProviderError {
    fn from(status: TransportStatus) -> Self {
        Self::Transport(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_alias() {
        let ok: Result<usize> = Ok(8);
        assert!(ok.is_ok());

        let err: Result<usize> = Err(ProviderError::NotConnected);
        assert!(err.is_err());
    }

    #[test]
    fn test_option_errors_share_errno() {
        assert_eq!(
            ProviderError::UnsupportedOptionLevel(1).errno(),
            -(libc::ENOPROTOOPT as isize)
        );
        assert_eq!(
            ProviderError::UnsupportedOptionName(7).errno(),
            -(libc::ENOPROTOOPT as isize)
        );
        assert_ne!(
            ProviderError::UnsupportedOptionLevel(1),
            ProviderError::UnsupportedOptionName(1)
        );
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(ProviderError::invalid("x").errno(), -(libc::EINVAL as isize));
        assert_eq!(ProviderError::NotConnected.errno(), -(libc::ENOTCONN as isize));
        assert_eq!(
            ProviderError::ResourceExhausted { capacity: 4 }.errno(),
            -(libc::EAGAIN as isize)
        );
        assert_eq!(
            ProviderError::Busy { outstanding: 2 }.errno(),
            -(libc::EBUSY as isize)
        );
    }

    #[test]
    fn test_transport_status_conversion() {
        let err: ProviderError = TransportStatus::NoAddressEntry.into();
        assert_eq!(err, ProviderError::Transport(TransportStatus::NoAddressEntry));
        assert!(format!("{}", err).contains("transport rejected"));
    }

    #[test]
    fn test_display() {
        let err = ProviderError::ResourceExhausted { capacity: 64 };
        assert_eq!(
            format!("{}", err),
            "request pool exhausted (64 descriptors in flight)"
        );
        assert_eq!(format!("{}", ProviderError::NotConnected), "endpoint not connected");
    }
}
