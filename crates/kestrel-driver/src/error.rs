//! Error types for board-control operations

use thiserror::Error;

/// Result type alias for board-control operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during board-control operations
#[derive(Debug, Error)]
pub enum Error {
    /// Caller passed a value outside the accepted enumeration or range
    #[error("Invalid argument: {what}")]
    InvalidArgument {
        /// What was wrong with the argument
        what: String,
    },

    /// Hardware/software version mismatch; fatal to bring-up
    #[error(
        "{component} compat number mismatch: expected {}.{}, got {}.{}",
        .expected.0, .expected.1, .actual.0, .actual.1
    )]
    Compatibility {
        /// Component whose compat number was checked
        component: &'static str,
        /// Minimum version the software expects
        expected: (u8, u8),
        /// Version the hardware reported
        actual: (u8, u8),
    },

    /// A finite resource pool has been depleted
    #[error("Resource exhausted: {what}")]
    ResourceExhausted {
        /// Pool that ran dry
        what: String,
    },

    /// Operation requires state that has not been established yet
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Description of the missing precondition
        state: String,
    },

    /// Hardware reported a fault condition (non-fatal, diagnostic)
    #[error("Hardware fault: {reason}")]
    HardwareFault {
        /// Reason for the fault
        reason: String,
    },

    /// Operational call rejected because bring-up never completed
    #[error("Device not initialized: {reason}")]
    NotInitialized {
        /// Failure reason captured at bring-up
        reason: String,
    },

    /// Operation timed out
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// I/O error during register or GPIO access
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Create an invalid-argument error
    pub fn invalid_argument(what: impl Into<String>) -> Self {
        Self::InvalidArgument { what: what.into() }
    }

    /// Create a resource-exhausted error
    pub fn resource_exhausted(what: impl Into<String>) -> Self {
        Self::ResourceExhausted { what: what.into() }
    }

    /// Create an invalid-state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create a hardware-fault error
    pub fn hardware_fault(reason: impl Into<String>) -> Self {
        Self::HardwareFault {
            reason: reason.into(),
        }
    }

    /// Create a not-initialized error
    pub fn not_initialized(reason: impl Into<String>) -> Self {
        Self::NotInitialized {
            reason: reason.into(),
        }
    }
}
