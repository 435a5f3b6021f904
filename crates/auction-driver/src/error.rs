// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for auction accelerator operations

use auction_chip::regs::Register;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for auction accelerator operations
pub type Result<T> = std::result::Result<T, AuctionError>;

/// Errors that can occur while driving or validating the accelerator
#[derive(Debug, Error)]
pub enum AuctionError {
    /// The signature register does not hold the auction magic value
    #[error("Unexpected accelerator signature {found:#010x} (expected {expected:#010x}), is the correct bitfile loaded?")]
    UnexpectedSignature {
        /// Value read from the signature register
        found: u32,
        /// Expected magic value
        expected: u32,
    },

    /// Protocol operation issued in the wrong state
    #[error("Cannot {operation} while accelerator is {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// Current protocol state
        state: String,
    },

    /// Marshalled reward buffer would not fit the device buffer
    #[error("Reward buffer needs {required} bytes but capacity is {capacity} bytes")]
    CapacityExceeded {
        /// Bytes the matrix needs
        required: usize,
        /// Capacity of the active layout
        capacity: usize,
    },

    /// Problem has more objects than a buffer row can hold
    #[error("{objects} objects exceed the row stride of {stride}")]
    ObjectsExceedStride {
        /// Object count of the problem
        objects: usize,
        /// Row stride of the active layout
        stride: usize,
    },

    /// Status register name not present in the register table
    #[error("Unknown register: {name}")]
    UnknownRegister {
        /// Requested name
        name: String,
    },

    /// Status value spans more than one 32-bit register
    #[error(">32 bit status registers are not supported: {register}")]
    UnsupportedWideRegister {
        /// Register that was requested
        register: Register,
    },

    /// Register is write-only
    #[error("Register {register} is not readable")]
    NotReadable {
        /// Register that was requested
        register: Register,
    },

    /// Completion poll hit its bound before the accelerator finished
    #[error("Accelerator did not finish after {polls} polls ({elapsed:?})")]
    PollTimeout {
        /// Number of status reads performed
        polls: u64,
        /// Time spent polling
        elapsed: Duration,
    },

    /// Completion poll was cancelled
    #[error("Polling cancelled after {polls} polls")]
    Cancelled {
        /// Number of status reads performed
        polls: u64,
    },

    /// Reward matrix or problem file is malformed
    #[error("Invalid problem: {reason}")]
    InvalidProblem {
        /// Reason for rejection
        reason: String,
    },

    /// Buffer contents do not match the expected layout
    #[error("Malformed buffer: {reason}")]
    MalformedBuffer {
        /// Reason for rejection
        reason: String,
    },

    /// Platform collaborator failed (register access, memory, copies)
    #[error("Platform error: {reason}")]
    Platform {
        /// Reason for failure
        reason: String,
    },

    /// Configuration could not be loaded
    #[error("Configuration error in {path}: {reason}")]
    Config {
        /// File the configuration came from
        path: PathBuf,
        /// Reason for failure
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl AuctionError {
    /// Create an invalid state error
    pub fn invalid_state(operation: &'static str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }

    /// Create an invalid problem error
    pub fn invalid_problem(reason: impl Into<String>) -> Self {
        Self::InvalidProblem {
            reason: reason.into(),
        }
    }

    /// Create a malformed buffer error
    pub fn malformed_buffer(reason: impl Into<String>) -> Self {
        Self::MalformedBuffer {
            reason: reason.into(),
        }
    }

    /// Create a platform error
    pub fn platform(reason: impl Into<String>) -> Self {
        Self::Platform {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
