//! Error types for kernel compilation and dispatch.
//!
//! All compilation errors are fatal for the current compilation; there is no
//! local recovery. Each variant carries enough structure to identify the
//! failing instruction where one exists.

use thiserror::Error;

/// Main error type for QPU kernel compilation and dispatch.
#[derive(Error, Debug)]
pub enum QpuError {
    #[error("lowering failed: {reason}")]
    Lowering { reason: String },

    #[error("CFG construction failed: dangling label {label}")]
    Cfg { label: u32 },

    #[error("register allocation failed for instruction {index} `{mnemonic}`: {reason}")]
    Alloc {
        index: usize,
        mnemonic: String,
        reason: String,
    },

    #[error("encoding failed for instruction {index} `{mnemonic}`: {reason}")]
    Encode {
        index: usize,
        mnemonic: String,
        reason: String,
    },

    #[error("dispatch failed: {reason}")]
    Dispatch { reason: String },

    #[error("invalid usage: {reason}")]
    Usage { reason: String },
}

impl QpuError {
    pub fn lowering(reason: impl Into<String>) -> Self {
        QpuError::Lowering {
            reason: reason.into(),
        }
    }

    pub fn usage(reason: impl Into<String>) -> Self {
        QpuError::Usage {
            reason: reason.into(),
        }
    }

    pub fn dispatch(reason: impl Into<String>) -> Self {
        QpuError::Dispatch {
            reason: reason.into(),
        }
    }
}

/// Result type alias for all fallible qpukit operations.
pub type Result<T> = std::result::Result<T, QpuError>;
