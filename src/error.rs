use core::fmt::Debug;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Failures surfaced by stack bring-up and advertising.
///
/// `E` is the error type of the platform BLE stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error<E: Debug> {
    /// The stack refused the enable request.
    #[error("stack enable failed: {0:?}")]
    Enable(E),
    /// The stack reported a failure from its readiness callback.
    #[error("stack readiness reported error {0}")]
    NotReady(i32),
    /// The stack never reported readiness.
    #[error("stack not ready before timeout")]
    ReadyTimeout,
    /// Advertising could not be started.
    #[error("advertising failed to start: {0:?}")]
    Advertise(E),
    /// An AD structure did not fit its buffer.
    #[error("advertising data does not fit buffer")]
    Encode,
}

/// Attribute protocol error codes returned to the peer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, thiserror::Error)]
pub enum AttError {
    #[error("invalid handle")]
    InvalidHandle = 0x01,
    #[error("read not permitted")]
    ReadNotPermitted = 0x02,
    #[error("write not permitted")]
    WriteNotPermitted = 0x03,
    #[error("invalid offset")]
    InvalidOffset = 0x07,
    #[error("invalid attribute value length")]
    InvalidAttributeValueLength = 0x0D,
    #[error("unlikely error")]
    UnlikelyError = 0x0E,
}
