//! Read and write handlers of the characteristic value.

use log::info;

use crate::config::READ_VALUE;
use crate::error::AttError;

/// Copy the fixed read value, starting at `offset`, into `buf`.
///
/// Returns the number of bytes written, `min(buf.len(), READ_VALUE.len() - offset)`.
/// An offset past the end of the value is rejected with [`AttError::InvalidOffset`];
/// an offset equal to the length is a valid empty read.
pub fn on_read(offset: u16, buf: &mut [u8]) -> Result<usize, AttError> {
    read_at(&READ_VALUE, offset, buf)
}

/// Offset-aware copy of an attribute value, shared by every readable attribute.
pub fn read_at(value: &[u8], offset: u16, buf: &mut [u8]) -> Result<usize, AttError> {
    let offset = usize::from(offset);
    if offset > value.len() {
        return Err(AttError::InvalidOffset);
    }

    let remaining = &value[offset..];
    let len = remaining.len().min(buf.len());
    buf[..len].copy_from_slice(&remaining[..len]);
    Ok(len)
}

/// Sink for incoming writes. Only logs what was received.
pub fn on_write(data: &[u8], offset: u16) {
    info!(
        "Received {} bytes (offset {}): {:02X?}",
        data.len(),
        offset,
        data
    );
}
