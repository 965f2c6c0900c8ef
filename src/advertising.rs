//! Advertising and scan response payloads.

use crate::config::MANUFACTURER_DATA;

/// Maximum size of a legacy advertising or scan response payload.
pub const LEGACY_AD_LEN: usize = 31;

pub const AD_FLAGS: u8 = 0x01;
pub const AD_SHORTENED_LOCAL_NAME: u8 = 0x08;
pub const AD_COMPLETE_LOCAL_NAME: u8 = 0x09;
pub const AD_MANUFACTURER_SPECIFIC: u8 = 0xFF;

pub const LE_GENERAL_DISCOVERABLE: u8 = 0x02;
pub const BR_EDR_NOT_SUPPORTED: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferTooSmall;

/// One AD structure: `[len][type][data..]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdStructure<'a> {
    Flags(u8),
    ManufacturerSpecific(&'a [u8]),
    CompleteLocalName(&'a [u8]),
    ShortenedLocalName(&'a [u8]),
}

impl AdStructure<'_> {
    fn kind(&self) -> u8 {
        match self {
            Self::Flags(_) => AD_FLAGS,
            Self::ManufacturerSpecific(_) => AD_MANUFACTURER_SPECIFIC,
            Self::CompleteLocalName(_) => AD_COMPLETE_LOCAL_NAME,
            Self::ShortenedLocalName(_) => AD_SHORTENED_LOCAL_NAME,
        }
    }

    pub fn encoded_len(&self) -> usize {
        2 + match self {
            Self::Flags(_) => 1,
            Self::ManufacturerSpecific(d) | Self::CompleteLocalName(d) | Self::ShortenedLocalName(d) => {
                d.len()
            }
        }
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, BufferTooSmall> {
        let len = self.encoded_len();
        if buf.len() < len || len - 1 > usize::from(u8::MAX) {
            return Err(BufferTooSmall);
        }
        buf[0] = (len - 1) as u8;
        buf[1] = self.kind();
        match self {
            Self::Flags(flags) => buf[2] = *flags,
            Self::ManufacturerSpecific(d) | Self::CompleteLocalName(d) | Self::ShortenedLocalName(d) => {
                buf[2..len].copy_from_slice(d)
            }
        }
        Ok(len)
    }

    /// Encode a sequence of structures back to back.
    pub fn encode_slice(structures: &[AdStructure<'_>], buf: &mut [u8]) -> Result<usize, BufferTooSmall> {
        let mut used = 0;
        for s in structures {
            used += s.encode(&mut buf[used..])?;
        }
        Ok(used)
    }
}

/// Manufacturer words as raw little-endian bytes, without a separate company identifier.
pub fn manufacturer_payload() -> [u8; 12] {
    let mut out = [0u8; 12];
    for (chunk, word) in out.chunks_exact_mut(4).zip(MANUFACTURER_DATA) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    out
}

/// Flags plus the manufacturer specific data. Returns the encoded length.
pub fn encode_advertising_data(buf: &mut [u8]) -> Result<usize, BufferTooSmall> {
    let payload = manufacturer_payload();
    AdStructure::encode_slice(
        &[
            AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
            AdStructure::ManufacturerSpecific(&payload),
        ],
        buf,
    )
}

/// Device name for the scan response, shortened when it does not fit.
pub fn encode_scan_response(name: &str, buf: &mut [u8]) -> Result<usize, BufferTooSmall> {
    let room = buf.len().min(LEGACY_AD_LEN).saturating_sub(2);
    let name = name.as_bytes();
    let ad = if name.len() <= room {
        AdStructure::CompleteLocalName(name)
    } else {
        AdStructure::ShortenedLocalName(&name[..room])
    };
    ad.encode(buf)
}
