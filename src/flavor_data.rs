//! The optional WOFF/WOFF2 metadata XML blob and private data block.

use crate::directory::decompress_zlib;
use crate::error::{Error, bail_if};
use crate::header::{WoffHeader, WoffVersion};
use crate::reader::decompress_brotli;

/// Extra data a WOFF-family container may carry alongside the font tables.
///
/// The metadata block is stored compressed with the container's algorithm
/// (zlib for WOFF 1.0, brotli for WOFF 2.0); the private block is stored
/// verbatim. A `None` version makes the writer fall back to the head table's
/// fontRevision.
#[derive(Clone, Debug, Default)]
pub struct FlavorData {
    pub version: Option<(u16, u16)>,
    pub metadata: Option<Vec<u8>>,
    pub private_data: Option<Vec<u8>>,
}

impl FlavorData {
    pub fn is_empty(&self) -> bool {
        self.metadata.is_none() && self.private_data.is_none()
    }

    /// Read the metadata and private blocks referenced by a WOFF/WOFF2
    /// header. Block ranges were validated when the header was parsed.
    pub(crate) fn parse(header: &WoffHeader, data: &[u8]) -> Result<Self, Error> {
        let metadata = if header.meta_length > 0 {
            let start = header.meta_offset as usize;
            let raw = data
                .get(start..start + header.meta_length as usize)
                .ok_or(Error::TruncatedInput)?;
            let orig_length = header.meta_orig_length as usize;
            let decoded = match header.woff_version {
                WoffVersion::Woff1 => decompress_zlib(raw, orig_length)?,
                WoffVersion::Woff2 => decompress_brotli(raw, orig_length)?,
            };
            bail_if!(
                decoded.len() != orig_length,
                Error::Decompression(format!(
                    "unexpected size for decompressed metadata: expected {}, found {}",
                    orig_length,
                    decoded.len()
                ))
            );
            Some(decoded)
        } else {
            None
        };

        let private_data = if header.priv_length > 0 {
            let start = header.priv_offset as usize;
            let raw = data
                .get(start..start + header.priv_length as usize)
                .ok_or(Error::TruncatedInput)?;
            Some(raw.to_vec())
        } else {
            None
        };

        Ok(Self {
            version: Some((header.major_version, header.minor_version)),
            metadata,
            private_data,
        })
    }
}
