use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::{DownloadError, SymmetricKey, UNIT_OVERHEAD};

/// Marks content stored through the storage network, which carries a
/// 32-byte header in front of the payload.
pub const MAGIC: &[u8; 10] = b"$$dcfile$$";

/// Length of the storage header: the magic followed by an opaque tag.
pub const HEADER_LEN: usize = 32;

/// Plaintext bytes per unit.
pub const UNIT_SIZE: usize = 3 * 1024 * 1024;

/// Splits a content stream into fixed-size units and decrypts each one.
///
/// Unit boundaries are absolute offsets from the start of the payload, so
/// input is buffered until a whole unit is available regardless of how the
/// transport chunks it. The last unit may be shorter and is only decoded by
/// [`ChunkDecoder::finish`].
#[derive(Debug)]
pub struct ChunkDecoder {
    key: Option<SymmetricKey>,
    unit_len: usize,
    buf: BytesMut,
    header_checked: bool,
    units: u64,
}

impl ChunkDecoder {
    pub fn new(key: Option<SymmetricKey>) -> Self {
        let unit_len = match key {
            Some(_) => UNIT_SIZE + UNIT_OVERHEAD,
            None => UNIT_SIZE,
        };

        Self {
            key,
            unit_len,
            buf: BytesMut::new(),
            header_checked: false,
            units: 0,
        }
    }

    /// Stored length of one full unit.
    pub fn unit_len(&self) -> usize {
        self.unit_len
    }

    /// Units decoded so far.
    pub fn units(&self) -> u64 {
        self.units
    }

    /// Buffers `input` and returns the units it completed, in stream order.
    pub fn push(&mut self, input: &[u8]) -> Result<Vec<Bytes>, DownloadError> {
        self.buf.extend_from_slice(input);

        if !self.header_checked {
            if self.buf.len() < HEADER_LEN {
                return Ok(Vec::new());
            }
            self.strip_header();
        }

        let mut units = Vec::new();
        while self.buf.len() >= self.unit_len {
            let unit = self.buf.split_to(self.unit_len).freeze();
            units.push(self.decode(unit)?);
        }

        Ok(units)
    }

    /// Decodes whatever is left once the input has ended.
    ///
    /// A stream shorter than the header is taken as bare payload.
    pub fn finish(mut self) -> Result<Option<Bytes>, DownloadError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let rest = self.buf.split().freeze();
        self.decode(rest).map(Some)
    }

    fn strip_header(&mut self) {
        self.header_checked = true;

        if self.buf.starts_with(MAGIC) {
            debug!("Stripping storage header");
            self.buf.advance(HEADER_LEN);
        }
    }

    fn decode(&mut self, unit: Bytes) -> Result<Bytes, DownloadError> {
        let index = self.units;
        self.units += 1;

        trace!(unit = index, len = unit.len(), "Decoding unit");

        match &self.key {
            None => Ok(unit),
            Some(key) => key
                .decrypt_unit(&unit)
                .map(Bytes::from)
                .ok_or(DownloadError::DecryptionFailed { unit: index }),
        }
    }
}
