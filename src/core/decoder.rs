use crate::types::{CodeGrid, ConcentrationGrid, IceError, IceResult};
use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Fixed layout of an NSIDC daily concentration file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridLayout {
    /// Number of rows
    pub height: usize,
    /// Number of columns
    pub width: usize,
    /// Bytes of header preceding the grid
    pub header_offset: usize,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            height: 448,
            width: 304,
            header_offset: 300,
        }
    }
}

impl GridLayout {
    /// Exact byte length of a valid file
    pub fn expected_len(&self) -> usize {
        self.header_offset + self.width * self.height
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.height, self.width)
    }
}

/// Decoder for flat-binary concentration charts
#[derive(Debug, Clone, Default)]
pub struct GridDecoder {
    layout: GridLayout,
}

impl GridDecoder {
    pub fn new(layout: GridLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Decode raw bytes into a grid of unchanged codes.
    ///
    /// Gzip-compressed input is inflated first; the length check applies
    /// to the inflated payload.
    pub fn decode(&self, bytes: &[u8]) -> IceResult<CodeGrid> {
        let payload = Self::inflate_if_gzipped(bytes)?;
        let expected = self.layout.expected_len();

        if payload.len() != expected {
            return Err(IceError::Decode {
                expected,
                actual: payload.len(),
            });
        }

        let codes = payload[self.layout.header_offset..].to_vec();
        Array2::from_shape_vec(self.layout.dim(), codes)
            .map_err(|e| IceError::Processing(format!("Failed to reshape chart: {}", e)))
    }

    pub fn decode_grid(&self, date: NaiveDate, bytes: &[u8]) -> IceResult<ConcentrationGrid> {
        log::debug!("Decoding chart for {} ({} bytes)", date, bytes.len());
        Ok(ConcentrationGrid::new(date, self.decode(bytes)?))
    }

    fn is_gzip_content(content: &[u8]) -> bool {
        content.len() >= 2 && content[0] == 0x1f && content[1] == 0x8b
    }

    fn inflate_if_gzipped(bytes: &[u8]) -> IceResult<Cow<'_, [u8]>> {
        use flate2::read::GzDecoder;
        use std::io::Read;

        if !Self::is_gzip_content(bytes) {
            return Ok(Cow::Borrowed(bytes));
        }

        let mut decoder = GzDecoder::new(bytes);
        let mut inflated = Vec::new();
        decoder
            .read_to_end(&mut inflated)
            .map_err(|e| IceError::CorruptCompression(e.to_string()))?;

        log::debug!("Decompressed {} -> {} bytes", bytes.len(), inflated.len());
        Ok(Cow::Owned(inflated))
    }
}
