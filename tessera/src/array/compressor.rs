//! Tile compressors.

use std::io::{Read, Write};

use derive_more::Display;

use crate::array::schema::SchemaError;

/// The compressor applied to the tiles of an attribute or to coordinate
/// tiles.
///
/// Levels are codec specific; `-1` selects the codec default.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compressor {
    /// Tiles are stored raw.
    #[default]
    #[display("none")]
    None,
    /// Gzip (DEFLATE) compression.
    #[display("gzip")]
    Gzip,
    /// Zstandard compression.
    #[display("zstd")]
    Zstd,
}

impl Compressor {
    /// The serialized compressor code.
    pub(crate) const fn code(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Gzip => 1,
            Self::Zstd => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self, SchemaError> {
        Ok(match code {
            0 => Self::None,
            1 => Self::Gzip,
            2 => Self::Zstd,
            _ => {
                return Err(SchemaError::Corrupt(format!(
                    "unknown compressor code {code}"
                )))
            }
        })
    }

    /// Compress `data` at `level`.
    pub(crate) fn compress(&self, data: &[u8], level: i32) -> std::io::Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Gzip => {
                let compression = if level < 0 {
                    flate2::Compression::default()
                } else {
                    flate2::Compression::new(level.min(9) as u32)
                };
                let mut encoder = flate2::write::GzEncoder::new(Vec::new(), compression);
                encoder.write_all(data)?;
                encoder.finish()
            }
            Self::Zstd => {
                let level = if level < 0 { 0 } else { level };
                zstd::bulk::compress(data, level)
            }
        }
    }

    /// Decompress `data`, which decompresses to exactly `original_size`
    /// bytes.
    pub(crate) fn decompress(&self, data: &[u8], original_size: usize) -> std::io::Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Gzip => {
                let mut out = Vec::with_capacity(original_size);
                flate2::read::GzDecoder::new(data).read_to_end(&mut out)?;
                Ok(out)
            }
            Self::Zstd => zstd::bulk::decompress(data, original_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() -> std::io::Result<()> {
        let data: Vec<u8> = (0..4096u32).flat_map(|i| (i % 251).to_le_bytes()).collect();
        for compressor in [Compressor::None, Compressor::Gzip, Compressor::Zstd] {
            for level in [-1, 1, 5] {
                let compressed = compressor.compress(&data, level)?;
                let decompressed = compressor.decompress(&compressed, data.len())?;
                assert_eq!(decompressed, data, "{compressor} level {level}");
            }
        }
        Ok(())
    }

    #[test]
    fn compresses_repetitive_data() -> std::io::Result<()> {
        let data = vec![42u8; 1 << 16];
        for compressor in [Compressor::Gzip, Compressor::Zstd] {
            let compressed = compressor.compress(&data, -1)?;
            assert!(compressed.len() < data.len() / 10);
        }
        Ok(())
    }
}
