//! zstd compression policy for stored blobs.

use crate::config::CompressionOptions;
use std::io::{self, Read, Write};
use std::path::Path;

/// Frame magic every zstd stream starts with.
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

const STREAM_CHUNK: usize = 1024 * 1024;

pub fn is_zstd(data: &[u8]) -> bool {
    data.starts_with(&ZSTD_MAGIC)
}

#[derive(Debug, Clone)]
pub struct Compressor {
    opts: CompressionOptions,
}

impl Compressor {
    pub fn new(opts: CompressionOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &CompressionOptions {
        &self.opts
    }

    pub fn should_compress(&self, path: Option<&Path>, size: usize) -> bool {
        if !self.opts.enabled || size < self.opts.min_size {
            return false;
        }

        let ext = path
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()));

        match ext {
            Some(ext) => !self
                .opts
                .skip_extensions
                .iter()
                .any(|skip| skip.eq_ignore_ascii_case(&ext)),
            None => true,
        }
    }

    /// Compresses `content` if policy allows and the result is smaller.
    /// `None` means the caller should store the bytes as-is.
    pub fn encode(&self, path: Option<&Path>, content: &[u8]) -> io::Result<Option<Vec<u8>>> {
        if !self.should_compress(path, content.len()) {
            return Ok(None);
        }

        let compressed = if content.len() > self.opts.streaming_threshold {
            self.compress_stream(content)?
        } else {
            zstd::bulk::compress(content, self.opts.level)?
        };

        if compressed.len() >= content.len() {
            return Ok(None);
        }
        Ok(Some(compressed))
    }

    fn compress_stream(&self, content: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = zstd::stream::Encoder::new(Vec::new(), self.opts.level)?;
        for chunk in content.chunks(STREAM_CHUNK) {
            encoder.write_all(chunk)?;
        }
        encoder.finish()
    }

    /// Decodes bytes that are known to be a zstd frame.
    pub fn decode(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        if data.len() > self.opts.streaming_threshold {
            let mut decoder = zstd::stream::Decoder::new(data)?;
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        } else {
            zstd::stream::decode_all(data)
        }
    }

    /// Decodes raw on-disk bytes without trusting any stored flag: frames
    /// starting with the zstd magic are decoded, anything else is returned
    /// unchanged. The flag reports which case applied.
    pub fn decode_auto(&self, data: &[u8]) -> io::Result<(Vec<u8>, bool)> {
        if is_zstd(data) {
            Ok((self.decode(data)?, true))
        } else {
            Ok((data.to_vec(), false))
        }
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(CompressionOptions::default())
    }
}
