//! Waveform object decoding
//!
//! Daily objects in the cloud layout are decoded through [`WaveformDecoder`],
//! the seam where a miniSEED or SAC decoder plugs in. [`NativeTraceDecoder`]
//! reads the crate's own single-trace format:
//!
//! ```text
//! Magic "NSTR" (4) | Version u16 (2) | Rate f64 (8) | Start f64 (8) |
//! Count u32 (4) | Samples f32 × Count | CRC32 of everything before (4)
//! ```

use crate::error::{Result, StoreError};

use super::ChannelData;

const TRACE_MAGIC: &[u8; 4] = b"NSTR";
const TRACE_VERSION: u16 = 1;
const TRACE_HEADER_SIZE: usize = 26;

/// Turns one fetched object into samples
pub trait WaveformDecoder: Send + Sync {
    /// Decode, failing with `CorruptData` on anything malformed
    fn decode(&self, bytes: &[u8]) -> Result<ChannelData>;
}

/// Decoder for the native trace format
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeTraceDecoder;

impl WaveformDecoder for NativeTraceDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<ChannelData> {
        if bytes.len() < TRACE_HEADER_SIZE + 4 {
            return Err(StoreError::CorruptData(format!(
                "trace too short ({} bytes)",
                bytes.len()
            )));
        }
        if &bytes[0..4] != TRACE_MAGIC {
            return Err(StoreError::CorruptData("not a trace object".to_string()));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != TRACE_VERSION {
            return Err(StoreError::CorruptData(format!(
                "unsupported trace version {}",
                version
            )));
        }

        let body_len = bytes.len() - 4;
        let stored_crc = u32::from_le_bytes(array(&bytes[body_len..]));
        if crc32fast::hash(&bytes[..body_len]) != stored_crc {
            return Err(StoreError::CorruptData("trace checksum mismatch".to_string()));
        }

        let sampling_rate = f64::from_le_bytes(array(&bytes[6..14]));
        let start_timestamp = f64::from_le_bytes(array(&bytes[14..22]));
        let count = u32::from_le_bytes(array(&bytes[22..26])) as usize;

        if body_len != TRACE_HEADER_SIZE + count * 4 {
            return Err(StoreError::CorruptData(format!(
                "trace declares {} samples but carries {} bytes",
                count,
                body_len - TRACE_HEADER_SIZE
            )));
        }

        let data = bytes[TRACE_HEADER_SIZE..body_len]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(array(c)))
            .collect();

        Ok(ChannelData::new(data, sampling_rate, start_timestamp))
    }
}

/// Encode samples in the native trace format
pub fn encode_trace(data: &ChannelData) -> Vec<u8> {
    let mut out = Vec::with_capacity(TRACE_HEADER_SIZE + data.data.len() * 4 + 4);
    out.extend_from_slice(TRACE_MAGIC);
    out.extend_from_slice(&TRACE_VERSION.to_le_bytes());
    out.extend_from_slice(&data.sampling_rate.to_le_bytes());
    out.extend_from_slice(&data.start_timestamp.to_le_bytes());
    out.extend_from_slice(&(data.data.len() as u32).to_le_bytes());
    for sample in &data.data {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_native_trace() {
        let data = ChannelData::new(vec![1.0, -2.5, 3.25], 40.0, 1_600_000_000.5);
        let decoded = NativeTraceDecoder.decode(&encode_trace(&data)).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_flipped_byte_is_corrupt() {
        let mut bytes = encode_trace(&ChannelData::new(vec![1.0; 8], 20.0, 0.0));
        bytes[30] ^= 0xff;
        assert!(matches!(
            NativeTraceDecoder.decode(&bytes),
            Err(StoreError::CorruptData(_))
        ));
    }

    #[test]
    fn test_truncated_trace_is_corrupt() {
        let bytes = encode_trace(&ChannelData::new(vec![1.0; 8], 20.0, 0.0));
        assert!(NativeTraceDecoder.decode(&bytes[..20]).is_err());
    }
}
