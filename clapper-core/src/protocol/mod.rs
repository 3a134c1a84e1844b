//! VBAN wire-protocol decoding.
//!
//! ## Datagram layout
//!
//! Every VBAN audio datagram starts with a fixed 28-byte header:
//!
//! ```text
//! offset 0..4    magic "VBAN"
//! offset 4       sub-protocol (high 3 bits) | sample-rate index (low 5 bits)
//! offset 5       samples per frame, minus one
//! offset 6       channel count, minus one
//! offset 7       codec (high nibble) | data format (low 3 bits)
//! offset 8..24   stream name, ASCII, NUL-padded
//! offset 24..28  frame counter, u32 little-endian
//! offset 28..    interleaved PCM payload
//! ```
//!
//! Decoding is strict about the header and lenient about the payload: any
//! header field this receiver cannot handle rejects the whole datagram, while
//! a trailing partial sample in the payload is silently dropped. Non-finite
//! float samples are squashed to 0.0 so one hostile packet cannot poison the
//! downstream score math.

pub mod registry;

use std::net::SocketAddr;

use thiserror::Error;

/// UDP port VBAN senders target by default.
pub const VBAN_PORT: u16 = 6980;
/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 28;
/// Largest datagram a conformant sender emits (header plus 1408 payload bytes).
pub const MAX_DATAGRAM: usize = 1436;

const MAGIC: &[u8; 4] = b"VBAN";

/// Sample-rate lookup table indexed by the low 5 bits of header byte 4.
/// The order is fixed by the protocol; index 3 is the common 48 kHz case.
pub const SAMPLE_RATES: [u32; 20] = [
    6_000, 12_000, 24_000, 48_000, 96_000, 192_000, 384_000, 8_000, 16_000, 32_000, 64_000,
    128_000, 256_000, 512_000, 11_025, 22_050, 44_100, 88_200, 176_400, 352_800,
];

/// Why a datagram was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("datagram too short: {len} bytes, header needs {HEADER_LEN}")]
    TooShort { len: usize },

    #[error("bad magic, expected \"VBAN\"")]
    BadMagic,

    #[error("sample-rate index {0} out of range")]
    BadRateIndex(u8),

    #[error("unsupported sub-protocol {0:#x}")]
    UnsupportedSubProtocol(u8),

    #[error("unsupported sample format {0:#x}")]
    UnsupportedFormat(u8),
}

/// Payload sample encodings this receiver accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian PCM.
    I16,
    /// 32-bit float little-endian PCM.
    F32,
}

/// Parsed 28-byte VBAN header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub sample_rate: u32,
    pub samples_per_frame: u16,
    pub channels: u16,
    pub format: SampleFormat,
    pub stream_name: String,
    pub frame_counter: u32,
}

/// One decoded audio datagram: header plus interleaved f32 samples.
#[derive(Debug, Clone)]
pub struct DecodedPacket {
    pub src: SocketAddr,
    pub header: PacketHeader,
    pub samples: Vec<f32>,
}

impl DecodedPacket {
    /// Payload length in frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.header.channels as usize
    }
}

/// Decode one datagram received from `src`.
///
/// Only the audio sub-protocol with plain PCM payloads is accepted; i16
/// samples are normalized to f32 by dividing by 32768.
pub fn decode(datagram: &[u8], src: SocketAddr) -> Result<DecodedPacket, ProtocolError> {
    if datagram.len() < HEADER_LEN {
        return Err(ProtocolError::TooShort {
            len: datagram.len(),
        });
    }
    if &datagram[..4] != MAGIC {
        return Err(ProtocolError::BadMagic);
    }

    let sub_protocol = datagram[4] >> 5;
    if sub_protocol != 0 {
        return Err(ProtocolError::UnsupportedSubProtocol(sub_protocol));
    }
    let rate_index = datagram[4] & 0x1f;
    let sample_rate = *SAMPLE_RATES
        .get(rate_index as usize)
        .ok_or(ProtocolError::BadRateIndex(rate_index))?;

    // Both counts are stored off by one so a byte can express 1..=256.
    let samples_per_frame = datagram[5] as u16 + 1;
    let channels = datagram[6] as u16 + 1;

    let format_byte = datagram[7];
    if format_byte >> 4 != 0 {
        // High nibble is a codec tag; only plain PCM (0) is handled.
        return Err(ProtocolError::UnsupportedFormat(format_byte));
    }
    let format = match format_byte & 0x07 {
        0x01 => SampleFormat::I16,
        0x04 => SampleFormat::F32,
        _ => return Err(ProtocolError::UnsupportedFormat(format_byte)),
    };

    let stream_name = clean_stream_name(&datagram[8..24]);
    let frame_counter =
        u32::from_le_bytes([datagram[24], datagram[25], datagram[26], datagram[27]]);

    let payload = &datagram[HEADER_LEN..];
    let samples = match format {
        SampleFormat::I16 => payload
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect(),
        SampleFormat::F32 => payload
            .chunks_exact(4)
            .map(|b| {
                let v = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                if v.is_finite() {
                    v
                } else {
                    0.0
                }
            })
            .collect(),
    };

    Ok(DecodedPacket {
        src,
        header: PacketHeader {
            sample_rate,
            samples_per_frame,
            channels,
            format,
            stream_name,
            frame_counter,
        },
        samples,
    })
}

/// Decode the 16-byte stream-name field.
///
/// Real senders pad with NULs and the occasional stale byte. Truncate at the
/// first non-printable byte, trim whitespace, then strip trailing punctuation.
fn clean_stream_name(raw: &[u8]) -> String {
    let printable_len = raw
        .iter()
        .position(|&b| !(0x20..=0x7e).contains(&b))
        .unwrap_or(raw.len());
    let text: String = raw[..printable_len].iter().map(|&b| b as char).collect();
    text.trim()
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src() -> SocketAddr {
        "192.168.1.50:6980".parse().unwrap()
    }

    /// Build a datagram with the given header bytes and an empty payload.
    fn header(byte4: u8, byte6: u8, byte7: u8, name: &str) -> Vec<u8> {
        let mut d = Vec::with_capacity(HEADER_LEN);
        d.extend_from_slice(b"VBAN");
        d.push(byte4);
        d.push(255); // 256 samples per frame
        d.push(byte6);
        d.push(byte7);
        let mut name_field = [0u8; 16];
        for (i, b) in name.bytes().take(16).enumerate() {
            name_field[i] = b;
        }
        d.extend_from_slice(&name_field);
        d.extend_from_slice(&7u32.to_le_bytes());
        d
    }

    #[test]
    fn rate_index_three_decodes_as_48_khz() {
        let p = decode(&header(0x03, 0, 0x01, "Mic"), src()).unwrap();
        assert_eq!(p.header.sample_rate, 48_000);
        assert_eq!(p.header.samples_per_frame, 256);
        assert_eq!(p.header.channels, 1);
        assert_eq!(p.header.format, SampleFormat::I16);
        assert_eq!(p.header.frame_counter, 7);
    }

    #[test]
    fn every_table_index_decodes() {
        for (i, &rate) in SAMPLE_RATES.iter().enumerate() {
            let p = decode(&header(i as u8, 0, 0x01, "Mic"), src()).unwrap();
            assert_eq!(p.header.sample_rate, rate, "index {i}");
        }
    }

    #[test]
    fn rate_index_out_of_range_is_rejected() {
        for index in 20u8..=31 {
            let err = decode(&header(index, 0, 0x01, "Mic"), src()).unwrap_err();
            assert_eq!(err, ProtocolError::BadRateIndex(index));
        }
    }

    #[test]
    fn short_datagram_is_rejected() {
        let err = decode(&[0u8; 27], src()).unwrap_err();
        assert_eq!(err, ProtocolError::TooShort { len: 27 });
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut d = header(0x03, 0, 0x01, "Mic");
        d[0] = b'X';
        assert_eq!(decode(&d, src()).unwrap_err(), ProtocolError::BadMagic);
    }

    #[test]
    fn non_audio_sub_protocol_is_rejected() {
        // 0x23: sub-protocol 1 (serial), rate index 3.
        let err = decode(&header(0x23, 0, 0x01, "Mic"), src()).unwrap_err();
        assert_eq!(err, ProtocolError::UnsupportedSubProtocol(1));
    }

    #[test]
    fn non_pcm_codec_is_rejected() {
        let err = decode(&header(0x03, 0, 0x14, "Mic"), src()).unwrap_err();
        assert_eq!(err, ProtocolError::UnsupportedFormat(0x14));
    }

    #[test]
    fn unknown_data_format_is_rejected() {
        let err = decode(&header(0x03, 0, 0x02, "Mic"), src()).unwrap_err();
        assert_eq!(err, ProtocolError::UnsupportedFormat(0x02));
    }

    #[test]
    fn channel_count_is_stored_off_by_one() {
        let p = decode(&header(0x03, 1, 0x01, "Mic"), src()).unwrap();
        assert_eq!(p.header.channels, 2);
    }

    #[test]
    fn i16_payload_is_normalized_to_unit_range() {
        let mut d = header(0x03, 0, 0x01, "Mic");
        for v in [i16::MIN, -16384, 0, 16384, i16::MAX] {
            d.extend_from_slice(&v.to_le_bytes());
        }
        let p = decode(&d, src()).unwrap();
        assert_eq!(p.samples.len(), 5);
        assert!((p.samples[0] + 1.0).abs() < 1e-6);
        assert!((p.samples[1] + 0.5).abs() < 1e-6);
        assert_eq!(p.samples[2], 0.0);
        assert!((p.samples[3] - 0.5).abs() < 1e-6);
        assert!(p.samples[4] < 1.0 && p.samples[4] > 0.999);
    }

    #[test]
    fn f32_payload_passes_through_and_nan_is_squashed() {
        let mut d = header(0x03, 0, 0x04, "Mic");
        for v in [0.25f32, f32::NAN, -0.75, f32::INFINITY] {
            d.extend_from_slice(&v.to_le_bytes());
        }
        let p = decode(&d, src()).unwrap();
        assert_eq!(p.samples, vec![0.25, 0.0, -0.75, 0.0]);
    }

    #[test]
    fn trailing_partial_sample_is_ignored() {
        let mut d = header(0x03, 0, 0x01, "Mic");
        d.extend_from_slice(&1000i16.to_le_bytes());
        d.extend_from_slice(&2000i16.to_le_bytes());
        d.push(0x42); // half a sample
        let p = decode(&d, src()).unwrap();
        assert_eq!(p.samples.len(), 2);
    }

    #[test]
    fn frames_accounts_for_interleaving() {
        let mut d = header(0x03, 1, 0x01, "Mic"); // stereo
        for v in [100i16, 200, 300, 400] {
            d.extend_from_slice(&v.to_le_bytes());
        }
        let p = decode(&d, src()).unwrap();
        assert_eq!(p.samples.len(), 4);
        assert_eq!(p.frames(), 2);
    }

    #[test]
    fn stream_name_is_cleaned() {
        assert_eq!(
            decode(&header(0x03, 0, 0x01, "OBS Mic"), src())
                .unwrap()
                .header
                .stream_name,
            "OBS Mic"
        );
        // Trailing punctuation goes, interior punctuation stays.
        assert_eq!(clean_stream_name(b"Cam-1:\0\0\0\0\0\0\0\0\0\0"), "Cam-1");
        assert_eq!(clean_stream_name(b"  Desk  \0\0\0\0\0\0\0\0"), "Desk");
        assert_eq!(clean_stream_name(&[0u8; 16]), "");
        // Garbage after the first non-printable byte is never seen.
        assert_eq!(clean_stream_name(b"Mic\x01garbagegarba"), "Mic");
    }

    #[test]
    fn source_address_is_preserved() {
        let p = decode(&header(0x03, 0, 0x01, "Mic"), src()).unwrap();
        assert_eq!(p.src, src());
    }
}
