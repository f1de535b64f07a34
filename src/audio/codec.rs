//! # Audio Reversal
//!
//! Every uploaded recording is stored twice: as sent, and played backwards. The
//! reversed copy is what the next player in the rotation gets to hear.
//!
//! ## Supported Input:
//! - **WAV** (RIFF/WAVE header): decoded, sample frames reversed with the channel
//!   interleaving inside each frame preserved, re-encoded with the original header
//! - **Compressed containers** (WebM, Ogg, FLAC, MP3, MP4): recognised by their
//!   magic bytes and stored under their real extension. There is no decoder for
//!   them here, so the "reversed" copy is the recording unchanged.
//! - **Anything else**: raw 16-bit little-endian mono PCM, reversed sample by sample.
//!   A trailing odd byte stays at the end.
//!
//! Only empty input and WAV data whose chunk layout does not add up are rejected.
//!
//! ## Rust Concepts:
//! - **Trait objects**: the vault holds an `Arc<dyn AudioCodec>` so the transform
//!   is swappable without touching storage code
//! - **byteorder**: explicit little-endian reads and writes of PCM samples

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::Cursor;
use std::panic;
use tracing::debug;
use wav::BitDepth;

/// Input the codec could not make sense of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidAudio(pub String);

impl fmt::Display for InvalidAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid audio: {}", self.0)
    }
}

impl std::error::Error for InvalidAudio {}

/// Transforms a recording into the version handed to the next player.
pub trait AudioCodec: Send + Sync {
    fn reverse(&self, audio: &[u8]) -> Result<Vec<u8>, InvalidAudio>;

    /// File extension under which `audio` should be stored.
    fn extension(&self, audio: &[u8]) -> &'static str;
}

/// Recording formats told apart by their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    WebM,
    Ogg,
    Flac,
    Mp3,
    Mp4,
    RawPcm16,
}

impl AudioFormat {
    pub fn sniff(audio: &[u8]) -> Self {
        match audio {
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => AudioFormat::Wav,
            [0x1a, 0x45, 0xdf, 0xa3, ..] => AudioFormat::WebM,
            [b'O', b'g', b'g', b'S', ..] => AudioFormat::Ogg,
            [b'f', b'L', b'a', b'C', ..] => AudioFormat::Flac,
            [b'I', b'D', b'3', ..] => AudioFormat::Mp3,
            [_, _, _, _, b'f', b't', b'y', b'p', ..] => AudioFormat::Mp4,
            _ => AudioFormat::RawPcm16,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::WebM => "webm",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Flac => "flac",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Mp4 => "m4a",
            AudioFormat::RawPcm16 => "pcm",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::WebM => "audio/webm",
            AudioFormat::Ogg => "audio/ogg",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Mp4 => "audio/mp4",
            AudioFormat::RawPcm16 => "application/octet-stream",
        }
    }
}

/// The default codec: plays WAV or raw PCM16 recordings backwards and passes
/// compressed containers through.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcmReverser;

impl AudioCodec for PcmReverser {
    fn reverse(&self, audio: &[u8]) -> Result<Vec<u8>, InvalidAudio> {
        if audio.is_empty() {
            return Err(InvalidAudio("recording is empty".to_string()));
        }
        match AudioFormat::sniff(audio) {
            AudioFormat::Wav => reverse_wav(audio),
            AudioFormat::RawPcm16 => reverse_pcm16(audio),
            format => {
                debug!(format = ?format, bytes = audio.len(), "no decoder for container, storing as is");
                Ok(audio.to_vec())
            }
        }
    }

    fn extension(&self, audio: &[u8]) -> &'static str {
        AudioFormat::sniff(audio).extension()
    }
}

const RIFF_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const MIN_FMT_LEN: usize = 16;

/// Walk the RIFF chunk list and make sure every chunk fits inside the buffer and
/// both `fmt ` and `data` are present.
fn check_riff_layout(audio: &[u8]) -> Result<(), InvalidAudio> {
    let declared = LittleEndian::read_u32(&audio[4..8]) as usize;
    let end = declared
        .checked_add(CHUNK_HEADER_LEN)
        .filter(|end| *end <= audio.len())
        .ok_or_else(|| InvalidAudio("RIFF size runs past the end of the upload".to_string()))?;

    let (mut has_fmt, mut has_data) = (false, false);
    let mut offset = RIFF_HEADER_LEN;
    while offset < end {
        if end - offset < CHUNK_HEADER_LEN {
            return Err(InvalidAudio("truncated chunk header".to_string()));
        }
        let id = &audio[offset..offset + 4];
        let size = LittleEndian::read_u32(&audio[offset + 4..offset + 8]) as usize;
        let body = offset + CHUNK_HEADER_LEN;
        if size > end - body {
            return Err(InvalidAudio(format!(
                "chunk {:?} runs past the end of the file",
                String::from_utf8_lossy(id)
            )));
        }

        match id {
            b"fmt " if size < MIN_FMT_LEN => {
                return Err(InvalidAudio("fmt chunk is too short".to_string()));
            }
            b"fmt " => has_fmt = true,
            b"data" => has_data = true,
            _ => {}
        }
        // Chunks are word aligned; the pad byte of the last chunk may be missing.
        offset = body + size + size % 2;
    }

    if !has_fmt || !has_data {
        return Err(InvalidAudio("WAV file needs fmt and data chunks".to_string()));
    }
    Ok(())
}

fn reverse_wav(audio: &[u8]) -> Result<Vec<u8>, InvalidAudio> {
    check_riff_layout(audio)?;

    // The RIFF parser under `wav` unwraps short reads instead of reporting them.
    let decoded = panic::catch_unwind(|| wav::read(&mut Cursor::new(audio)))
        .map_err(|_| InvalidAudio("WAV decoder rejected the data".to_string()))?;
    let (header, samples) = decoded.map_err(|e| InvalidAudio(format!("unreadable WAV data: {}", e)))?;
    let frame = usize::from(header.channel_count.max(1));

    let reversed = match samples {
        BitDepth::Eight(samples) => BitDepth::Eight(reverse_frames(&samples, frame)),
        BitDepth::Sixteen(samples) => BitDepth::Sixteen(reverse_frames(&samples, frame)),
        BitDepth::TwentyFour(samples) => BitDepth::TwentyFour(reverse_frames(&samples, frame)),
        BitDepth::ThirtyTwoFloat(samples) => BitDepth::ThirtyTwoFloat(reverse_frames(&samples, frame)),
        BitDepth::Empty => return Err(InvalidAudio("WAV file has no samples".to_string())),
    };

    let mut writer = Cursor::new(Vec::with_capacity(audio.len()));
    wav::write(header, &reversed, &mut writer)
        .map_err(|e| InvalidAudio(format!("could not encode reversed WAV: {}", e)))?;
    Ok(writer.into_inner())
}

fn reverse_frames<T: Clone>(samples: &[T], frame: usize) -> Vec<T> {
    samples.chunks(frame).rev().flatten().cloned().collect()
}

fn reverse_pcm16(audio: &[u8]) -> Result<Vec<u8>, InvalidAudio> {
    let whole = audio.len() - audio.len() % 2;

    let mut cursor = Cursor::new(&audio[..whole]);
    let mut samples = Vec::with_capacity(whole / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }

    let mut reversed = Vec::with_capacity(audio.len());
    for sample in samples.into_iter().rev() {
        reversed
            .write_i16::<LittleEndian>(sample)
            .map_err(|e| InvalidAudio(e.to_string()))?;
    }
    reversed.extend_from_slice(&audio[whole..]);
    Ok(reversed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PCM_FORMAT: u16 = 1;

    fn encode_wav(channels: u16, samples: Vec<i16>) -> Vec<u8> {
        let header = wav::Header::new(PCM_FORMAT, channels, 8000, 16);
        let mut out = Cursor::new(Vec::new());
        wav::write(header, &BitDepth::Sixteen(samples), &mut out).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_raw_pcm_samples_are_reversed() {
        // Samples 0x0201 and 0x0403; reversing swaps whole samples, not bytes.
        let reversed = PcmReverser.reverse(&[0x01, 0x02, 0x03, 0x04]).unwrap();
        assert_eq!(reversed, vec![0x03, 0x04, 0x01, 0x02]);
        assert_eq!(PcmReverser.extension(&[0x01, 0x02]), "pcm");
    }

    #[test]
    fn test_reversing_twice_restores_the_recording() {
        let original: Vec<u8> = (0u8..64).collect();
        let once = PcmReverser.reverse(&original).unwrap();
        assert_ne!(once, original);
        assert_eq!(PcmReverser.reverse(&once).unwrap(), original);
    }

    #[test]
    fn test_empty_input_is_rejected() {
        assert!(PcmReverser.reverse(&[]).is_err());
    }

    #[test]
    fn test_odd_length_pcm_keeps_the_trailing_byte() {
        assert_eq!(PcmReverser.reverse(&[1, 2, 3, 4, 5]).unwrap(), vec![3, 4, 1, 2, 5]);
        assert_eq!(PcmReverser.reverse(&[7]).unwrap(), vec![7]);
    }

    #[test]
    fn test_compressed_containers_pass_through_with_their_extension() {
        let webm = [0x1a, 0x45, 0xdf, 0xa3, 0x9f, 0x42, 0x86];
        assert_eq!(PcmReverser.reverse(&webm).unwrap(), webm.to_vec());
        assert_eq!(PcmReverser.extension(&webm), "webm");

        assert_eq!(PcmReverser.extension(b"OggS\x00\x02"), "ogg");
        assert_eq!(PcmReverser.extension(b"ID3\x04\x00"), "mp3");
        assert_eq!(PcmReverser.extension(b"\x00\x00\x00\x20ftypM4A "), "m4a");
        assert_eq!(AudioFormat::sniff(&webm).content_type(), "audio/webm");
    }

    #[test]
    fn test_wav_frames_are_reversed_keeping_channels() {
        let input = encode_wav(2, vec![1, -1, 2, -2, 3, -3]);
        assert_eq!(PcmReverser.extension(&input), "wav");

        let reversed = PcmReverser.reverse(&input).unwrap();
        let (header, samples) = wav::read(&mut Cursor::new(reversed)).unwrap();
        assert_eq!(header.channel_count, 2);
        assert_eq!(header.sampling_rate, 8000);
        match samples {
            BitDepth::Sixteen(samples) => assert_eq!(samples, vec![3, -3, 2, -2, 1, -1]),
            _ => panic!("expected 16-bit samples"),
        }
    }

    #[test]
    fn test_truncated_wav_is_rejected() {
        let input = encode_wav(1, vec![1, 2, 3, 4]);
        for cut in [12, 14, 20, 36, 40, input.len() - 1] {
            assert!(PcmReverser.reverse(&input[..cut]).is_err(), "cut at {}", cut);
        }
        assert!(PcmReverser.reverse(b"RIFF\x06\x00\x00\x00WAVEfm").is_err());
    }

    #[test]
    fn test_wav_with_oversized_chunk_is_rejected() {
        let mut input = encode_wav(1, vec![1, 2, 3, 4]);
        // Claim a data chunk far larger than the file.
        let data = input.windows(4).position(|w| w == b"data").unwrap();
        input[data + 4..data + 8].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(PcmReverser.reverse(&input).is_err());
    }

    #[test]
    fn test_wav_without_data_chunk_is_rejected() {
        let input = encode_wav(1, vec![1, 2]);
        let data = input.windows(4).position(|w| w == b"data").unwrap();
        let mut without_data = input[..data].to_vec();
        let riff_len = (without_data.len() - 8) as u32;
        without_data[4..8].copy_from_slice(&riff_len.to_le_bytes());
        assert!(PcmReverser.reverse(&without_data).is_err());
    }
}
