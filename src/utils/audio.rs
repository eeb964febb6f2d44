use anyhow::{anyhow, bail, Result};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

pub const WAV_MIME: &str = "audio/wav";
pub const WAV_HEADER_LEN: usize = 44;

/// Decoded PCM audio, one sample vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl PcmBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self { sample_rate, channels }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frame_count(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f32 / self.sample_rate as f32
    }
}

/// Float sample in [-1, 1] to signed 16-bit.
///
/// Negative values scale by 32768 and the rest by 32767 so both ends of the
/// range are reachable: -1.0 gives -32768, 1.0 gives 32767.
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

pub fn encode_wav(buffer: &PcmBuffer) -> Result<Vec<u8>> {
    encode_wav_channels(&buffer.channels, buffer.sample_rate)
}

/// Encodes per-channel samples as a 16-bit PCM WAV container.
///
/// Output length is always `44 + channels * frames * 2`.
pub fn encode_wav_channels(channels: &[Vec<f32>], sample_rate: u32) -> Result<Vec<u8>> {
    let num_channels = channels.len();
    if num_channels == 0 {
        bail!("Cannot encode WAV without channels");
    }
    // Block align is channels * 2 and must fit the header's u16 field
    if num_channels > (u16::MAX / 2) as usize {
        bail!("Too many channels for WAV: {}", num_channels);
    }
    let block_align = (num_channels * 2) as u16;
    let byte_rate = sample_rate
        .checked_mul(block_align as u32)
        .ok_or_else(|| anyhow!("Sample rate {} too high for a WAV header", sample_rate))?;
    let frames = channels[0].len();
    if let Some((i, c)) = channels.iter().enumerate().find(|(_, c)| c.len() != frames) {
        bail!(
            "Channel {} has {} samples, expected {} (all channels must have equal length)",
            i,
            c.len(),
            frames
        );
    }

    let data_len = num_channels
        .checked_mul(frames)
        .and_then(|n| n.checked_mul(2))
        .filter(|n| *n <= (u32::MAX as usize) - 36)
        .ok_or_else(|| anyhow!("Audio too long for a WAV container"))?;
    let total_len = WAV_HEADER_LEN + data_len;

    let mut out = Vec::with_capacity(total_len);

    // RIFF [4] + Size [4] + WAVE [4]
    out.write_all(b"RIFF")?;
    out.write_all(&((total_len - 8) as u32).to_le_bytes())?;
    out.write_all(b"WAVE")?;

    // fmt chunk: PCM, channels, rate, byte rate, block align, bits
    out.write_all(b"fmt ")?;
    out.write_all(&16u32.to_le_bytes())?;
    out.write_all(&1u16.to_le_bytes())?;
    out.write_all(&(num_channels as u16).to_le_bytes())?;
    out.write_all(&sample_rate.to_le_bytes())?;
    out.write_all(&byte_rate.to_le_bytes())?;
    out.write_all(&block_align.to_le_bytes())?;
    out.write_all(&16u16.to_le_bytes())?;

    out.write_all(b"data")?;
    out.write_all(&(data_len as u32).to_le_bytes())?;

    for frame in 0..frames {
        for channel in channels {
            out.write_all(&sample_to_i16(channel[frame]).to_le_bytes())?;
        }
    }

    Ok(out)
}

/// Format fields of a parsed `fmt ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

#[derive(Debug, Clone)]
pub struct WavInfo {
    pub fmt_content: Vec<u8>,
    pub data_offset: u64,
    pub data_size: u32,
}

impl WavInfo {
    pub fn format(&self) -> Result<WavFormat> {
        let f = &self.fmt_content;
        if f.len() < 16 {
            bail!("fmt chunk too short: {} bytes", f.len());
        }
        Ok(WavFormat {
            audio_format: u16::from_le_bytes([f[0], f[1]]),
            channels: u16::from_le_bytes([f[2], f[3]]),
            sample_rate: u32::from_le_bytes([f[4], f[5], f[6], f[7]]),
            bits_per_sample: u16::from_le_bytes([f[14], f[15]]),
        })
    }

    /// The data chunk payload, clipped to what is actually present.
    pub fn data<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        let start = (self.data_offset as usize).min(bytes.len());
        let end = start.saturating_add(self.data_size as usize).min(bytes.len());
        &bytes[start..end]
    }
}

pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Walks the chunks of an in-memory RIFF/WAVE buffer up to the data chunk.
pub fn scan_wav(bytes: &[u8]) -> Result<WavInfo> {
    let mut f = Cursor::new(bytes);

    // Check RIFF
    let mut id = [0u8; 4];
    f.read_exact(&mut id)?;
    if &id != b"RIFF" {
        return Err(anyhow!("Not a RIFF file"));
    }

    // Skip File Size
    f.seek(SeekFrom::Current(4))?;

    // Check WAVE
    f.read_exact(&mut id)?;
    if &id != b"WAVE" {
        return Err(anyhow!("Not a WAVE file"));
    }

    let mut fmt_content: Option<Vec<u8>> = None;
    let mut data_offset: Option<u64> = None;
    let mut data_size: Option<u32> = None;

    loop {
        let mut chunk_id = [0u8; 4];
        let n = f.read(&mut chunk_id)?;
        if n == 0 {
            break;
        }
        if n < 4 {
            return Err(anyhow!("Unexpected EOF reading chunk ID"));
        }

        let mut size_buf = [0u8; 4];
        f.read_exact(&mut size_buf)?;
        let chunk_size = u32::from_le_bytes(size_buf);

        if &chunk_id == b"fmt " {
            let mut buf = vec![0u8; chunk_size as usize];
            f.read_exact(&mut buf)?;
            fmt_content = Some(buf);
        } else if &chunk_id == b"data" {
            data_offset = Some(f.stream_position()?);
            data_size = Some(chunk_size);
            break;
        } else {
            // RIFF chunks are word aligned
            let skip = chunk_size as i64 + (chunk_size as i64 & 1);
            f.seek(SeekFrom::Current(skip))?;
        }
    }

    Ok(WavInfo {
        fmt_content: fmt_content.ok_or_else(|| anyhow!("Missing fmt chunk"))?,
        data_offset: data_offset.ok_or_else(|| anyhow!("Missing data chunk"))?,
        data_size: data_size.ok_or_else(|| anyhow!("Missing data chunk size"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_at(wav: &[u8], n: usize) -> i16 {
        let pos = WAV_HEADER_LEN + n * 2;
        i16::from_le_bytes([wav[pos], wav[pos + 1]])
    }

    #[test]
    fn test_output_length_matches_frames() -> Result<()> {
        let mono = encode_wav_channels(&[vec![0.1; 37]], 24000)?;
        assert_eq!(mono.len(), 44 + 37 * 2);

        let stereo = encode_wav_channels(&[vec![0.0; 10], vec![0.5; 10]], 44100)?;
        assert_eq!(stereo.len(), 44 + 2 * 10 * 2);

        let empty = encode_wav_channels(&[vec![]], 24000)?;
        assert_eq!(empty.len(), 44);
        Ok(())
    }

    #[test]
    fn test_header_fields() -> Result<()> {
        let wav = encode_wav_channels(&[vec![0.0; 4], vec![0.0; 4]], 24000)?;

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(wav[4..8].try_into()?), (wav.len() - 8) as u32);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(u32::from_le_bytes(wav[16..20].try_into()?), 16);
        assert_eq!(u16::from_le_bytes(wav[20..22].try_into()?), 1);
        assert_eq!(u16::from_le_bytes(wav[22..24].try_into()?), 2);
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into()?), 24000);
        assert_eq!(u32::from_le_bytes(wav[28..32].try_into()?), 24000 * 2 * 2);
        assert_eq!(u16::from_le_bytes(wav[32..34].try_into()?), 4);
        assert_eq!(u16::from_le_bytes(wav[34..36].try_into()?), 16);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into()?), 16);
        Ok(())
    }

    #[test]
    fn test_sample_scaling_boundaries() -> Result<()> {
        let wav = encode_wav_channels(&[vec![0.0, -1.0, 1.0, 2.5, -7.0, 0.5, -0.5]], 24000)?;

        assert_eq!(sample_at(&wav, 0), 0);
        assert_eq!(sample_at(&wav, 1), -32768);
        assert_eq!(sample_at(&wav, 2), 32767);
        assert_eq!(sample_at(&wav, 3), 32767);
        assert_eq!(sample_at(&wav, 4), -32768);
        assert_eq!(sample_at(&wav, 5), 16383);
        assert_eq!(sample_at(&wav, 6), -16384);
        Ok(())
    }

    #[test]
    fn test_nan_encodes_as_silence() {
        assert_eq!(sample_to_i16(f32::NAN), 0);
    }

    #[test]
    fn test_channels_interleave_per_frame() -> Result<()> {
        let left = vec![1.0, 0.0];
        let right = vec![-1.0, 0.0];
        let wav = encode_wav_channels(&[left, right], 8000)?;

        assert_eq!(sample_at(&wav, 0), 32767);
        assert_eq!(sample_at(&wav, 1), -32768);
        assert_eq!(sample_at(&wav, 2), 0);
        assert_eq!(sample_at(&wav, 3), 0);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_channel_layouts() {
        assert!(encode_wav_channels(&[], 24000).is_err());
        assert!(encode_wav_channels(&[vec![0.0; 3], vec![0.0; 2]], 24000).is_err());
    }

    #[test]
    fn test_rejects_header_field_overflow() -> Result<()> {
        // Block align of 32768 channels no longer fits in u16
        assert!(encode_wav_channels(&vec![Vec::<f32>::new(); 32768], 24000).is_err());
        let widest = encode_wav_channels(&vec![Vec::<f32>::new(); 32767], 8000)?;
        assert_eq!(u16::from_le_bytes([widest[32], widest[33]]), 65534);

        // Byte rate would wrap past u32
        assert!(encode_wav_channels(&[vec![0.0]], u32::MAX).is_err());
        assert!(encode_wav_channels(&[vec![0.0], vec![0.0]], u32::MAX / 3).is_err());
        Ok(())
    }

    #[test]
    fn test_scan_encoded_wav() -> Result<()> {
        let buffer = PcmBuffer::new(22050, vec![vec![0.25; 12]]);
        let wav = encode_wav(&buffer)?;

        assert!(is_wav(&wav));
        let info = scan_wav(&wav)?;
        assert_eq!(info.data_offset, 44);
        assert_eq!(info.data_size, 24);
        assert_eq!(info.data(&wav).len(), 24);

        let format = info.format()?;
        assert_eq!(format.audio_format, 1);
        assert_eq!(format.channels, 1);
        assert_eq!(format.sample_rate, 22050);
        assert_eq!(format.bits_per_sample, 16);
        Ok(())
    }

    #[test]
    fn test_scan_skips_unknown_chunks() -> Result<()> {
        let wav = encode_wav_channels(&[vec![0.0; 2]], 16000)?;

        // Splice a LIST chunk with odd length between fmt and data
        let mut spliced = Vec::new();
        spliced.extend_from_slice(&wav[..36]);
        spliced.extend_from_slice(b"LIST");
        spliced.extend_from_slice(&3u32.to_le_bytes());
        spliced.extend_from_slice(&[1, 2, 3, 0]);
        spliced.extend_from_slice(&wav[36..]);

        let info = scan_wav(&spliced)?;
        assert_eq!(info.data_size, 4);
        assert_eq!(info.data_offset, 56);
        Ok(())
    }

    #[test]
    fn test_scan_rejects_non_wav() {
        assert!(scan_wav(b"ID3\x04not a wav at all").is_err());
        assert!(!is_wav(b"RIFF"));
    }
}
