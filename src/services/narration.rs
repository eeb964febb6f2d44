use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};

use crate::core::config::AudioConfig;
use crate::services::gateway::MediaPayload;
use crate::utils::audio::{encode_wav, is_wav, scan_wav, PcmBuffer, WAV_MIME};

/// Turns opaque narration bytes into PCM. Decoding either fully succeeds or fails.
#[async_trait]
pub trait AudioDecoder: Send + Sync {
    async fn decode(&self, bytes: &[u8], sample_rate: u32, channels: u16) -> Result<PcmBuffer>;
}

/// Decoder for 16-bit PCM, either raw little-endian (what Gemini TTS returns)
/// or already wrapped in a WAV container.
#[derive(Debug, Default, Clone, Copy)]
pub struct PcmDecoder;

impl PcmDecoder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioDecoder for PcmDecoder {
    async fn decode(&self, bytes: &[u8], sample_rate: u32, channels: u16) -> Result<PcmBuffer> {
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || decode_pcm16(&bytes, sample_rate, channels))
            .await
            .context("Audio decode task failed")?
    }
}

pub fn decode_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<PcmBuffer> {
    if is_wav(bytes) {
        let info = scan_wav(bytes).context("Failed to parse WAV narration")?;
        let format = info.format()?;
        if format.audio_format != 1 || format.bits_per_sample != 16 {
            bail!(
                "Unsupported WAV encoding: format {} with {} bits per sample",
                format.audio_format,
                format.bits_per_sample
            );
        }
        let end = info.data_offset.saturating_add(info.data_size as u64);
        if end > bytes.len() as u64 {
            bail!(
                "Truncated WAV narration: data chunk declares {} bytes, {} present",
                info.data_size,
                info.data(bytes).len()
            );
        }
        return deinterleave(info.data(bytes), format.sample_rate, format.channels);
    }
    deinterleave(bytes, sample_rate, channels)
}

fn deinterleave(data: &[u8], sample_rate: u32, channels: u16) -> Result<PcmBuffer> {
    if channels == 0 {
        bail!("Cannot decode audio with zero channels");
    }
    let frame_bytes = channels as usize * 2;
    if data.len() % frame_bytes != 0 {
        return Err(anyhow!(
            "Truncated PCM data: {} bytes is not a whole number of {}-channel frames",
            data.len(),
            channels
        ));
    }

    let frames = data.len() / frame_bytes;
    let mut out = vec![Vec::with_capacity(frames); channels as usize];
    for frame in data.chunks_exact(frame_bytes) {
        for (channel, sample) in out.iter_mut().zip(frame.chunks_exact(2)) {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            channel.push(value as f32 / 32768.0);
        }
    }
    Ok(PcmBuffer::new(sample_rate, out))
}

/// Playable narration: WAV when a decoder is available, the raw payload otherwise.
pub async fn render_narration(
    decoder: Option<&dyn AudioDecoder>,
    audio: MediaPayload,
    config: &AudioConfig,
) -> Result<MediaPayload> {
    let Some(decoder) = decoder else {
        warn!(
            "No audio decoder available, keeping raw narration ({}, {} bytes)",
            audio.mime_type,
            audio.data.len()
        );
        return Ok(audio);
    };

    let buffer = decoder
        .decode(&audio.data, config.sample_rate, config.channels)
        .await?;
    debug!(
        "Decoded narration: {} frames, {} channel(s), {:.2}s",
        buffer.frame_count(),
        buffer.channel_count(),
        buffer.duration_secs()
    );
    Ok(MediaPayload {
        data: encode_wav(&buffer)?,
        mime_type: WAV_MIME.to_string(),
    })
}
