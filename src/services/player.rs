use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use std::io::Write;
use std::process::Stdio;
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tokio::process::{Child, Command};

use crate::core::media::extension_for_mime;

#[async_trait]
pub trait Player: Send + Sync {
    /// Starts playback and returns without waiting for it to finish.
    async fn play(&self, audio: &[u8], mime_type: &str) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    fn is_playing(&self) -> bool;
}

struct Playback {
    child: Child,
    // Removed from disk when playback is dropped
    _file: NamedTempFile,
}

/// Plays audio by handing a temporary file to an external command (`aplay`, `afplay`, ...).
pub struct CommandPlayer {
    command: Vec<String>,
    current: Mutex<Option<Playback>>,
}

impl CommandPlayer {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            current: Mutex::new(None),
        }
    }

    fn take_current(&self) -> Option<Playback> {
        self.current.lock().ok().and_then(|mut c| c.take())
    }
}

#[async_trait]
impl Player for CommandPlayer {
    async fn play(&self, audio: &[u8], mime_type: &str) -> Result<()> {
        self.stop().await?;

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("No audio player command configured"))?;

        let mut file = tempfile::Builder::new()
            .prefix("storybook-")
            .suffix(&format!(".{}", extension_for_mime(mime_type)))
            .tempfile()
            .context("Failed to create playback file")?;
        file.write_all(audio)?;
        file.flush()?;

        debug!("Playing {} bytes with {}", audio.len(), program);
        let child = Command::new(program)
            .args(args)
            .arg(file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start audio player '{}'", program))?;

        if let Ok(mut current) = self.current.lock() {
            *current = Some(Playback { child, _file: file });
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(mut playback) = self.take_current() {
            if let Err(e) = playback.child.kill().await {
                warn!("Failed to stop audio player: {}", e);
            }
        }
        Ok(())
    }

    fn is_playing(&self) -> bool {
        let Ok(mut current) = self.current.lock() else {
            return false;
        };
        let finished = match current.as_mut() {
            Some(playback) => !matches!(playback.child.try_wait(), Ok(None)),
            None => return false,
        };
        if finished {
            *current = None;
        }
        !finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_command_fails_to_play() {
        let player = CommandPlayer::new(vec![]);
        assert!(player.play(&[0, 0], "audio/wav").await.is_err());
        assert!(!player.is_playing());
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_play() {
        let player = CommandPlayer::new(vec!["storybook-no-such-player".to_string()]);
        let err = player.play(&[0, 0], "audio/wav").await.unwrap_err();
        assert!(err.to_string().contains("storybook-no-such-player"));
        assert!(!player.is_playing());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_running_player() -> Result<()> {
        // The file path lands in $1 and is ignored
        let player = CommandPlayer::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "sleep 5".to_string(),
            "sh".to_string(),
        ]);
        player.play(&[0, 0], "audio/wav").await?;
        assert!(player.is_playing());

        player.stop().await?;
        assert!(!player.is_playing());
        Ok(())
    }
}
