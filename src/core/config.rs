use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::state::StorySettings;

pub const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub story: StorySettings,

    #[serde(default)]
    pub audio: AudioConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_folder: default_output(),
            gemini: GeminiConfig::default(),
            story: StorySettings::default(),
            audio: AudioConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_story_model")]
    pub story_model: String,
    #[serde(default = "default_prompt_model")]
    pub prompt_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            story_model: default_story_model(),
            prompt_model: default_prompt_model(),
            image_model: default_image_model(),
            tts_model: default_tts_model(),
            voice: default_voice(),
        }
    }
}

impl GeminiConfig {
    /// Reads the credential from the process environment.
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => anyhow::bail!("{} environment variable is not set", self.api_key_env),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Decode narration to WAV. When off, raw backend audio is kept as-is.
    #[serde(default = "default_true")]
    pub decode: bool,
    /// Player command; the audio file path is appended as the last argument.
    #[serde(default = "default_player")]
    pub player: Vec<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            decode: true,
            player: default_player(),
        }
    }
}

fn default_output() -> String {
    "output".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_api_key_env() -> String {
    "API_KEY".to_string()
}
fn default_story_model() -> String {
    "gemini-2.5-pro".to_string()
}
fn default_prompt_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_image_model() -> String {
    "imagen-4.0-generate-001".to_string()
}
fn default_tts_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}
fn default_voice() -> String {
    "Kore".to_string()
}
fn default_sample_rate() -> u32 {
    24000
}
fn default_channels() -> u16 {
    1
}
fn default_true() -> bool {
    true
}
fn default_player() -> Vec<String> {
    if cfg!(target_os = "macos") {
        vec!["afplay".to_string()]
    } else {
        vec!["aplay".to_string(), "-q".to_string()]
    }
}

impl Config {
    /// Loads `config.yml` from the working directory, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE);
        if !path.exists() {
            log::info!("{} not found, using defaults", CONFIG_FILE);
            return Ok(Config::default());
        }
        Self::load_from(path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = serde_yaml_ng::from_str(content)?;
        anyhow::ensure!(config.audio.sample_rate > 0, "audio.sample_rate must be positive");
        anyhow::ensure!(config.audio.channels > 0, "audio.channels must be positive");
        Ok(config)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::AspectRatio;

    #[test]
    fn test_empty_config_uses_defaults() -> Result<()> {
        let config = Config::parse("{}")?;
        assert_eq!(config.output_folder, "output");
        assert_eq!(config.gemini.story_model, "gemini-2.5-pro");
        assert_eq!(config.gemini.voice, "Kore");
        assert_eq!(config.audio.sample_rate, 24000);
        assert_eq!(config.audio.channels, 1);
        assert!(config.audio.decode);
        assert_eq!(config.story.aspect_ratio, AspectRatio::Landscape);
        assert!(config.story.character.starts_with("Mina the mouse"));
        Ok(())
    }

    #[test]
    fn test_partial_sections() -> Result<()> {
        let yaml = r#"
gemini:
  voice: Puck
  api_key_env: STORYBOOK_TEST_KEY
story:
  character: "Otto the otter"
  art_style: "Bold linocut"
  aspect_ratio: "9:16"
audio:
  decode: false
  player: [ffplay, -nodisp, -autoexit]
"#;
        let config = Config::parse(yaml)?;
        assert_eq!(config.gemini.voice, "Puck");
        assert_eq!(config.gemini.tts_model, "gemini-2.5-flash-preview-tts");
        assert_eq!(config.story.character, "Otto the otter");
        assert_eq!(config.story.aspect_ratio, AspectRatio::Portrait);
        assert!(!config.audio.decode);
        assert_eq!(config.audio.player[0], "ffplay");
        Ok(())
    }

    #[test]
    fn test_rejects_zero_channels() {
        assert!(Config::parse("audio:\n  channels: 0\n").is_err());
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");
        fs::write(&path, "output_folder: books\n")?;

        let config = Config::load_from(&path)?;
        assert_eq!(config.output_folder, "books");
        Ok(())
    }

    #[test]
    fn test_missing_api_key_is_an_error() {
        let gemini = GeminiConfig {
            api_key_env: "STORYBOOK_SURELY_UNSET_VARIABLE".to_string(),
            ..Default::default()
        };
        let err = gemini.api_key().unwrap_err();
        assert!(err.to_string().contains("STORYBOOK_SURELY_UNSET_VARIABLE"));
    }
}
