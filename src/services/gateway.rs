use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::fmt;

use crate::core::config::GeminiConfig;
use crate::core::state::{AspectRatio, PageData};
use crate::services::gemini::GeminiClient;
use crate::services::prompts;

pub const IMAGE_MIME: &str = "image/png";

/// Encoded media bytes as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub data: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionKind {
    Character,
    ArtStyle,
    Story,
}

impl fmt::Display for SuggestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SuggestionKind::Character => "character",
            SuggestionKind::ArtStyle => "art style",
            SuggestionKind::Story => "story",
        };
        f.write_str(s)
    }
}

/// Stateless operations against the generative backend.
///
/// Every call is a single attempt; failures carry a readable cause.
#[async_trait]
pub trait StoryGateway: Send + Sync {
    async fn paginate_story(&self, story: &str) -> Result<Vec<PageData>>;
    async fn create_illustration_prompt(
        &self,
        page: &PageData,
        character: &str,
        art_style: &str,
    ) -> Result<String>;
    async fn generate_illustration(&self, prompt: &str, aspect_ratio: AspectRatio) -> Result<MediaPayload>;
    async fn generate_audio(&self, text: &str) -> Result<MediaPayload>;
    async fn suggest(&self, kind: SuggestionKind) -> Result<String>;
}

pub fn create_gateway(config: &GeminiConfig) -> Result<Box<dyn StoryGateway>> {
    let api_key = config.api_key()?;
    info!("Initializing Gemini gateway at {}", config.base_url);
    Ok(Box::new(GeminiGateway::new(config.clone(), GeminiClient::new(&api_key, &config.base_url)?)))
}

pub struct GeminiGateway {
    config: GeminiConfig,
    client: GeminiClient,
}

impl GeminiGateway {
    pub fn new(config: GeminiConfig, client: GeminiClient) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl StoryGateway for GeminiGateway {
    async fn paginate_story(&self, story: &str) -> Result<Vec<PageData>> {
        let prompt = prompts::pagination_prompt(story);
        let response = self
            .client
            .generate_json(&self.config.story_model, &prompt, prompts::page_schema())
            .await?;
        let pages = prompts::parse_pages(&response)?;
        debug!("Story segmented into {} pages", pages.len());
        Ok(pages)
    }

    async fn create_illustration_prompt(
        &self,
        page: &PageData,
        character: &str,
        art_style: &str,
    ) -> Result<String> {
        let prompt = prompts::illustration_prompt(page, character, art_style)?;
        let text = self.client.generate_text(&self.config.prompt_model, &prompt).await?;
        non_empty(text, "Illustration prompt was empty.")
    }

    async fn generate_illustration(&self, prompt: &str, aspect_ratio: AspectRatio) -> Result<MediaPayload> {
        let full_prompt = prompts::image_prompt(prompt);
        let images = self
            .client
            .generate_images(&self.config.image_model, &full_prompt, aspect_ratio, IMAGE_MIME)
            .await?;
        images
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Image generation failed."))
    }

    async fn generate_audio(&self, text: &str) -> Result<MediaPayload> {
        let prompt = prompts::narration_prompt(text);
        let payload = self
            .client
            .generate_speech(&self.config.tts_model, &prompt, &self.config.voice)
            .await?;
        if payload.data.is_empty() {
            return Err(anyhow!("Audio generation failed to return data."));
        }
        Ok(payload)
    }

    async fn suggest(&self, kind: SuggestionKind) -> Result<String> {
        let text = self
            .client
            .generate_text(&self.config.prompt_model, prompts::suggestion_prompt(kind))
            .await?;
        Ok(text.trim().to_string())
    }
}

fn non_empty(text: String, message: &'static str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Err(anyhow!(message))
    } else {
        Ok(trimmed.to_string())
    }
}
