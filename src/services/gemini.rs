use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::core::state::AspectRatio;
use crate::services::gateway::MediaPayload;

/// Thin REST client for the Gemini `generateContent` and Imagen `predict` endpoints.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    base_url: Url,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: &str, base_url: &str) -> Result<Self> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).with_context(|| format!("Invalid Gemini base URL: {}", base_url))?;
        Ok(Self {
            api_key: api_key.to_string(),
            base_url,
            client: reqwest::Client::new(),
        })
    }

    pub fn endpoint(&self, model: &str, method: &str) -> Result<Url> {
        self.base_url
            .join(&format!("v1beta/models/{}:{}", model, method))
            .with_context(|| format!("Invalid model name: {}", model))
    }

    async fn post<T: Serialize + ?Sized>(&self, url: Url, body: &T) -> Result<String> {
        debug!("POST {}", url);
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error ({}): {}", status, error_text));
        }

        Ok(resp.text().await?)
    }

    pub async fn generate_content(&self, model: &str, request: &GeminiRequest) -> Result<GeminiResponse> {
        let url = self.endpoint(model, "generateContent")?;
        let response_text = self.post(url, request).await?;
        let result: GeminiResponse = match serde_json::from_str(&response_text) {
            Ok(r) => r,
            Err(e) => return Err(anyhow!("Failed to parse Gemini response: {}. Body: {}", e, response_text)),
        };

        if let Some(err) = &result.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }
        Ok(result)
    }

    pub async fn generate_text(&self, model: &str, prompt: &str) -> Result<String> {
        let request = GeminiRequest::text(prompt);
        self.generate_content(model, &request).await?.first_text()
    }

    /// Structured output constrained by a response schema. Returns the raw JSON text.
    pub async fn generate_json(&self, model: &str, prompt: &str, schema: Value) -> Result<String> {
        let mut request = GeminiRequest::text(prompt);
        request.generation_config = Some(GenerationConfig {
            response_mime_type: Some("application/json".to_string()),
            response_schema: Some(schema),
            ..Default::default()
        });
        self.generate_content(model, &request).await?.first_text()
    }

    pub async fn generate_speech(&self, model: &str, prompt: &str, voice: &str) -> Result<MediaPayload> {
        let mut request = GeminiRequest::text(prompt);
        request.generation_config = Some(GenerationConfig {
            response_modalities: Some(vec!["AUDIO".to_string()]),
            speech_config: Some(SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: voice.to_string(),
                    },
                },
            }),
            ..Default::default()
        });

        let response = self.generate_content(model, &request).await?;
        let inline = response
            .first_inline_data()
            .ok_or_else(|| anyhow!("Audio generation failed to return data."))?;
        inline.decode()
    }

    pub async fn generate_images(
        &self,
        model: &str,
        prompt: &str,
        aspect_ratio: AspectRatio,
        mime_type: &str,
    ) -> Result<Vec<MediaPayload>> {
        let url = self.endpoint(model, "predict")?;
        let request = ImagenRequest {
            instances: vec![ImagenInstance {
                prompt: prompt.to_string(),
            }],
            parameters: ImagenParameters {
                sample_count: 1,
                aspect_ratio: aspect_ratio.as_str().to_string(),
                output_options: ImagenOutputOptions {
                    mime_type: mime_type.to_string(),
                },
            },
        };

        let response_text = self.post(url, &request).await?;
        let result: ImagenResponse = serde_json::from_str(&response_text)
            .with_context(|| format!("Failed to parse Imagen response. Body: {}", response_text))?;
        result.into_images(mime_type)
    }
}

// --- generateContent ---

#[derive(Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

impl GeminiRequest {
    pub fn text(prompt: &str) -> Self {
        Self {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: None,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct GeminiContent {
    pub role: String,
    pub parts: Vec<GeminiPart>,
}

#[derive(Serialize, Debug)]
pub struct GeminiPart {
    pub text: String,
}

#[derive(Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiPartResponse {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

impl InlineData {
    pub fn decode(&self) -> Result<MediaPayload> {
        let data = general_purpose::STANDARD
            .decode(self.data.trim())
            .context("Backend returned invalid base64 payload")?;
        Ok(MediaPayload {
            data,
            mime_type: self.mime_type.clone(),
        })
    }
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GeminiResponse {
    fn first_candidate(&self) -> Result<&GeminiCandidate> {
        if let Some(first) = self.candidates.as_ref().and_then(|c| c.first()) {
            return Ok(first);
        }
        let reason = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
            .unwrap_or("no candidates");
        Err(anyhow!("Gemini response empty: {}", reason))
    }

    /// Concatenated text parts of the first candidate.
    pub fn first_text(&self) -> Result<String> {
        let first = self.first_candidate()?;
        let text: String = first
            .content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect();

        if text.is_empty() {
            // Content or parts are missing, usually a safety stop
            let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
            return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
        }
        Ok(text)
    }

    pub fn first_inline_data(&self) -> Option<&InlineData> {
        self.candidates
            .as_ref()?
            .first()?
            .content
            .as_ref()?
            .parts
            .iter()
            .find_map(|p| p.inline_data.as_ref())
    }
}

// --- Imagen predict ---

#[derive(Serialize, Debug)]
struct ImagenRequest {
    instances: Vec<ImagenInstance>,
    parameters: ImagenParameters,
}

#[derive(Serialize, Debug)]
struct ImagenInstance {
    prompt: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ImagenParameters {
    sample_count: u32,
    aspect_ratio: String,
    output_options: ImagenOutputOptions,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ImagenOutputOptions {
    mime_type: String,
}

#[derive(Deserialize, Debug)]
struct ImagenResponse {
    predictions: Option<Vec<ImagenPrediction>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ImagenPrediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
}

impl ImagenResponse {
    fn into_images(self, default_mime: &str) -> Result<Vec<MediaPayload>> {
        if let Some(err) = self.error {
            return Err(anyhow!("Imagen API returned error: {}", err.message));
        }
        // Filtered predictions come back without bytes
        self.predictions
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| {
                let data = p.bytes_base64_encoded?;
                Some(InlineData {
                    mime_type: p.mime_type.unwrap_or_else(|| default_mime.to_string()),
                    data,
                })
            })
            .map(|inline| inline.decode())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_building() -> Result<()> {
        let client = GeminiClient::new("key", "https://generativelanguage.googleapis.com")?;
        assert_eq!(
            client.endpoint("gemini-2.5-pro", "generateContent")?.as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent"
        );

        let proxied = GeminiClient::new("key", "http://127.0.0.1:8080/proxy")?;
        assert_eq!(
            proxied.endpoint("imagen-4.0-generate-001", "predict")?.as_str(),
            "http://127.0.0.1:8080/proxy/v1beta/models/imagen-4.0-generate-001:predict"
        );
        Ok(())
    }

    #[test]
    fn test_speech_request_shape() -> Result<()> {
        let mut request = GeminiRequest::text("Say hi");
        request.generation_config = Some(GenerationConfig {
            response_modalities: Some(vec!["AUDIO".to_string()]),
            speech_config: Some(SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: "Kore".to_string(),
                    },
                },
            }),
            ..Default::default()
        });

        let value = serde_json::to_value(&request)?;
        assert_eq!(value["contents"][0]["parts"][0]["text"], "Say hi");
        assert_eq!(value["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            value["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert!(value["generationConfig"].get("responseSchema").is_none());
        Ok(())
    }

    #[test]
    fn test_text_request_omits_generation_config() -> Result<()> {
        let value = serde_json::to_value(GeminiRequest::text("hello"))?;
        assert!(value.get("generationConfig").is_none());
        Ok(())
    }

    #[test]
    fn test_response_parsing_success() {
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [ { "text": "Hello " }, { "text": "world" } ],
                        "role": "model"
                    },
                    "finishReason": "STOP",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.first_text().unwrap(), "Hello world");
    }

    #[test]
    fn test_response_parsing_safety_block() {
        let json = r#"{
            "candidates": [
                {
                    "finishReason": "SAFETY",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let err = result.first_text().unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_response_parsing_prompt_blocked() {
        let json = r#"{ "promptFeedback": { "blockReason": "OTHER" } }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let err = result.first_text().unwrap_err();
        assert!(err.to_string().contains("OTHER"));
        assert!(result.first_inline_data().is_none());
    }

    #[test]
    fn test_inline_audio_extraction() -> Result<()> {
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [
                            { "inlineData": { "mimeType": "audio/L16;codec=pcm;rate=24000", "data": "AAD/fw==" } }
                        ],
                        "role": "model"
                    },
                    "finishReason": "STOP"
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json)?;
        let payload = result.first_inline_data().unwrap().decode()?;
        assert_eq!(payload.data, vec![0x00, 0x00, 0xff, 0x7f]);
        assert_eq!(payload.mime_type, "audio/L16;codec=pcm;rate=24000");
        Ok(())
    }

    #[test]
    fn test_invalid_base64_is_an_error() {
        let inline = InlineData {
            mime_type: "audio/L16".to_string(),
            data: "not base64!!".to_string(),
        };
        assert!(inline.decode().is_err());
    }

    #[test]
    fn test_imagen_response_parsing() -> Result<()> {
        let json = r#"{
            "predictions": [
                { "bytesBase64Encoded": "iVBORw==", "mimeType": "image/png" },
                { "raiFilteredReason": "filtered" }
            ]
        }"#;

        let result: ImagenResponse = serde_json::from_str(json)?;
        let images = result.into_images("image/png")?;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].data, vec![0x89, b'P', b'N', b'G']);
        Ok(())
    }

    #[test]
    fn test_imagen_empty_response() -> Result<()> {
        let result: ImagenResponse = serde_json::from_str("{}")?;
        assert!(result.into_images("image/png")?.is_empty());
        Ok(())
    }
}
