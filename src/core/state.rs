use crate::core::media::MediaHandle;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// One page of a segmented story, as returned by the backend.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    pub page_text: String,
    #[serde(default)]
    pub scene_synopsis: String,
    #[serde(default)]
    pub focal_characters: Vec<String>,
    #[serde(default)]
    pub setting: String,
    #[serde(default)]
    pub key_props: Vec<String>,
    #[serde(default)]
    pub mood: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    Pending,
    Generating,
    Ready,
    Error,
}

impl PageStatus {
    pub fn is_resolved(self) -> bool {
        matches!(self, PageStatus::Ready | PageStatus::Error)
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PageStatus::Pending => "pending",
            PageStatus::Generating => "generating",
            PageStatus::Ready => "ready",
            PageStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Assets attached to a page when it becomes ready.
#[derive(Clone, Debug, PartialEq)]
pub struct PageAssets {
    pub illustration: MediaHandle,
    pub narration: MediaHandle,
    /// The illustration prompt, reused as alt text.
    pub description: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub index: usize,
    pub data: PageData,
    pub status: PageStatus,
    pub assets: Option<PageAssets>,
}

impl Page {
    pub fn pending(index: usize, data: PageData) -> Self {
        Self {
            index,
            data,
            status: PageStatus::Pending,
            assets: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.data.page_text
    }

    /// Placeholder line shown instead of the illustration.
    pub fn placeholder(&self) -> Option<&'static str> {
        match self.status {
            PageStatus::Pending => Some("Waiting to be illustrated..."),
            PageStatus::Generating => Some("Illustrating this page..."),
            PageStatus::Error => Some("Could not create illustration."),
            PageStatus::Ready => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "9:16")]
    Portrait,
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 3] = [
        AspectRatio::Square,
        AspectRatio::Portrait,
        AspectRatio::Landscape,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Landscape => "16:9",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        AspectRatio::ALL
            .into_iter()
            .find(|a| a.as_str() == s.trim())
            .ok_or_else(|| anyhow!("Unknown aspect ratio: {} (expected 1:1, 9:16 or 16:9)", s))
    }
}

/// Session-wide inputs shared by every page's illustration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StorySettings {
    #[serde(default = "default_character")]
    pub character: String,
    #[serde(default = "default_art_style")]
    pub art_style: String,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
}

impl Default for StorySettings {
    fn default() -> Self {
        Self {
            character: default_character(),
            art_style: default_art_style(),
            aspect_ratio: AspectRatio::default(),
        }
    }
}

pub fn default_character() -> String {
    "Mina the mouse, 7 years old, with soft grey fur and large curious ears. \
     She always wears a bright yellow raincoat and little red boots. \
     She is brave, curious, and loves exploring."
        .to_string()
}

pub fn default_art_style() -> String {
    "Soft watercolour storybook illustration with pastel edges and a gentle paper grain texture."
        .to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Setup,
    Reading,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct LoadingState {
    pub active: bool,
    pub message: String,
}

impl LoadingState {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn active(message: &str) -> Self {
        Self {
            active: true,
            message: message.to_string(),
        }
    }
}

/// Read-only view of a session, published after every committed change.
#[derive(Clone, Debug, Default)]
pub struct SessionSnapshot {
    /// Bumped whenever a session is replaced or reset.
    pub session_id: u64,
    pub mode: ViewMode,
    pub pages: Arc<Vec<Page>>,
    pub current: usize,
    pub settings: StorySettings,
    pub loading: LoadingState,
    pub error: Option<String>,
    pub playing: bool,
}

impl SessionSnapshot {
    pub fn current_page(&self) -> Option<&Page> {
        self.pages.get(self.current)
    }

    pub fn statuses(&self) -> Vec<PageStatus> {
        self.pages.iter().map(|p| p.status).collect()
    }

    pub fn has_next(&self) -> bool {
        self.current + 1 < self.pages.len()
    }

    pub fn has_previous(&self) -> bool {
        self.current > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_data_parses_backend_keys() {
        let json = r#"{
            "pageText": "Mina found a key.",
            "sceneSynopsis": "Mina discovers a shiny key in the garden.",
            "focalCharacters": ["Mina"],
            "setting": "A rainy garden",
            "keyProps": ["key", "raincoat"],
            "mood": "curious, gentle"
        }"#;

        let page: PageData = serde_json::from_str(json).unwrap();
        assert_eq!(page.page_text, "Mina found a key.");
        assert_eq!(page.focal_characters, vec!["Mina"]);
        assert_eq!(page.key_props.len(), 2);
        assert_eq!(page.mood, "curious, gentle");
    }

    #[test]
    fn test_page_data_missing_metadata_defaults() {
        let page: PageData = serde_json::from_str(r#"{"pageText": "Only text."}"#).unwrap();
        assert_eq!(page.page_text, "Only text.");
        assert!(page.focal_characters.is_empty());
        assert!(page.setting.is_empty());
    }

    #[test]
    fn test_aspect_ratio_round_trips_wire_names() {
        assert_eq!(serde_json::to_string(&AspectRatio::Portrait).unwrap(), "\"9:16\"");
        let parsed: AspectRatio = serde_json::from_str("\"1:1\"").unwrap();
        assert_eq!(parsed, AspectRatio::Square);
        assert_eq!("16:9".parse::<AspectRatio>().unwrap(), AspectRatio::Landscape);
        assert!("4:3".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn test_placeholder_follows_status() {
        let mut page = Page::pending(0, PageData::default());
        assert_eq!(page.placeholder(), Some("Waiting to be illustrated..."));
        page.status = PageStatus::Error;
        assert_eq!(page.placeholder(), Some("Could not create illustration."));
        page.status = PageStatus::Ready;
        assert_eq!(page.placeholder(), None);
    }
}
