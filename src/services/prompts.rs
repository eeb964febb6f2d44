use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use crate::core::state::PageData;
use crate::services::gateway::SuggestionKind;

pub const IMAGE_NEGATIVE_PROMPT: &str =
    "dark horror, gore, weapons, text artifacts, deformed anatomy, brand logos";

pub const PAGINATION_ERROR: &str =
    "Could not understand the story structure. Please try a different story.";

pub fn pagination_prompt(story: &str) -> String {
    format!(
        "You are a narrative engine for a children's storybook app. Read the following story and \
         segment it into age-appropriate pages for 6-8 year olds. For each page, provide the \
         required JSON object. Ensure the story flows logically from one page to the next.\
         \n\nSTORY:\n{}",
        story
    )
}

/// Response schema for segmentation: an array of page objects.
pub fn page_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "pageText": {
                    "type": "STRING",
                    "description": "Concise, read-aloud friendly text for this page. Suitable for ages 6-8."
                },
                "sceneSynopsis": {
                    "type": "STRING",
                    "description": "A one-sentence summary of the action and setting on this page."
                },
                "focalCharacters": {
                    "type": "ARRAY",
                    "items": { "type": "STRING" },
                    "description": "List of characters who are the main focus of this page."
                },
                "setting": {
                    "type": "STRING",
                    "description": "Description of the location and environment."
                },
                "keyProps": {
                    "type": "ARRAY",
                    "items": { "type": "STRING" },
                    "description": "List of important objects or items on this page."
                },
                "mood": {
                    "type": "STRING",
                    "description": "The emotional tone of this page (e.g., 'curious, gentle')."
                }
            },
            "required": ["pageText"]
        }
    })
}

/// Parses the segmentation response. An empty array is valid here.
pub fn parse_pages(response: &str) -> Result<Vec<PageData>> {
    let clean_json = strip_code_blocks(response);
    match serde_json::from_str::<Vec<PageData>>(&clean_json) {
        Ok(pages) => Ok(pages),
        Err(e) => {
            log::error!("Failed to parse paginated story response: {} ({})", clean_json, e);
            Err(anyhow!(PAGINATION_ERROR))
        }
    }
}

pub fn illustration_prompt(page: &PageData, character: &str, art_style: &str) -> Result<String> {
    let page_json = serde_json::to_string(page)?;
    Ok(format!(
        "You are an art director for a children's storybook. Your most important job is to ensure \
         **strict character consistency** across all illustrations. Create a single, detailed, \
         kid-safe illustration prompt.\n\
         \n\
         CHARACTER BIBLE (Strictly Adhere): {}\n\
         ART STYLE: {}\n\
         PAGE DATA: {}\n\
         \n\
         INSTRUCTIONS:\n\
         - The CHARACTER BIBLE is the absolute source of truth for the character's appearance. \
         **Every detail must be strictly enforced in the prompt to maintain visual consistency from page to page.**\n\
         - Combine the character bible, art style, and page data into a cohesive, single-paragraph prompt.\n\
         - Describe the scene, camera framing, and lighting suitable for a picture book.\n\
         - **Reiterate the character's specific appearance and clothing from the bible within the main prompt description.**\n\
         - IMPORTANT: Do NOT include any negative prompts or instructions like \"No horror\". \
         Focus ONLY on the positive description of the image.",
        character, art_style, page_json
    ))
}

pub fn image_prompt(prompt: &str) -> String {
    format!("{}. Negative prompt: {}.", prompt.trim().trim_end_matches('.'), IMAGE_NEGATIVE_PROMPT)
}

pub fn narration_prompt(text: &str) -> String {
    format!("Say cheerfully in a warm, friendly UK English accent: {}", text)
}

pub fn suggestion_prompt(kind: SuggestionKind) -> &'static str {
    match kind {
        SuggestionKind::Character => {
            "You are a creative assistant for a children's book author. Generate a detailed character \
             bible for a new story character, suitable for kids aged 6-8. The bible should be concise \
             but specific enough to ensure visual consistency in illustrations.\n\
             \n\
             Format the output as a single paragraph with clear descriptors. Include:\n\
             - **Name and Age:** e.g., \"Mina the mouse, 7 years old,\"\n\
             - **Physical Appearance:** e.g., \"with soft grey fur, large curious ears, and a tiny pink nose.\"\n\
             - **Clothing/Signature Outfit:** e.g., \"She always wears a bright yellow raincoat and little red boots.\"\n\
             - **Key Personality Traits:** e.g., \"She is brave, curious, and a little bit mischievous.\"\n\
             \n\
             Provide only the description text, without any labels, bullet points, or quotes. \
             The final output should be a single, flowing paragraph."
        }
        SuggestionKind::ArtStyle => {
            "You are a creative assistant for a children's book illustrator. Generate a single, concise, \
             and evocative art style description. The style should be suitable for a children's picture \
             book. Provide only the description text, without any labels or quotes. Example: 'Soft \
             watercolour storybook illustration with pastel edges and a gentle paper grain texture.'"
        }
        SuggestionKind::Story => {
            "You are a creative assistant for a children's book author. Generate a short, complete, and \
             imaginative story suitable for kids aged 6-8. The story should be about 5-6 short paragraphs \
             long. Provide only the story text, without any title, labels, or quotes."
        }
    }
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n[]\n```"), "[]");
        assert_eq!(strip_code_blocks("```\n[]\n```"), "[]");
        assert_eq!(strip_code_blocks("  ```json  \n  []  \n  ```  "), "[]");
    }

    #[test]
    fn test_parse_pages_accepts_fenced_json() {
        let response = "```json\n[{\"pageText\": \"One\", \"mood\": \"calm\"}, {\"pageText\": \"Two\"}]\n```";
        let pages = parse_pages(response).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].mood, "calm");
        assert_eq!(pages[1].page_text, "Two");
    }

    #[test]
    fn test_parse_pages_empty_array_is_ok() {
        assert!(parse_pages("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_pages_garbage_is_user_facing_error() {
        let err = parse_pages("Once upon a time...").unwrap_err();
        assert_eq!(err.to_string(), PAGINATION_ERROR);

        // An object instead of an array is also rejected
        assert!(parse_pages(r#"{"pageText": "x"}"#).is_err());
    }

    #[test]
    fn test_illustration_prompt_embeds_inputs() -> Result<()> {
        let page = PageData {
            page_text: "Mina opens the door.".to_string(),
            setting: "A cottage".to_string(),
            ..Default::default()
        };
        let prompt = illustration_prompt(&page, "Mina the mouse", "Watercolour")?;

        assert!(prompt.contains("CHARACTER BIBLE (Strictly Adhere): Mina the mouse"));
        assert!(prompt.contains("ART STYLE: Watercolour"));
        assert!(prompt.contains("\"pageText\":\"Mina opens the door.\""));
        assert!(prompt.contains("\"setting\":\"A cottage\""));
        Ok(())
    }

    #[test]
    fn test_image_prompt_appends_negative_prompt_once() {
        assert_eq!(
            image_prompt("A mouse in a garden."),
            format!("A mouse in a garden. Negative prompt: {}.", IMAGE_NEGATIVE_PROMPT)
        );
    }

    #[test]
    fn test_schema_is_array_of_pages() {
        let schema = page_schema();
        assert_eq!(schema["type"], "ARRAY");
        assert_eq!(schema["items"]["properties"]["keyProps"]["type"], "ARRAY");
    }

    #[test]
    fn test_suggestion_prompts_differ() {
        let c = suggestion_prompt(SuggestionKind::Character);
        let a = suggestion_prompt(SuggestionKind::ArtStyle);
        let s = suggestion_prompt(SuggestionKind::Story);
        assert!(c.contains("character bible"));
        assert!(a.contains("art style"));
        assert!(s.contains("5-6 short paragraphs"));
    }
}
