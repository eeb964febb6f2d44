use anyhow::{Context, Result};
use inquire::{Select, Text};
use log::warn;
use std::fmt;

use crate::core::state::{AspectRatio, StorySettings};
use crate::services::gateway::SuggestionKind;
use crate::services::session::{StoryController, PAGINATING_MESSAGE};
use crate::ui::{answered, with_loading};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetupAction {
    WriteStory,
    LoadStory,
    SuggestStory,
    EditCharacter,
    SuggestCharacter,
    EditArtStyle,
    SuggestArtStyle,
    AspectRatio,
    Create,
    Quit,
}

impl fmt::Display for SetupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SetupAction::WriteStory => "Write the story",
            SetupAction::LoadStory => "Load the story from a file",
            SetupAction::SuggestStory => "Suggest a story",
            SetupAction::EditCharacter => "Edit the main character",
            SetupAction::SuggestCharacter => "Suggest a character",
            SetupAction::EditArtStyle => "Edit the art style",
            SetupAction::SuggestArtStyle => "Suggest an art style",
            SetupAction::AspectRatio => "Choose the aspect ratio",
            SetupAction::Create => "Create storybook",
            SetupAction::Quit => "Quit",
        };
        f.write_str(s)
    }
}

const ACTIONS: [SetupAction; 10] = [
    SetupAction::WriteStory,
    SetupAction::LoadStory,
    SetupAction::SuggestStory,
    SetupAction::EditCharacter,
    SetupAction::SuggestCharacter,
    SetupAction::EditArtStyle,
    SetupAction::SuggestArtStyle,
    SetupAction::AspectRatio,
    SetupAction::Create,
    SetupAction::Quit,
];

/// Runs the setup form. Returns `false` when the user chose to quit.
pub async fn run_setup(controller: &StoryController) -> Result<bool> {
    let mut story = String::new();

    loop {
        let settings = controller.snapshot().settings;
        print_summary(&story, &settings);

        let Some(action) = answered(Select::new("What next?", ACTIONS.to_vec()).prompt())? else {
            return Ok(false);
        };

        match action {
            SetupAction::WriteStory => {
                let prompt = Text::new("Story:")
                    .with_initial_value(&story)
                    .with_help_message("Use \\n for paragraph breaks")
                    .prompt();
                if let Some(text) = answered(prompt)? {
                    story = text.replace("\\n", "\n");
                }
            }
            SetupAction::LoadStory => {
                if let Some(path) = answered(Text::new("Path to a text file:").prompt())? {
                    match tokio::fs::read_to_string(path.trim())
                        .await
                        .with_context(|| format!("Failed to read {}", path.trim()))
                    {
                        Ok(text) => story = text,
                        Err(e) => println!("{:#}", e),
                    }
                }
            }
            SetupAction::SuggestStory => {
                if let Some(text) = suggest(controller, SuggestionKind::Story).await? {
                    story = text;
                }
            }
            SetupAction::EditCharacter => {
                let prompt = Text::new("Main character:")
                    .with_initial_value(&settings.character)
                    .prompt();
                if let Some(character) = answered(prompt)? {
                    update(controller, settings, |s| s.character = character);
                }
            }
            SetupAction::SuggestCharacter => {
                if let Some(character) = suggest(controller, SuggestionKind::Character).await? {
                    update(controller, settings, |s| s.character = character);
                }
            }
            SetupAction::EditArtStyle => {
                let prompt = Text::new("Art style:")
                    .with_initial_value(&settings.art_style)
                    .prompt();
                if let Some(art_style) = answered(prompt)? {
                    update(controller, settings, |s| s.art_style = art_style);
                }
            }
            SetupAction::SuggestArtStyle => {
                if let Some(art_style) = suggest(controller, SuggestionKind::ArtStyle).await? {
                    update(controller, settings, |s| s.art_style = art_style);
                }
            }
            SetupAction::AspectRatio => {
                let start = AspectRatio::ALL
                    .iter()
                    .position(|a| *a == settings.aspect_ratio)
                    .unwrap_or_default();
                let prompt = Select::new("Aspect ratio:", AspectRatio::ALL.to_vec())
                    .with_starting_cursor(start)
                    .prompt();
                if let Some(aspect_ratio) = answered(prompt)? {
                    update(controller, settings, |s| s.aspect_ratio = aspect_ratio);
                }
            }
            SetupAction::Create => {
                if story.trim().is_empty() {
                    println!("Write or load a story first.");
                    continue;
                }
                let submitted = with_loading(
                    controller,
                    PAGINATING_MESSAGE,
                    controller.submit_story(&story, settings),
                )
                .await?;
                match submitted {
                    Ok(()) => return Ok(true),
                    Err(e) => println!("{}", e),
                }
            }
            SetupAction::Quit => return Ok(false),
        }
    }
}

fn update(controller: &StoryController, mut settings: StorySettings, f: impl FnOnce(&mut StorySettings)) {
    f(&mut settings);
    controller.update_settings(settings);
}

/// Suggestion failures leave the field untouched.
async fn suggest(controller: &StoryController, kind: SuggestionKind) -> Result<Option<String>> {
    let message = format!("Thinking of a {}", kind);
    match with_loading(controller, &message, controller.suggest(kind)).await? {
        Ok(text) if !text.is_empty() => {
            println!("Suggested {}: {}", kind, text);
            Ok(Some(text))
        }
        Ok(_) => {
            warn!("Empty {} suggestion", kind);
            Ok(None)
        }
        Err(e) => {
            println!("Could not get a {} suggestion: {}", kind, e);
            Ok(None)
        }
    }
}

fn print_summary(story: &str, settings: &StorySettings) {
    println!();
    println!("Character:    {}", preview(&settings.character, 70));
    println!("Art style:    {}", preview(&settings.art_style, 70));
    println!("Aspect ratio: {}", settings.aspect_ratio);
    if story.trim().is_empty() {
        println!("Story:        (empty)");
    } else {
        println!("Story:        {} ({} characters)", preview(story, 60), story.chars().count());
    }
}

fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{}...", cut.trim_end())
    }
}
