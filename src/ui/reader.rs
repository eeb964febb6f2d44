use anyhow::Result;
use inquire::Select;
use std::fmt;
use std::path::Path;

use crate::core::config::Config;
use crate::core::state::{Page, PageStatus, SessionSnapshot};
use crate::services::session::StoryController;
use crate::ui::{answered, with_loading};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    NewStory,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderAction {
    Next,
    Previous,
    Play,
    Pause,
    Wait,
    Retry,
    Save,
    GoTo,
    NewStory,
    Quit,
}

impl fmt::Display for ReaderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReaderAction::Next => "Next page",
            ReaderAction::Previous => "Previous page",
            ReaderAction::Play => "Play narration",
            ReaderAction::Pause => "Pause narration",
            ReaderAction::Wait => "Wait for this page",
            ReaderAction::Retry => "Retry this page",
            ReaderAction::Save => "Save page to output folder",
            ReaderAction::GoTo => "Go to page...",
            ReaderAction::NewStory => "New story",
            ReaderAction::Quit => "Quit",
        };
        f.write_str(s)
    }
}

struct PageChoice {
    index: usize,
    status: PageStatus,
}

impl fmt::Display for PageChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page {} ({})", self.index + 1, self.status)
    }
}

/// Actions that make sense for the snapshot's current page.
fn available_actions(snap: &SessionSnapshot) -> Vec<ReaderAction> {
    let mut actions = Vec::new();
    if snap.has_next() {
        actions.push(ReaderAction::Next);
    }
    if snap.has_previous() {
        actions.push(ReaderAction::Previous);
    }
    match snap.current_page().map(|p| p.status) {
        Some(PageStatus::Ready) => {
            actions.push(if snap.playing {
                ReaderAction::Pause
            } else {
                ReaderAction::Play
            });
            actions.push(ReaderAction::Save);
        }
        Some(PageStatus::Pending | PageStatus::Generating) => actions.push(ReaderAction::Wait),
        Some(PageStatus::Error) => actions.push(ReaderAction::Retry),
        None => {}
    }
    if snap.pages.len() > 1 {
        actions.push(ReaderAction::GoTo);
    }
    actions.push(ReaderAction::NewStory);
    actions.push(ReaderAction::Quit);
    actions
}

pub async fn run_reader(controller: &StoryController, config: &Config) -> Result<ReaderExit> {
    loop {
        controller.sync_playback();
        let snap = controller.snapshot();
        let Some(page) = snap.current_page() else {
            return Ok(ReaderExit::NewStory);
        };
        print_page(page, snap.pages.len());

        let prompt = Select::new("", available_actions(&snap)).prompt();
        let Some(action) = answered(prompt)? else {
            return Ok(ReaderExit::Quit);
        };

        match action {
            ReaderAction::Next => {
                controller.advance().await;
            }
            ReaderAction::Previous => {
                controller.retreat().await;
            }
            ReaderAction::Play | ReaderAction::Pause => {
                if !controller.toggle_playback().await && action == ReaderAction::Play {
                    println!("Could not play the narration.");
                }
            }
            ReaderAction::Wait => {
                let index = snap.current;
                with_loading(controller, "Illustrating this page...", controller.wait_for_page(index))
                    .await?;
            }
            ReaderAction::Retry => {
                controller.retry_page(snap.current);
            }
            ReaderAction::Save => {
                let dir = Path::new(&config.output_folder);
                match controller.export_page(snap.current, dir).await {
                    Ok(paths) => {
                        for path in paths {
                            println!("Saved {}", path.display());
                        }
                    }
                    Err(e) => println!("Could not save the page: {:#}", e),
                }
            }
            ReaderAction::GoTo => {
                let choices: Vec<PageChoice> = snap
                    .pages
                    .iter()
                    .map(|p| PageChoice {
                        index: p.index,
                        status: p.status,
                    })
                    .collect();
                let prompt = Select::new("Go to:", choices)
                    .with_starting_cursor(snap.current)
                    .prompt();
                if let Some(choice) = answered(prompt)? {
                    controller.go_to_page(choice.index).await;
                }
            }
            ReaderAction::NewStory => return Ok(ReaderExit::NewStory),
            ReaderAction::Quit => return Ok(ReaderExit::Quit),
        }
    }
}

fn print_page(page: &Page, total: usize) {
    println!();
    println!("--- Page {} of {} ---", page.index + 1, total);
    match (page.placeholder(), &page.assets) {
        (None, Some(assets)) => {
            println!("[Illustration: {}]", assets.description);
            println!(
                "[{} {} bytes, narration {} {} bytes]",
                assets.illustration.mime_type(),
                assets.illustration.len(),
                assets.narration.mime_type(),
                assets.narration.len()
            );
        }
        (Some(placeholder), _) => println!("[{}]", placeholder),
        (None, None) => {}
    }
    println!();
    println!("{}", page.text());
}
