pub mod reader;
pub mod setup;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::InquireError;
use std::future::Future;
use std::time::Duration;

use crate::core::config::Config;
use crate::services::session::StoryController;

/// Alternates between the setup form and the reader until the user quits.
pub async fn run(controller: &StoryController, config: &Config) -> Result<()> {
    loop {
        if !setup::run_setup(controller).await? {
            break;
        }
        match reader::run_reader(controller, config).await? {
            reader::ReaderExit::NewStory => controller.reset().await,
            reader::ReaderExit::Quit => break,
        }
    }
    controller.reset().await;
    println!("Goodbye!");
    Ok(())
}

pub(crate) fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

/// Drives `fut` while a spinner mirrors the session's loading message.
pub(crate) async fn with_loading<F: Future>(
    controller: &StoryController,
    message: &str,
    fut: F,
) -> Result<F::Output> {
    let pb = spinner(message)?;
    let mut rx = controller.subscribe();
    tokio::pin!(fut);

    let output = loop {
        tokio::select! {
            out = &mut fut => break out,
            changed = rx.changed() => {
                if changed.is_err() {
                    break (&mut fut).await;
                }
                let loading = rx.borrow_and_update().loading.clone();
                if loading.active {
                    pb.set_message(loading.message);
                }
            }
        }
    };
    pb.finish_and_clear();
    Ok(output)
}

/// Escape and Ctrl-C on a prompt mean "go back", not a failure.
pub(crate) fn answered<T>(result: Result<T, InquireError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(InquireError::OperationCanceled) | Err(InquireError::OperationInterrupted) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
