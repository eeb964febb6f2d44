use anyhow::Result;
use std::sync::Arc;

use storybook::core::config::Config;
use storybook::core::media::MemoryMediaStore;
use storybook::services::gateway::{create_gateway, StoryGateway};
use storybook::services::player::CommandPlayer;
use storybook::services::session::StoryController;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load config (defaults when config.yml is absent)
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            return Err(e);
        }
    };
    config.ensure_directories()?;

    // 2. Gateway; a missing credential is fatal
    let gateway: Arc<dyn StoryGateway> = match create_gateway(&config.gemini) {
        Ok(gateway) => Arc::from(gateway),
        Err(e) => {
            eprintln!("{:#}", e);
            eprintln!(
                "Please export {} with a Gemini API key before starting.",
                config.gemini.api_key_env
            );
            return Err(e);
        }
    };

    // 3. Session
    let store = Arc::new(MemoryMediaStore::new());
    let player = Arc::new(CommandPlayer::new(config.audio.player.clone()));
    let controller = StoryController::from_config(&config, gateway, store, player);

    // 4. Run
    storybook::ui::run(&controller, &config).await
}
