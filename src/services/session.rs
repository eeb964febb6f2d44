use anyhow::{anyhow, Context, Result};
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::{AudioConfig, Config};
use crate::core::media::{MediaHandle, MediaStore};
use crate::core::state::{
    LoadingState, Page, PageAssets, PageData, PageStatus, SessionSnapshot, StorySettings, ViewMode,
};
use crate::services::gateway::{StoryGateway, SuggestionKind};
use crate::services::narration::{render_narration, AudioDecoder, PcmDecoder};
use crate::services::player::Player;

pub const PAGINATING_MESSAGE: &str = "Paginating your story";
pub const EMPTY_STORY_ERROR: &str = "The story couldn't be paginated. Try a different one.";
pub const BLANK_STORY_ERROR: &str = "Please write a story first.";
pub const SESSION_RESET_ERROR: &str = "Session was reset before the story was ready.";

/// Collaborators the controller drives.
pub struct Services {
    pub gateway: Arc<dyn StoryGateway>,
    pub store: Arc<dyn MediaStore>,
    /// `None` keeps narration as the raw backend payload.
    pub decoder: Option<Arc<dyn AudioDecoder>>,
    pub player: Arc<dyn Player>,
}

struct Inner {
    gateway: Arc<dyn StoryGateway>,
    store: Arc<dyn MediaStore>,
    decoder: Option<Arc<dyn AudioDecoder>>,
    player: Arc<dyn Player>,
    audio: AudioConfig,
    state: watch::Sender<SessionSnapshot>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct GenerationJob {
    session_id: u64,
    index: usize,
    data: PageData,
    settings: StorySettings,
}

/// Owns the story session: the page sequence, reading position and the
/// per-page asset pipeline.
///
/// Every change is committed to a watch channel, so readers always see a
/// whole, consistent [`SessionSnapshot`]. The page vector is shared and copied
/// on write, never mutated under a reader.
#[derive(Clone)]
pub struct StoryController {
    inner: Arc<Inner>,
}

impl StoryController {
    pub fn new(services: Services, audio: AudioConfig, settings: StorySettings) -> Self {
        let (state, _) = watch::channel(SessionSnapshot {
            settings,
            ..Default::default()
        });
        Self {
            inner: Arc::new(Inner {
                gateway: services.gateway,
                store: services.store,
                decoder: services.decoder,
                player: services.player,
                audio,
                state,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn from_config(
        config: &Config,
        gateway: Arc<dyn StoryGateway>,
        store: Arc<dyn MediaStore>,
        player: Arc<dyn Player>,
    ) -> Self {
        let decoder: Option<Arc<dyn AudioDecoder>> = if config.audio.decode {
            Some(Arc::new(PcmDecoder::new()))
        } else {
            None
        };
        Self::new(
            Services {
                gateway,
                store,
                decoder,
                player,
            },
            config.audio.clone(),
            config.story.clone(),
        )
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    fn modify(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        self.inner.state.send_modify(f);
    }

    /// Applies `f`; only a `Some` result counts as a change and is published.
    fn modify_if<R>(&self, f: impl FnOnce(&mut SessionSnapshot) -> Option<R>) -> Option<R> {
        let mut out = None;
        self.inner.state.send_if_modified(|snap| {
            out = f(snap);
            out.is_some()
        });
        out
    }

    // --- Setup ---

    pub async fn suggest(&self, kind: SuggestionKind) -> Result<String> {
        self.inner.gateway.suggest(kind).await.map_err(|e| {
            error!("Failed to get {} suggestion: {:#}", kind, e);
            e
        })
    }

    pub fn update_settings(&self, settings: StorySettings) {
        self.modify(|snap| snap.settings = settings);
    }

    /// Segments `story` into pages and enters reading mode.
    ///
    /// On failure the session stays in setup mode and the message is also
    /// exposed as `snapshot().error`. A reset while paginating discards the
    /// result and returns an error without touching the new session.
    pub async fn submit_story(&self, story: &str, settings: StorySettings) -> Result<()> {
        if story.trim().is_empty() {
            self.modify(|snap| snap.error = Some(BLANK_STORY_ERROR.to_string()));
            return Err(anyhow!(BLANK_STORY_ERROR));
        }
        if self.snapshot().mode == ViewMode::Reading {
            self.reset().await;
        }

        let session_id = self
            .modify_if(|snap| {
                snap.error = None;
                snap.loading = LoadingState::active(PAGINATING_MESSAGE);
                snap.settings = settings;
                Some(snap.session_id)
            })
            .unwrap_or_default();

        let result = match self.inner.gateway.paginate_story(story.trim()).await {
            Ok(pages) if pages.is_empty() => Err(anyhow!(EMPTY_STORY_ERROR)),
            other => other,
        };

        let pages = match result {
            Ok(pages) => pages,
            Err(e) => {
                error!("Story pagination failed: {:#}", e);
                let message = e.to_string();
                self.modify_if(|snap| {
                    (snap.session_id == session_id).then(|| {
                        snap.error = Some(message.clone());
                        snap.loading = LoadingState::idle();
                    })
                });
                return Err(e);
            }
        };

        let count = pages.len();
        let entered = self.modify_if(|snap| {
            if snap.session_id != session_id {
                // Reset while paginating
                return None;
            }
            snap.session_id += 1;
            snap.pages = Arc::new(
                pages
                    .into_iter()
                    .enumerate()
                    .map(|(i, data)| Page::pending(i, data))
                    .collect(),
            );
            snap.current = 0;
            snap.mode = ViewMode::Reading;
            snap.loading = LoadingState::idle();
            snap.playing = false;
            Some(())
        });

        if entered.is_none() {
            debug!("Discarding pagination result for a reset session");
            return Err(anyhow!(SESSION_RESET_ERROR));
        }

        info!("Story ready with {} pages", count);
        self.trigger_window(0);
        Ok(())
    }

    // --- Page pipeline ---

    /// Starts generation for `index` if that page is still pending.
    ///
    /// Returns whether a generation was started. Must be called from within a
    /// Tokio runtime.
    pub fn trigger_page(&self, index: usize) -> bool {
        let job = self.modify_if(|snap| {
            if snap.mode != ViewMode::Reading {
                return None;
            }
            let page = snap.pages.get(index)?;
            if page.status != PageStatus::Pending {
                return None;
            }
            let job = GenerationJob {
                session_id: snap.session_id,
                index,
                data: page.data.clone(),
                settings: snap.settings.clone(),
            };
            Arc::make_mut(&mut snap.pages)[index].status = PageStatus::Generating;
            Some(job)
        });

        let Some(job) = job else {
            return false;
        };

        debug!("Generating assets for page {}", index);
        let controller = self.clone();
        let handle = tokio::spawn(async move { controller.run_generation(job).await });
        if let Ok(mut tasks) = self.inner.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(handle);
        }
        true
    }

    /// Sends an `error` page back to `pending` and triggers it again.
    pub fn retry_page(&self, index: usize) -> bool {
        let revived = self.modify_if(|snap| {
            if snap.mode != ViewMode::Reading {
                return None;
            }
            if snap.pages.get(index)?.status != PageStatus::Error {
                return None;
            }
            let page = &mut Arc::make_mut(&mut snap.pages)[index];
            page.status = PageStatus::Pending;
            page.assets = None;
            Some(())
        });
        revived.is_some() && self.trigger_page(index)
    }

    fn trigger_window(&self, index: usize) {
        self.trigger_page(index);
        self.trigger_page(index + 1);
    }

    async fn run_generation(&self, job: GenerationJob) {
        let outcome = self.produce_assets(&job).await;

        let leftover = match outcome {
            Ok(assets) => {
                let mut assets = Some(assets);
                self.modify_if(|snap| {
                    if snap.session_id != job.session_id {
                        return None;
                    }
                    let page = &mut Arc::make_mut(&mut snap.pages)[job.index];
                    page.status = PageStatus::Ready;
                    page.assets = assets.take();
                    Some(())
                });
                assets
            }
            Err(e) => {
                error!("Failed to generate assets for page {}: {:#}", job.index, e);
                self.modify_if(|snap| {
                    if snap.session_id != job.session_id {
                        return None;
                    }
                    Arc::make_mut(&mut snap.pages)[job.index].status = PageStatus::Error;
                    Some(())
                });
                None
            }
        };

        if let Some(stale) = leftover {
            debug!("Dropping assets for page {} of a closed session", job.index);
            self.release(&[stale.illustration, stale.narration]).await;
        }
    }

    async fn produce_assets(&self, job: &GenerationJob) -> Result<PageAssets> {
        let gateway = &self.inner.gateway;
        let settings = &job.settings;

        let prompt = gateway
            .create_illustration_prompt(&job.data, &settings.character, &settings.art_style)
            .await?;
        let image = gateway
            .generate_illustration(&prompt, settings.aspect_ratio)
            .await?;
        let audio = gateway.generate_audio(&job.data.page_text).await?;
        let narration = render_narration(self.inner.decoder.as_deref(), audio, &self.inner.audio).await?;

        let store = &self.inner.store;
        let illustration = store.put(image.data, &image.mime_type).await?;
        let narration = match store.put(narration.data, &narration.mime_type).await {
            Ok(handle) => handle,
            Err(e) => {
                self.release(&[illustration]).await;
                return Err(e);
            }
        };

        Ok(PageAssets {
            illustration,
            narration,
            description: prompt,
        })
    }

    async fn release(&self, handles: &[MediaHandle]) {
        for handle in handles {
            if let Err(e) = self.inner.store.release(handle).await {
                warn!("Failed to release {}: {:#}", handle, e);
            }
        }
    }

    /// Waits for every generation started so far, including ones started meanwhile.
    pub async fn settle(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = match self.inner.tasks.lock() {
                Ok(mut tasks) => tasks.drain(..).collect(),
                Err(_) => return,
            };
            if pending.is_empty() {
                return;
            }
            for result in join_all(pending).await {
                if let Err(e) = result {
                    error!("Generation task panicked: {}", e);
                }
            }
        }
    }

    /// Resolves once page `index` is ready or failed, or the session changes.
    pub async fn wait_for_page(&self, index: usize) -> Option<PageStatus> {
        let mut rx = self.subscribe();
        let session_id = rx.borrow().session_id;
        let snap = rx
            .wait_for(|s| {
                s.session_id != session_id
                    || s.pages.get(index).map_or(true, |p| p.status.is_resolved())
            })
            .await
            .ok()?;
        if snap.session_id != session_id {
            return None;
        }
        snap.pages.get(index).map(|p| p.status)
    }

    // --- Navigation ---

    pub async fn advance(&self) -> bool {
        self.move_to(|current, len| (current + 1 < len).then_some(current + 1))
            .await
    }

    pub async fn retreat(&self) -> bool {
        self.move_to(|current, _| current.checked_sub(1)).await
    }

    pub async fn go_to_page(&self, index: usize) -> bool {
        self.move_to(|current, len| (index < len && index != current).then_some(index))
            .await
    }

    async fn move_to(&self, target: impl FnOnce(usize, usize) -> Option<usize>) -> bool {
        let moved = self.modify_if(|snap| {
            if snap.mode != ViewMode::Reading {
                return None;
            }
            let next = target(snap.current, snap.pages.len())?;
            snap.current = next;
            snap.playing = false;
            Some(next)
        });

        let Some(index) = moved else {
            return false;
        };
        self.stop_player().await;
        self.trigger_window(index);
        true
    }

    // --- Playback ---

    /// Plays or pauses the current page's narration. Returns whether audio is now playing.
    pub async fn toggle_playback(&self) -> bool {
        let player = &self.inner.player;
        if player.is_playing() {
            self.stop_player().await;
            self.modify(|snap| snap.playing = false);
            return false;
        }

        let snap = self.snapshot();
        let Some(assets) = snap.current_page().and_then(|p| p.assets.as_ref()) else {
            return false;
        };

        let started = match self.inner.store.read(&assets.narration).await {
            Ok(audio) => player.play(&audio, assets.narration.mime_type()).await,
            Err(e) => Err(e),
        };
        let playing = match started {
            Ok(()) => true,
            Err(e) => {
                warn!("Audio play failed: {:#}", e);
                false
            }
        };
        self.modify(|snap| snap.playing = playing);
        playing
    }

    /// Brings `playing` in line with the player, e.g. after a clip ends.
    pub fn sync_playback(&self) -> bool {
        let playing = self.inner.player.is_playing();
        self.modify_if(|snap| (snap.playing != playing).then(|| snap.playing = playing));
        playing
    }

    async fn stop_player(&self) {
        if let Err(e) = self.inner.player.stop().await {
            warn!("Failed to stop playback: {:#}", e);
        }
    }

    // --- Session ---

    /// Drops the session and releases every generated asset. Settings are kept.
    pub async fn reset(&self) {
        self.stop_player().await;

        let mut old_pages = Arc::new(Vec::new());
        self.modify(|snap| {
            old_pages = std::mem::take(&mut snap.pages);
            *snap = SessionSnapshot {
                session_id: snap.session_id + 1,
                settings: snap.settings.clone(),
                ..Default::default()
            };
        });

        let handles: Vec<MediaHandle> = old_pages
            .iter()
            .filter_map(|p| p.assets.as_ref())
            .flat_map(|a| [a.illustration.clone(), a.narration.clone()])
            .collect();
        if !handles.is_empty() {
            debug!("Releasing {} media handles", handles.len());
        }
        self.release(&handles).await;
    }

    /// Writes a ready page's illustration and narration into `dir`.
    pub async fn export_page(&self, index: usize, dir: &Path) -> Result<Vec<PathBuf>> {
        let snap = self.snapshot();
        let page = snap
            .pages
            .get(index)
            .ok_or_else(|| anyhow!("No page {}", index + 1))?;
        let assets = page
            .assets
            .as_ref()
            .ok_or_else(|| anyhow!("Page {} is not ready ({})", index + 1, page.status))?;

        tokio::fs::create_dir_all(dir).await?;
        let mut written = Vec::new();
        for handle in [&assets.illustration, &assets.narration] {
            let bytes = self.inner.store.read(handle).await?;
            let path = dir.join(format!("page-{:02}.{}", index + 1, handle.extension()));
            tokio::fs::write(&path, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            written.push(path);
        }
        Ok(written)
    }
}
