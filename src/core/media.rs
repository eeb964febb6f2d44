use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Reference to a generated image or audio clip held by a [`MediaStore`].
///
/// A handle stays valid until it is released; reading a released handle fails.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaHandle {
    id: u64,
    mime_type: String,
    len: usize,
}

impl MediaHandle {
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// File extension matching the media type, used when exporting.
    pub fn extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/l16" => "pcm",
        _ => "bin",
    }
}

impl fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "media:{}", self.id)
    }
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn put(&self, content: Vec<u8>, mime_type: &str) -> Result<MediaHandle>;
    async fn read(&self, handle: &MediaHandle) -> Result<Arc<[u8]>>;
    /// Releasing an unknown or already released handle is a no-op.
    async fn release(&self, handle: &MediaHandle) -> Result<()>;
}

// --- In-memory Implementation ---

struct Entry {
    mime_type: String,
    bytes: Arc<[u8]>,
}

/// Session-scoped store; content lives only as long as the process.
pub struct MemoryMediaStore {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Entry>>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn live_count(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<u64, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("Media store lock poisoned"))
    }
}

impl Default for MemoryMediaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn put(&self, content: Vec<u8>, mime_type: &str) -> Result<MediaHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = MediaHandle {
            id,
            mime_type: mime_type.to_string(),
            len: content.len(),
        };
        self.entries()?.insert(
            id,
            Entry {
                mime_type: handle.mime_type.clone(),
                bytes: content.into(),
            },
        );
        log::debug!("Stored {} ({}, {} bytes)", handle, mime_type, handle.len);
        Ok(handle)
    }

    async fn read(&self, handle: &MediaHandle) -> Result<Arc<[u8]>> {
        self.entries()?
            .get(&handle.id)
            .map(|e| e.bytes.clone())
            .ok_or_else(|| anyhow!("Media {} was released or never existed", handle))
    }

    async fn release(&self, handle: &MediaHandle) -> Result<()> {
        if let Some(entry) = self.entries()?.remove(&handle.id) {
            log::debug!("Released {} ({})", handle, entry.mime_type);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_read_release() -> Result<()> {
        let store = MemoryMediaStore::new();
        let handle = store.put(vec![1, 2, 3], "audio/wav").await?;

        assert_eq!(handle.len(), 3);
        assert_eq!(handle.mime_type(), "audio/wav");
        assert_eq!(&*store.read(&handle).await?, &[1, 2, 3]);
        assert_eq!(store.live_count(), 1);

        store.release(&handle).await?;
        assert!(store.read(&handle).await.is_err());

        // Releasing twice is harmless
        store.release(&handle).await?;
        assert_eq!(store.live_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_handles_are_unique() -> Result<()> {
        let store = MemoryMediaStore::new();
        let a = store.put(vec![0], "image/png").await?;
        let b = store.put(vec![0], "image/png").await?;
        assert_ne!(a, b);
        assert_eq!(store.live_count(), 2);

        store.release(&a).await?;
        assert_eq!(&*store.read(&b).await?, &[0]);
        assert_eq!(store.live_count(), 1);
        Ok(())
    }

    #[test]
    fn test_extension_from_mime() {
        let handle = |mime: &str| MediaHandle {
            id: 1,
            mime_type: mime.to_string(),
            len: 0,
        };
        assert_eq!(handle("image/png").extension(), "png");
        assert_eq!(handle("audio/wav").extension(), "wav");
        assert_eq!(handle("audio/L16;codec=pcm;rate=24000").extension(), "pcm");
        assert_eq!(handle("application/x-unknown").extension(), "bin");
    }
}
