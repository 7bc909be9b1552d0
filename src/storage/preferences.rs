use std::{
    collections::BTreeMap,
    future::Future,
    io::{ErrorKind, SeekFrom},
    ops::Deref,
    path::{Path, PathBuf},
};

use anyhow::Result;
use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::{debug, warn};

/// User-preferences style store: opaque string blobs under fixed keys, always read and written
/// whole.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    fn set(&self, key: &str, value: String) -> impl Future<Output = Result<()>> + Send;

    fn remove(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

impl<T: Deref + Sync> KeyValueStore for T
where
    T::Target: KeyValueStore,
{
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send {
        self.deref().get(key)
    }

    fn set(&self, key: &str, value: String) -> impl Future<Output = Result<()>> + Send {
        self.deref().set(key, value)
    }

    fn remove(&self, key: &str) -> impl Future<Output = Result<()>> + Send {
        self.deref().remove(key)
    }
}

/// Keys and blobs kept together in a single JSON object on disk. Writers take an exclusive lock
/// so that a `history` command running next to a session never sees a torn file.
pub struct PreferencesFile {
    path: PathBuf,
}

type Entries = BTreeMap<String, String>;

impl PreferencesFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn read_all(&self) -> Result<Entries> {
        let mut file = match File::open(&self.path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => Err(e)?,
        };
        file.lock_shared()?;
        let mut content = String::new();
        let read = file.read_to_string(&mut content).await;
        file.unlock_async().await?;
        read?;
        Ok(parse_entries(&content, &self.path))
    }

    async fn update(&self, change: impl FnOnce(&mut Entries)) -> Result<()> {
        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .await?;

        // Semi-safe acquire-release, same as for reading.
        file.lock_exclusive()?;
        let result = Self::rewrite(&mut file, &self.path, change).await;
        file.unlock_async().await?;
        result
    }

    async fn rewrite(
        file: &mut File,
        path: &Path,
        change: impl FnOnce(&mut Entries),
    ) -> Result<()> {
        let mut content = String::new();
        file.read_to_string(&mut content).await?;
        let mut entries = parse_entries(&content, path);
        change(&mut entries);

        let serialized = serde_json::to_string_pretty(&entries)?;
        file.set_len(0).await?;
        file.seek(SeekFrom::Start(0)).await?;
        file.write_all(serialized.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        debug!("Wrote {} preference keys to {:?}", entries.len(), path);
        Ok(())
    }
}

fn parse_entries(content: &str, path: &Path) -> Entries {
    if content.trim().is_empty() {
        return Entries::new();
    }
    serde_json::from_str(content).unwrap_or_else(|e| {
        warn!("Preferences in {path:?} are unreadable, starting over: {e}");
        Entries::new()
    })
}

impl KeyValueStore for PreferencesFile {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_owned(), value);
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.update(|entries| {
            entries.remove(key);
        })
        .await
    }
}


#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::{KeyValueStore, PreferencesFile};

    #[tokio::test]
    async fn missing_file_reads_as_empty() -> Result<()> {
        let dir = tempdir()?;
        let store = PreferencesFile::new(dir.path().join("preferences.json"));

        assert_eq!(store.get("completedBlocks").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn keys_are_stored_independently() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("preferences.json");
        let store = PreferencesFile::new(path.clone());

        store.set("a", "[1,2]".into()).await?;
        store.set("b", "long value that is shorter later".into()).await?;
        store.set("b", "short".into()).await?;
        store.remove("a").await?;

        let reopened = PreferencesFile::new(path);
        assert_eq!(reopened.get("a").await?, None);
        assert_eq!(reopened.get("b").await?.as_deref(), Some("short"));
        Ok(())
    }

    #[tokio::test]
    async fn garbage_file_is_replaced_on_write() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, "{not json")?;
        let store = PreferencesFile::new(path);

        assert_eq!(store.get("a").await?, None);
        store.set("a", "x".into()).await?;
        assert_eq!(store.get("a").await?.as_deref(), Some("x"));
        Ok(())
    }
}
