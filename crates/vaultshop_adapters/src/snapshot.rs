use std::path::PathBuf;

use async_trait::async_trait;
use directories::ProjectDirs;
use tokio::fs;
use tracing::{debug, instrument};
use vaultshop_core::entities::Credentials;
use vaultshop_core::ports::SnapshotStore;
use vaultshop_core::Error;

/// Credential snapshot persisted as a single JSON file.
///
/// Holds at most one session; login/password only appear in the file when
/// the user opted into auto-login.
pub struct FileSnapshotStore {
    store_path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            store_path: data_dir.join("session.json"),
        }
    }

    /// Store rooted at the platform data directory
    pub fn default_location() -> Self {
        let data_dir = ProjectDirs::from("com", "vaultshop", "vaultshop")
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(data_dir)
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<Option<Credentials>, Error> {
        if !fs::try_exists(&self.store_path).await.unwrap_or(false) {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.store_path).await?;
        let credentials = serde_json::from_str(&content)
            .map_err(|e| Error::Snapshot(format!("failed to parse session snapshot: {}", e)))?;
        debug!("session snapshot loaded");
        Ok(Some(credentials))
    }

    #[instrument(skip_all)]
    async fn save(&self, credentials: &Credentials) -> Result<(), Error> {
        if let Some(parent) = self.store_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(credentials)
            .map_err(|e| Error::Snapshot(format!("failed to serialize session: {}", e)))?;
        fs::write(&self.store_path, content).await?;
        debug!("session snapshot saved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self) -> Result<(), Error> {
        if fs::try_exists(&self.store_path).await.unwrap_or(false) {
            fs::remove_file(&self.store_path).await?;
            debug!("session snapshot deleted");
        }
        Ok(())
    }
}
