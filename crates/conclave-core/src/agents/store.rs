//! Durable backing for the profile registry

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::profile::Profile;

/// Where profile definitions live between restarts
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Load every stored profile
    async fn load_all(&self) -> Result<Vec<Profile>>;

    /// Create or replace a profile
    async fn save(&self, profile: &Profile) -> Result<()>;

    /// Remove a profile; returns false if it was not stored
    async fn remove(&self, name: &str) -> Result<bool>;
}

/// Non-durable store, used in tests and for throwaway registries
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<HashMap<String, Profile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: impl IntoIterator<Item = Profile>) -> Self {
        Self {
            profiles: Mutex::new(
                profiles
                    .into_iter()
                    .map(|p| (p.name.clone(), p))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn load_all(&self) -> Result<Vec<Profile>> {
        Ok(self.profiles.lock().await.values().cloned().collect())
    }

    async fn save(&self, profile: &Profile) -> Result<()> {
        self.profiles
            .lock()
            .await
            .insert(profile.name.clone(), profile.clone());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        Ok(self.profiles.lock().await.remove(name).is_some())
    }
}

/// One `<name>.yaml` document per profile in a directory
pub struct YamlProfileStore {
    dir: PathBuf,
}

impl YamlProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.yaml", name))
    }
}

#[async_trait]
impl ProfileStore for YamlProfileStore {
    async fn load_all(&self) -> Result<Vec<Profile>> {
        if !self.dir.exists() {
            warn!("Profile directory {} does not exist", self.dir.display());
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to read profile dir {}", self.dir.display()))?;

        let mut profiles = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read profile {}", path.display()))?;
            match serde_yml::from_str::<Profile>(&content) {
                Ok(mut profile) => {
                    // The file stem is authoritative when the document omits a name
                    if profile.name.is_empty()
                        && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                    {
                        profile.name = stem.to_string();
                    }
                    debug!("Loaded profile '{}' from {}", profile.name, path.display());
                    profiles.push(profile);
                }
                Err(e) => {
                    warn!("Skipping unreadable profile {}: {}", path.display(), e);
                }
            }
        }

        info!("Loaded {} profiles from {}", profiles.len(), self.dir.display());
        Ok(profiles)
    }

    async fn save(&self, profile: &Profile) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create profile dir {}", self.dir.display()))?;

        let yaml = serde_yml::to_string(profile).context("Failed to serialize profile")?;
        let path = self.path_for(&profile.name);
        let tmp = path.with_extension("yaml.tmp");

        tokio::fs::write(&tmp, yaml)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move profile into {}", path.display()))?;

        debug!("Saved profile '{}' to {}", profile.name, path.display());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}
