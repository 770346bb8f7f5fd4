//! Profile registry — validated, durable set of agent profiles

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::profile::{DEFAULT_PROFILE, Profile};
use super::store::{MemoryProfileStore, ProfileStore};
use crate::error::{ConclaveError, Result};

/// What a manager's planning prompt needs to know about a delegate
#[derive(Debug, Clone, PartialEq)]
pub struct Persona {
    pub name: String,
    pub description: String,
    pub persona: String,
}

/// Holds every registered profile. Writes go to the store first, then
/// become visible to readers.
pub struct ProfileRegistry {
    profiles: RwLock<BTreeMap<String, Profile>>,
    store: Arc<dyn ProfileStore>,
}

impl ProfileRegistry {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self {
            profiles: RwLock::new(BTreeMap::new()),
            store,
        }
    }

    /// Registry backed by a throwaway in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryProfileStore::new()))
    }

    /// Populate from the store. Non-manager profiles are registered first so
    /// that manager references resolve. Invalid documents are skipped.
    pub async fn load(&self) -> Result<usize> {
        let mut stored = self
            .store
            .load_all()
            .await
            .map_err(ConclaveError::storage)?;
        stored.sort_by(|a, b| {
            a.is_manager()
                .cmp(&b.is_manager())
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut profiles = self.profiles.write().await;
        let mut loaded = 0;
        for profile in stored {
            if let Err(e) = profile.check_fields() {
                warn!("ProfileRegistry: skipping stored profile '{}': {}", profile.name, e);
                continue;
            }
            for reference in profile.references() {
                if !profiles.contains_key(reference) {
                    warn!(
                        "ProfileRegistry: profile '{}' references unknown profile '{}'",
                        profile.name, reference
                    );
                }
            }
            debug!("ProfileRegistry: loaded '{}'", profile.name);
            profiles.insert(profile.name.clone(), profile);
            loaded += 1;
        }

        info!("ProfileRegistry: loaded {} profiles", loaded);
        Ok(loaded)
    }

    /// Add a new profile
    pub async fn register(&self, profile: Profile) -> Result<Profile> {
        let mut profiles = self.profiles.write().await;
        if profiles.contains_key(&profile.name) {
            return Err(ConclaveError::Conflict(profile.name));
        }
        validate_against(&profile, &profiles, None)?;

        self.store
            .save(&profile)
            .await
            .map_err(ConclaveError::storage)?;
        info!(
            "ProfileRegistry: registered '{}' ({})",
            profile.name, profile.agent.agent_type
        );
        profiles.insert(profile.name.clone(), profile.clone());
        Ok(profile)
    }

    /// Replace an existing profile
    pub async fn update(&self, name: &str, profile: Profile) -> Result<Profile> {
        if profile.name != name {
            return Err(ConclaveError::validation(format!(
                "profile name '{}' does not match '{}'",
                profile.name, name
            )));
        }

        let mut profiles = self.profiles.write().await;
        if !profiles.contains_key(name) {
            return Err(ConclaveError::ProfileNotFound(name.to_string()));
        }
        validate_against(&profile, &profiles, Some(name))?;

        self.store
            .save(&profile)
            .await
            .map_err(ConclaveError::storage)?;
        info!("ProfileRegistry: updated '{}'", name);
        profiles.insert(name.to_string(), profile.clone());
        Ok(profile)
    }

    /// Remove a profile nothing else points at
    pub async fn delete(&self, name: &str) -> Result<()> {
        if name == DEFAULT_PROFILE {
            return Err(ConclaveError::in_use(
                name,
                "the default profile cannot be deleted",
            ));
        }

        let mut profiles = self.profiles.write().await;
        if !profiles.contains_key(name) {
            return Err(ConclaveError::ProfileNotFound(name.to_string()));
        }

        let referrers: Vec<&str> = profiles
            .values()
            .filter(|p| p.name != name && p.references_profile(name))
            .map(|p| p.name.as_str())
            .collect();
        if !referrers.is_empty() {
            return Err(ConclaveError::in_use(
                name,
                format!("referenced by {}", quoted(&referrers)),
            ));
        }

        self.store
            .remove(name)
            .await
            .map_err(ConclaveError::storage)?;
        profiles.remove(name);
        info!("ProfileRegistry: deleted '{}'", name);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Profile> {
        self.find(name)
            .await
            .ok_or_else(|| ConclaveError::ProfileNotFound(name.to_string()))
    }

    pub async fn find(&self, name: &str) -> Option<Profile> {
        self.profiles.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.profiles.read().await.contains_key(name)
    }

    /// All profiles, ordered by name
    pub async fn list(&self) -> Vec<Profile> {
        self.profiles.read().await.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.profiles.read().await.len()
    }

    /// Names of profiles whose knowledge base includes `collection`
    pub async fn profiles_using_collection(&self, collection: &str) -> Vec<String> {
        self.profiles
            .read()
            .await
            .values()
            .filter(|p| p.uses_collection(collection))
            .map(|p| p.name.clone())
            .collect()
    }

    /// Personas of the named profiles that are currently registered, in the
    /// order given
    pub async fn personas(&self, names: &[String]) -> Vec<Persona> {
        let profiles = self.profiles.read().await;
        names
            .iter()
            .filter_map(|n| profiles.get(n))
            .map(|p| Persona {
                name: p.name.clone(),
                description: p.description.clone(),
                persona: p.agent.persona.clone(),
            })
            .collect()
    }
}

/// Field checks plus reference resolution against the other profiles.
/// `replacing` names the entry being updated, which does not count as a
/// reference target.
fn validate_against(
    profile: &Profile,
    profiles: &BTreeMap<String, Profile>,
    replacing: Option<&str>,
) -> Result<()> {
    profile.check_fields()?;

    let resolves = |name: &str| Some(name) != replacing && profiles.contains_key(name);

    for agent in &profile.agent.available_agents {
        if !resolves(agent) {
            return Err(ConclaveError::validation(format!(
                "available agent '{}' is not a registered profile",
                agent
            )));
        }
    }
    if let Some(fallback) = profile.agent.fallback_agent.as_deref()
        && !resolves(fallback)
    {
        return Err(ConclaveError::validation(format!(
            "fallback agent '{}' is not a registered profile",
            fallback
        )));
    }
    Ok(())
}

fn quoted(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| format!("'{}'", n))
        .collect::<Vec<_>>()
        .join(", ")
}
