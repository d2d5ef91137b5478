use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::{broadcast, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::ProfileError;
use crate::launch::{PlayerRef, ProcessBuilder, StartupOptions};
use crate::profile::manifest;
use crate::profile::pack::{pack_files, PackProgress};
use crate::profile::types::{FileRecord, GameProfile, ProfileInfo};
use crate::profile::whitelist::WhitelistFilter;
use crate::server::query::StatusQuery;
use crate::storage::{get_json, set_json, KvStore, PROFILES_KEY};
use crate::version::{ModloaderType, VersionResolver};

const CLIENTS_DIR: &str = "clients";
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// In-memory profile list with an explicit hydration flag.
///
/// `hydrated = false` means the store has never been read; a hydrated cache
/// holding zero profiles is legitimately empty and is not reloaded again.
#[derive(Debug, Default)]
pub(crate) struct ProfileCache {
    hydrated: bool,
    pub(crate) profiles: Vec<GameProfile>,
}

/// Owns the canonical profile list and serializes every mutation back to the
/// key/value store.
///
/// The cache is hydrated from storage exactly once, on first access. Every
/// mutating operation holds the write lock across its whole
/// read-modify-persist sequence, so concurrent callers are serialized by the
/// registry itself.
pub struct ProfileRegistry {
    install_dir: PathBuf,
    pub(crate) store: Arc<dyn KvStore>,
    resolver: Arc<dyn VersionResolver>,
    process_builder: Arc<dyn ProcessBuilder>,
    pub(crate) status_query: Arc<dyn StatusQuery>,
    pub(crate) query_timeout: Duration,
    whitelist_filter: WhitelistFilter,
    pack_progress: PackProgress,
    cache: RwLock<ProfileCache>,
}

impl ProfileRegistry {
    pub fn new(
        install_dir: impl Into<PathBuf>,
        store: Arc<dyn KvStore>,
        resolver: Arc<dyn VersionResolver>,
        process_builder: Arc<dyn ProcessBuilder>,
        status_query: Arc<dyn StatusQuery>,
    ) -> Self {
        Self {
            install_dir: install_dir.into(),
            store,
            resolver,
            process_builder,
            status_query,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            whitelist_filter: WhitelistFilter::default(),
            pack_progress: PackProgress::new(),
            cache: RwLock::new(ProfileCache::default()),
        }
    }

    pub fn with_whitelist_filter(mut self, filter: WhitelistFilter) -> Self {
        self.whitelist_filter = filter;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Client directory a profile of this name installs into.
    pub fn client_dir(&self, name: &str) -> PathBuf {
        self.install_dir.join(CLIENTS_DIR).join(name)
    }

    /// Create a profile, resolve its launch version and persist the list.
    ///
    /// Fails without side effects on empty input, a duplicate name, or a
    /// version/loader pair the resolver rejects.
    pub async fn create(
        &self,
        name: &str,
        version: &str,
        loader: ModloaderType,
        icon: &str,
        description: &str,
    ) -> Result<GameProfile> {
        if name.trim().is_empty() {
            return Err(ProfileError::Validation("profile name must not be empty".into()).into());
        }
        if version.trim().is_empty() {
            return Err(ProfileError::Validation("game version must not be empty".into()).into());
        }

        let mut cache = self.write_loaded().await?;

        if cache.profiles.iter().any(|p| p.name == name) {
            return Err(ProfileError::DuplicateName(name.to_string()).into());
        }

        let launch_version = self
            .resolver
            .resolve(version, loader)
            .await
            .map_err(|e| {
                e.context(ProfileError::Resolution {
                    version: version.to_string(),
                    loader,
                })
            })?;

        let profile = GameProfile {
            name: name.to_string(),
            game_version: version.to_string(),
            launch_version,
            loader,
            client_path: self.client_dir(name),
            description: description.to_string(),
            icon_base64: icon.to_string(),
            created_at: Utc::now(),
            file_whitelist: None,
            servers: Vec::new(),
        };

        cache.profiles.push(profile.clone());
        self.persist(&cache.profiles).await?;

        log::info!("Created profile {} ({} / {})", name, version, loader);
        Ok(profile)
    }

    /// Remove a profile by name. An absent name is a no-op on the list but
    /// the (unchanged) list is still persisted.
    ///
    /// With `delete_files` the client directory is deleted first; a failed
    /// delete aborts the removal and is surfaced to the caller.
    pub async fn remove(&self, name: &str, delete_files: bool) -> Result<()> {
        let mut cache = self.write_loaded().await?;

        if let Some(pos) = cache.profiles.iter().position(|p| p.name == name) {
            if delete_files {
                let client_path = cache.profiles[pos].client_path.clone();
                if client_path.exists() {
                    fs::remove_dir_all(&client_path)
                        .await
                        .with_context(|| format!("Delete client directory {:?}", client_path))?;
                }
            }
            cache.profiles.remove(pos);
            log::info!("Removed profile {}", name);
        } else {
            log::debug!("Profile {} not present, persisting unchanged list", name);
        }

        self.persist(&cache.profiles).await
    }

    /// Rename a profile and update its display metadata.
    ///
    /// When a directory for `new_name` already exists the update is skipped
    /// entirely (no mutation, no persist) and `Ok(false)` is returned. On an
    /// actual rename the metadata is persisted first; a failed directory
    /// rename is swallowed into the returned boolean and never rolls the
    /// metadata back. `Ok(true)` means metadata and disk agree.
    pub async fn update(
        &self,
        name: &str,
        new_name: &str,
        new_icon: &str,
        new_description: &str,
    ) -> Result<bool> {
        if new_name.trim().is_empty() {
            return Err(ProfileError::Validation("profile name must not be empty".into()).into());
        }

        let mut cache = self.write_loaded().await?;

        let Some(pos) = cache.profiles.iter().position(|p| p.name == name) else {
            log::warn!("Cannot update unknown profile {}", name);
            return Ok(false);
        };

        let needs_rename = name != new_name;
        let old_dir = cache.profiles[pos].client_path.clone();
        let new_dir = self.client_dir(new_name);

        if needs_rename && new_dir.exists() {
            log::warn!(
                "Skipping update of {}: a client directory for {} already exists",
                name,
                new_name
            );
            return Ok(false);
        }

        let profile = &mut cache.profiles[pos];
        profile.name = new_name.to_string();
        profile.icon_base64 = new_icon.to_string();
        profile.description = new_description.to_string();
        profile.client_path = new_dir.clone();

        self.persist(&cache.profiles).await?;

        if !needs_rename {
            return Ok(true);
        }
        Ok(rename_client_dir(&old_dir, &new_dir).await)
    }

    pub async fn list(&self) -> Result<Vec<GameProfile>> {
        Ok(self.read_loaded().await?.profiles.clone())
    }

    pub async fn get(&self, name: &str) -> Result<Option<GameProfile>> {
        Ok(self
            .read_loaded()
            .await?
            .profiles
            .iter()
            .find(|p| p.name == name)
            .cloned())
    }

    /// Whether a profile of this name could be created right now.
    pub async fn can_add(&self, name: &str) -> Result<bool> {
        Ok(!self
            .read_loaded()
            .await?
            .profiles
            .iter()
            .any(|p| p.name == name))
    }

    /// Replace the list with an empty one and persist.
    pub async fn clear(&self) -> Result<()> {
        let mut cache = self.write_loaded().await?;
        cache.profiles.clear();
        self.persist(&cache.profiles).await
    }

    /// Persist the current list as-is.
    pub async fn save(&self) -> Result<()> {
        let cache = self.write_loaded().await?;
        self.persist(&cache.profiles).await
    }

    /// Add a file to the profile's overwrite whitelist. Adding a record whose
    /// hash is already whitelisted is a silent no-op without a persist.
    pub async fn whitelist_add(&self, profile_name: &str, file: FileRecord) -> Result<()> {
        let mut cache = self.write_loaded().await?;
        let profile = find_profile_mut(&mut cache.profiles, profile_name)?;

        let whitelist = profile.file_whitelist.get_or_insert_with(Vec::new);
        if whitelist.iter().any(|f| f.hash == file.hash) {
            log::debug!("{} already whitelisted on {}", file.relative_path, profile_name);
            return Ok(());
        }

        whitelist.push(file);
        self.persist(&cache.profiles).await
    }

    /// Remove the first whitelist entry matching the record's hash, if any.
    pub async fn whitelist_remove(&self, profile_name: &str, file: &FileRecord) -> Result<()> {
        let mut cache = self.write_loaded().await?;
        let profile = find_profile_mut(&mut cache.profiles, profile_name)?;

        let whitelist = profile.file_whitelist.get_or_insert_with(Vec::new);
        let Some(pos) = whitelist.iter().position(|f| f.hash == file.hash) else {
            return Ok(());
        };

        whitelist.remove(pos);
        self.persist(&cache.profiles).await
    }

    /// Compute the profile's current file manifest.
    pub async fn manifest(&self, profile_name: &str) -> Result<Vec<FileRecord>> {
        let profile = self
            .get(profile_name)
            .await?
            .ok_or_else(|| ProfileError::NotFound(profile_name.to_string()))?;
        manifest::build_manifest(&profile.client_path)
    }

    /// Upload the profile's manifest into the content store, reporting
    /// progress to all [`subscribe_pack_progress`](Self::subscribe_pack_progress)
    /// subscribers.
    pub async fn pack(&self, profile_name: &str) -> Result<()> {
        let profile = self
            .get(profile_name)
            .await?
            .ok_or_else(|| ProfileError::NotFound(profile_name.to_string()))?;

        let files = manifest::build_manifest(&profile.client_path)?;
        pack_files(self.store.as_ref(), &self.pack_progress, &files).await
    }

    pub fn subscribe_pack_progress(&self) -> broadcast::Receiver<u8> {
        self.pack_progress.subscribe()
    }

    /// Assemble the exposed view of a profile: metadata, masked launch
    /// strings, manifest and whitelist.
    ///
    /// Missing local launch metadata degrades to empty launch strings; any
    /// other assembly failure degrades to a metadata-only info. Only an
    /// absent profile yields `None`.
    pub async fn profile_info(
        &self,
        name: &str,
        options: &StartupOptions,
        player: &PlayerRef,
    ) -> Result<Option<ProfileInfo>> {
        let Some(profile) = self.get(name).await? else {
            return Ok(None);
        };

        let assembled = self.assemble_launch_state(&profile, options, player).await;

        let info = match assembled {
            Ok((plan, files)) => ProfileInfo {
                profile_name: profile.name.clone(),
                description: profile.description.clone(),
                icon_base64: profile.icon_base64.clone(),
                client_version: profile.launch_version.clone(),
                minecraft_version: profile.game_version.clone(),
                java_path: plan.as_ref().map(|p| p.java_path.clone()).unwrap_or_default(),
                arguments: plan.map(|p| p.arguments).unwrap_or_default(),
                whitelist_files: profile.file_whitelist.clone().unwrap_or_default(),
                files,
            },
            Err(e) => {
                log::error!("Assembling info for {} failed: {:#}", name, e);
                ProfileInfo {
                    profile_name: profile.name.clone(),
                    description: profile.description.clone(),
                    icon_base64: profile.icon_base64.clone(),
                    client_version: profile.launch_version.clone(),
                    minecraft_version: profile.game_version.clone(),
                    java_path: String::new(),
                    arguments: Vec::new(),
                    whitelist_files: Vec::new(),
                    files: Vec::new(),
                }
            }
        };

        Ok(Some(info))
    }

    /// Like [`profile_info`](Self::profile_info) but for a sync-from-server
    /// restore: fetches the client through the resolver, builds the plan in
    /// update mode and reports which manifest files are whitelist-protected.
    pub async fn restore_info(
        &self,
        name: &str,
        options: &StartupOptions,
        player: &PlayerRef,
    ) -> Result<Option<ProfileInfo>> {
        let Some(mut profile) = self.get(name).await? else {
            return Ok(None);
        };

        profile.launch_version = self
            .resolver
            .download(&profile.game_version, profile.loader)
            .await?;

        let plan = self
            .process_builder
            .build(&profile, options, player, true)
            .await?
            .masked(&mask_root(&profile.client_path));

        let files = manifest::build_manifest(&profile.client_path)?;
        let whitelist_files = self.whitelist_filter.filter(&files);

        Ok(Some(ProfileInfo {
            profile_name: profile.name.clone(),
            description: profile.description.clone(),
            icon_base64: profile.icon_base64.clone(),
            client_version: profile.launch_version.clone(),
            minecraft_version: profile.game_version.clone(),
            java_path: plan.java_path,
            arguments: plan.arguments,
            files,
            whitelist_files,
        }))
    }

    async fn assemble_launch_state(
        &self,
        profile: &GameProfile,
        options: &StartupOptions,
        player: &PlayerRef,
    ) -> Result<(Option<crate::launch::LaunchPlan>, Vec<FileRecord>)> {
        let plan = match self
            .process_builder
            .build(profile, options, player, false)
            .await
        {
            Ok(plan) => Some(plan.masked(&mask_root(&profile.client_path))),
            Err(e)
                if matches!(
                    e.downcast_ref::<ProfileError>(),
                    Some(ProfileError::VersionNotInstalled(_))
                ) =>
            {
                log::debug!("Launch metadata for {} is not installed", profile.launch_version);
                None
            }
            Err(e) => return Err(e),
        };

        let files = manifest::build_manifest(&profile.client_path)?;
        Ok((plan, files))
    }

    /// Take the read lock, hydrating from storage first if this is the very
    /// first access.
    pub(crate) async fn read_loaded(&self) -> Result<RwLockReadGuard<'_, ProfileCache>> {
        {
            let cache = self.cache.read().await;
            if cache.hydrated {
                return Ok(cache);
            }
        }
        self.write_loaded().await?;
        Ok(self.cache.read().await)
    }

    /// Take the write lock, hydrating from storage first if needed.
    pub(crate) async fn write_loaded(&self) -> Result<RwLockWriteGuard<'_, ProfileCache>> {
        let mut cache = self.cache.write().await;
        if !cache.hydrated {
            cache.profiles = self.load_from_store().await?;
            cache.hydrated = true;
        }
        Ok(cache)
    }

    async fn load_from_store(&self) -> Result<Vec<GameProfile>> {
        let mut profiles: Vec<GameProfile> = get_json(self.store.as_ref(), PROFILES_KEY)
            .await
            .context("Hydrate profile list from storage")?
            .unwrap_or_default();

        // Launch versions are revalidated on hydration; a resolver outage
        // keeps the persisted value.
        for profile in &mut profiles {
            match self
                .resolver
                .resolve(&profile.game_version, profile.loader)
                .await
            {
                Ok(launch_version) => profile.launch_version = launch_version,
                Err(e) => log::warn!(
                    "Keeping stored launch version for {}: {:#}",
                    profile.name,
                    e
                ),
            }
        }

        log::info!("Hydrated {} profiles from storage", profiles.len());
        Ok(profiles)
    }

    pub(crate) async fn persist(&self, profiles: &[GameProfile]) -> Result<()> {
        set_json(self.store.as_ref(), PROFILES_KEY, &profiles)
            .await
            .context("Persist profile list")
    }
}

pub(crate) fn find_profile_mut<'a>(
    profiles: &'a mut [GameProfile],
    name: &str,
) -> Result<&'a mut GameProfile> {
    profiles
        .iter_mut()
        .find(|p| p.name == name)
        .ok_or_else(|| ProfileError::NotFound(name.to_string()).into())
}

/// The directory form launch strings actually embed: the process builder
/// canonicalizes the client dir, so masking has to match it.
fn mask_root(client_path: &Path) -> PathBuf {
    dunce::canonicalize(client_path).unwrap_or_else(|_| client_path.to_path_buf())
}

/// Best-effort client directory rename. Returns false when there was nothing
/// to rename or the rename failed; the caller's metadata is already
/// persisted either way.
async fn rename_client_dir(from: &Path, to: &Path) -> bool {
    if !from.exists() {
        log::debug!("No client directory at {:?}, nothing to rename", from);
        return false;
    }
    match fs::rename(from, to).await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Failed to rename client directory {:?} -> {:?}: {}", from, to, e);
            false
        }
    }
}
