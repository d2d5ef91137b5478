use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ProfileError;

/// Modloader type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModloaderType {
    Vanilla,
    Fabric,
    Quilt,
    Forge,
    NeoForge,
}

impl ModloaderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModloaderType::Vanilla => "vanilla",
            ModloaderType::Fabric => "fabric",
            ModloaderType::Quilt => "quilt",
            ModloaderType::Forge => "forge",
            ModloaderType::NeoForge => "neoforge",
        }
    }
}

impl std::fmt::Display for ModloaderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ModloaderType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vanilla" => Ok(ModloaderType::Vanilla),
            "fabric" => Ok(ModloaderType::Fabric),
            "quilt" => Ok(ModloaderType::Quilt),
            "forge" => Ok(ModloaderType::Forge),
            "neoforge" => Ok(ModloaderType::NeoForge),
            _ => Err(anyhow::anyhow!("Unknown modloader type: {}", s)),
        }
    }
}

/// Resolves a requested game version + loader pair into the concrete
/// launchable version id, and performs the actual content fetch.
///
/// The download subsystem is a collaborator of the registry; implementations
/// may hit the network, a local metadata cache, or nothing at all.
#[async_trait]
pub trait VersionResolver: Send + Sync {
    /// Resolve `version` for `loader` into a launchable version id.
    async fn resolve(&self, version: &str, loader: ModloaderType) -> Result<String>;

    /// Fetch the client files for `version` and return the launch version id.
    async fn download(&self, version: &str, loader: ModloaderType) -> Result<String>;
}

/// Offline resolver deriving launch ids from pinned loader versions.
///
/// Vanilla resolves to the game version itself; modloaders resolve to the
/// canonical on-disk id `"{loader}-loader-{loader_version}-{game_version}"`.
/// A loader with no pinned version cannot be resolved.
#[derive(Debug, Default)]
pub struct LoaderVersionResolver {
    pins: HashMap<ModloaderType, String>,
}

impl LoaderVersionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin a loader to a specific loader version.
    pub fn with_pin(mut self, loader: ModloaderType, loader_version: impl Into<String>) -> Self {
        self.pins.insert(loader, loader_version.into());
        self
    }

    fn launch_id(&self, version: &str, loader: ModloaderType) -> Result<String> {
        if version.is_empty() || version.contains(char::is_whitespace) {
            return Err(ProfileError::Resolution {
                version: version.to_string(),
                loader,
            }
            .into());
        }

        match loader {
            ModloaderType::Vanilla => Ok(version.to_string()),
            _ => match self.pins.get(&loader) {
                Some(loader_version) => {
                    Ok(format!("{}-loader-{}-{}", loader.as_str(), loader_version, version))
                }
                None => Err(ProfileError::Resolution {
                    version: version.to_string(),
                    loader,
                }
                .into()),
            },
        }
    }
}

#[async_trait]
impl VersionResolver for LoaderVersionResolver {
    async fn resolve(&self, version: &str, loader: ModloaderType) -> Result<String> {
        self.launch_id(version, loader)
    }

    async fn download(&self, version: &str, loader: ModloaderType) -> Result<String> {
        // Offline resolver: nothing to fetch, the id alone is the outcome.
        let id = self.launch_id(version, loader)?;
        log::debug!("Offline resolver skipping download for {}", id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn vanilla_resolves_to_game_version() {
        let resolver = LoaderVersionResolver::new();
        let id = resolver.resolve("1.20.1", ModloaderType::Vanilla).await.unwrap();
        assert_eq!(id, "1.20.1");
    }

    #[tokio::test]
    async fn pinned_loader_resolves_to_canonical_id() {
        let resolver = LoaderVersionResolver::new().with_pin(ModloaderType::Fabric, "0.16.9");
        let id = resolver.resolve("1.20.1", ModloaderType::Fabric).await.unwrap();
        assert_eq!(id, "fabric-loader-0.16.9-1.20.1");
    }

    #[tokio::test]
    async fn unpinned_loader_fails_resolution() {
        let resolver = LoaderVersionResolver::new();
        let err = resolver.resolve("1.20.1", ModloaderType::Forge).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProfileError>(),
            Some(ProfileError::Resolution { .. })
        ));
    }

    #[tokio::test]
    async fn empty_version_fails_resolution() {
        let resolver = LoaderVersionResolver::new();
        assert!(resolver.resolve("", ModloaderType::Vanilla).await.is_err());
    }
}
