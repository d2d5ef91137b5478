use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::server::types::ServerEntry;
use crate::version::ModloaderType;

/// A named game installation: version, loader, client directory and display
/// metadata. Profiles are unique by name (case-sensitive) across a registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameProfile {
    pub name: String,

    /// The version the caller asked for at creation.
    pub game_version: String,

    /// Concrete launchable version id produced by the resolver. Never empty
    /// once creation has completed.
    pub launch_version: String,

    pub loader: ModloaderType,

    /// Filesystem root of this profile's installed files.
    pub client_path: PathBuf,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub icon_base64: String,

    pub created_at: DateTime<Utc>,

    /// Files exempt from overwrite during a sync-from-server restore.
    /// `None` until the first whitelist mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_whitelist: Option<Vec<FileRecord>>,

    /// Registered servers, ordered, unique by name within the profile.
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

impl GameProfile {
    pub fn server(&self, name: &str) -> Option<&ServerEntry> {
        self.servers.iter().find(|s| s.name == name)
    }
}

/// One entry of a profile's file manifest.
///
/// `hash` is the identity for content-store dedup; `relative_path` is the
/// identity for manifest and whitelist diffing. Two byte-identical files
/// under different paths are distinct manifest entries that may share one
/// stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Client-root-relative path with `/` separators on every platform.
    pub relative_path: String,
    pub size: u64,
    pub hash: String,
}

/// Assembled view of a profile handed to launcher frontends: metadata plus
/// launch strings with the client directory replaced by the
/// `{localPath}` token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileInfo {
    pub profile_name: String,
    pub description: String,
    pub icon_base64: String,
    pub client_version: String,
    pub minecraft_version: String,
    pub java_path: String,
    pub arguments: Vec<String>,
    pub files: Vec<FileRecord>,
    pub whitelist_files: Vec<FileRecord>,
}
