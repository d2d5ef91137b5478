use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::ProfileError;
use crate::profile::types::GameProfile;

/// Placeholder substituted for a profile's absolute client directory when
/// launch arguments are exposed to callers.
pub const LOCAL_PATH_TOKEN: &str = "{localPath}";

/// Caller-supplied launch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupOptions {
    pub min_memory_mb: u32,
    pub max_memory_mb: u32,
    pub window_width: u32,
    pub window_height: u32,
    pub fullscreen: bool,
    /// Path to the java executable; "java" resolves via PATH.
    pub java_path: Option<PathBuf>,
    /// Extra JVM arguments as a single shell-style string.
    pub extra_jvm_args: String,
}

impl StartupOptions {
    pub fn empty() -> Self {
        Self {
            min_memory_mb: 512,
            max_memory_mb: 2048,
            window_width: 854,
            window_height: 480,
            fullscreen: false,
            java_path: None,
            extra_jvm_args: String::new(),
        }
    }
}

impl Default for StartupOptions {
    fn default() -> Self {
        Self::empty()
    }
}

/// The player a client process is launched for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRef {
    pub username: String,
    pub uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl PlayerRef {
    /// Build an offline player with a name-derived stable id.
    pub fn offline(username: impl Into<String>) -> Self {
        let username = username.into();
        let uuid = Uuid::new_v3(
            &Uuid::NAMESPACE_OID,
            format!("OfflinePlayer:{}", username).as_bytes(),
        );
        Self {
            username,
            uuid,
            access_token: None,
        }
    }
}

/// A fully assembled process invocation for one profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchPlan {
    pub java_path: String,
    pub arguments: Vec<String>,
}

impl LaunchPlan {
    /// Replace the absolute client directory with [`LOCAL_PATH_TOKEN`] in
    /// every exposed string.
    pub fn masked(&self, client_path: &Path) -> LaunchPlan {
        let client = client_path.to_string_lossy();
        LaunchPlan {
            java_path: self.java_path.replace(client.as_ref(), LOCAL_PATH_TOKEN),
            arguments: self
                .arguments
                .iter()
                .map(|arg| arg.replace(client.as_ref(), LOCAL_PATH_TOKEN))
                .collect(),
        }
    }
}

/// Builds the OS process invocation for a profile.
///
/// A missing local installation surfaces as
/// [`ProfileError::VersionNotInstalled`]; profile-info assembly tolerates it,
/// explicit launch requests do not.
#[async_trait]
pub trait ProcessBuilder: Send + Sync {
    async fn build(
        &self,
        profile: &GameProfile,
        options: &StartupOptions,
        player: &PlayerRef,
        is_update: bool,
    ) -> Result<LaunchPlan>;
}

/// Default builder assembling a plain JVM invocation against the profile's
/// client directory.
#[derive(Debug, Default)]
pub struct StandardProcessBuilder;

impl StandardProcessBuilder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessBuilder for StandardProcessBuilder {
    async fn build(
        &self,
        profile: &GameProfile,
        options: &StartupOptions,
        player: &PlayerRef,
        is_update: bool,
    ) -> Result<LaunchPlan> {
        let version_dir = profile
            .client_path
            .join("versions")
            .join(&profile.launch_version);

        // Updates rebuild the installation, so a missing version dir is only
        // fatal for a plain launch.
        if !is_update && !version_dir.exists() {
            return Err(ProfileError::VersionNotInstalled(profile.launch_version.clone()).into());
        }

        let game_dir = dunce::canonicalize(&profile.client_path)
            .unwrap_or_else(|_| profile.client_path.clone());

        let mut arguments = vec![
            format!("-Xms{}M", options.min_memory_mb),
            format!("-Xmx{}M", options.max_memory_mb),
        ];

        if !options.extra_jvm_args.is_empty() {
            match shlex::split(&options.extra_jvm_args) {
                Some(extra) => arguments.extend(extra),
                None => log::warn!(
                    "Ignoring unparseable extra JVM arguments: {}",
                    options.extra_jvm_args
                ),
            }
        }

        arguments.push(format!(
            "-Djava.library.path={}",
            game_dir.join("natives").to_string_lossy()
        ));

        arguments.extend([
            "--username".to_string(),
            player.username.clone(),
            "--uuid".to_string(),
            player.uuid.simple().to_string(),
            "--version".to_string(),
            profile.launch_version.clone(),
            "--gameDir".to_string(),
            game_dir.to_string_lossy().to_string(),
        ]);

        if let Some(token) = &player.access_token {
            arguments.push("--accessToken".to_string());
            arguments.push(token.clone());
        }

        if options.fullscreen {
            arguments.push("--fullscreen".to_string());
        } else {
            arguments.extend([
                "--width".to_string(),
                options.window_width.to_string(),
                "--height".to_string(),
                options.window_height.to_string(),
            ]);
        }

        let java_path = options
            .java_path
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| "java".to_string());

        Ok(LaunchPlan {
            java_path,
            arguments,
        })
    }
}
