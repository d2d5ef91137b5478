use serde::{Deserialize, Serialize};

/// Server query protocol. Closed set; dispatch happens in the roster's poll
/// loop rather than by runtime type inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Minecraft,
}

/// A remote game server registered on a profile.
///
/// `online`, `max_online` and `is_online` are derived observations; every
/// poll overwrites them wholesale, never merges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    pub address: String,
    pub port: u16,

    #[serde(default = "ServerKind::default_kind")]
    pub kind: ServerKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_online: Option<u32>,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub is_online: bool,
}

impl ServerKind {
    fn default_kind() -> Self {
        ServerKind::Minecraft
    }
}

impl ServerEntry {
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            kind: ServerKind::Minecraft,
            online: None,
            max_online: None,
            version: String::new(),
            is_online: false,
        }
    }
}
