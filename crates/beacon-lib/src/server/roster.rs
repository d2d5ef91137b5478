use anyhow::Result;
use futures::future::join_all;

use crate::error::ProfileError;
use crate::profile::registry::{find_profile_mut, ProfileRegistry};
use crate::server::query::ServerStatus;
use crate::server::types::{ServerEntry, ServerKind};

/// Server roster operations. Registered servers persist with their profile;
/// liveness observations are volatile and never persisted.
impl ProfileRegistry {
    /// Register a server on a profile.
    ///
    /// Rejects an empty address/name, a port outside `[1, 65535]` and a name
    /// already present on the profile, all before any mutation.
    pub async fn add_server(
        &self,
        profile_name: &str,
        server_name: &str,
        address: &str,
        port: u32,
    ) -> Result<ServerEntry> {
        if server_name.trim().is_empty() {
            return Err(ProfileError::Validation("server name must not be empty".into()).into());
        }
        if address.trim().is_empty() {
            return Err(ProfileError::Validation("server address must not be empty".into()).into());
        }
        if port == 0 || port > u16::MAX as u32 {
            return Err(
                ProfileError::Validation(format!("port {} is out of range", port)).into(),
            );
        }

        let mut cache = self.write_loaded().await?;
        let profile = find_profile_mut(&mut cache.profiles, profile_name)?;

        if profile.servers.iter().any(|s| s.name == server_name) {
            return Err(ProfileError::DuplicateName(server_name.to_string()).into());
        }

        let entry = ServerEntry::new(server_name, address, port as u16);
        profile.servers.push(entry.clone());
        self.persist(&cache.profiles).await?;

        log::info!("Added server {} ({}:{}) to {}", server_name, address, port, profile_name);
        Ok(entry)
    }

    /// Remove a server from a profile. Absent names are a no-op; the list is
    /// persisted either way.
    pub async fn remove_server(&self, profile_name: &str, server_name: &str) -> Result<()> {
        if server_name.trim().is_empty() {
            return Err(ProfileError::Validation("server name must not be empty".into()).into());
        }

        let mut cache = self.write_loaded().await?;
        let profile = find_profile_mut(&mut cache.profiles, profile_name)?;

        if let Some(pos) = profile.servers.iter().position(|s| s.name == server_name) {
            profile.servers.remove(pos);
            log::info!("Removed server {} from {}", server_name, profile_name);
        }

        self.persist(&cache.profiles).await
    }

    /// Poll one server and overwrite its liveness fields wholesale.
    ///
    /// A failed or timed-out query records an offline observation on the
    /// entry; it never removes the server and never surfaces as an error.
    pub async fn poll_server(&self, profile_name: &str, server_name: &str) -> Result<()> {
        let (kind, address, port) = {
            let cache = self.read_loaded().await?;
            let profile = cache
                .profiles
                .iter()
                .find(|p| p.name == profile_name)
                .ok_or_else(|| ProfileError::NotFound(profile_name.to_string()))?;
            let server = profile
                .server(server_name)
                .ok_or_else(|| ProfileError::NotFound(server_name.to_string()))?;
            (server.kind, server.address.clone(), server.port)
        };

        let observation = self.query_with_timeout(kind, &address, port).await;
        self.apply_observation(profile_name, server_name, observation)
            .await
    }

    /// Poll every server on a profile concurrently. Per-entry failures are
    /// isolated; the sweep itself only fails for an unknown profile.
    pub async fn poll_all(&self, profile_name: &str) -> Result<()> {
        let targets: Vec<(String, ServerKind, String, u16)> = {
            let cache = self.read_loaded().await?;
            let profile = cache
                .profiles
                .iter()
                .find(|p| p.name == profile_name)
                .ok_or_else(|| ProfileError::NotFound(profile_name.to_string()))?;
            profile
                .servers
                .iter()
                .map(|s| (s.name.clone(), s.kind, s.address.clone(), s.port))
                .collect()
        };

        let queries = targets.into_iter().map(|(name, kind, address, port)| async move {
            let observation = self.query_with_timeout(kind, &address, port).await;
            (name, observation)
        });

        for (name, observation) in join_all(queries).await {
            self.apply_observation(profile_name, &name, observation)
                .await?;
        }

        Ok(())
    }

    async fn query_with_timeout(
        &self,
        kind: ServerKind,
        address: &str,
        port: u16,
    ) -> Option<ServerStatus> {
        let query = match kind {
            ServerKind::Minecraft => self.status_query.query(address, port),
        };

        match tokio::time::timeout(self.query_timeout, query).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                log::warn!("Status query for {}:{} failed: {:#}", address, port, e);
                None
            }
            Err(_) => {
                log::warn!("Status query for {}:{} timed out", address, port);
                None
            }
        }
    }

    /// Overwrite a server's derived fields from one poll outcome. The entry
    /// may have been removed while the query was in flight; that is not an
    /// error.
    async fn apply_observation(
        &self,
        profile_name: &str,
        server_name: &str,
        observation: Option<ServerStatus>,
    ) -> Result<()> {
        let mut cache = self.write_loaded().await?;
        let Some(profile) = cache.profiles.iter_mut().find(|p| p.name == profile_name) else {
            return Ok(());
        };
        let Some(server) = profile.servers.iter_mut().find(|s| s.name == server_name) else {
            return Ok(());
        };

        match observation {
            Some(status) => {
                server.online = Some(status.players);
                server.max_online = Some(status.max_players);
                server.version = status.version_label;
                server.is_online = true;
            }
            None => {
                server.online = None;
                server.max_online = None;
                server.is_online = false;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::StandardProcessBuilder;
    use crate::server::query::StatusQuery;
    use crate::storage::{KvStore, MemoryStore};
    use crate::version::{LoaderVersionResolver, ModloaderType};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FixedStatus(u32, u32, &'static str);

    #[async_trait]
    impl StatusQuery for FixedStatus {
        async fn query(&self, _address: &str, _port: u16) -> Result<ServerStatus> {
            Ok(ServerStatus {
                players: self.0,
                max_players: self.1,
                version_label: self.2.to_string(),
            })
        }
    }

    struct HangingStatus;

    #[async_trait]
    impl StatusQuery for HangingStatus {
        async fn query(&self, _address: &str, _port: u16) -> Result<ServerStatus> {
            futures::future::pending().await
        }
    }

    fn registry(dir: &TempDir, status: Arc<dyn StatusQuery>) -> ProfileRegistry {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        ProfileRegistry::new(
            dir.path(),
            store,
            Arc::new(LoaderVersionResolver::new()),
            Arc::new(StandardProcessBuilder::new()),
            status,
        )
        .with_query_timeout(Duration::from_millis(50))
    }

    async fn with_profile(registry: &ProfileRegistry) {
        registry
            .create("P1", "1.20.1", ModloaderType::Vanilla, "", "")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn port_bounds_are_validated() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, Arc::new(FixedStatus(0, 0, "")));
        with_profile(&registry).await;

        for bad_port in [0u32, 70000] {
            let err = registry
                .add_server("P1", "lobby", "mc.example.com", bad_port)
                .await
                .unwrap_err();
            assert!(matches!(
                err.downcast_ref::<ProfileError>(),
                Some(ProfileError::Validation(_))
            ));
        }

        registry
            .add_server("P1", "lobby", "mc.example.com", 25565)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_address_is_rejected() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, Arc::new(FixedStatus(0, 0, "")));
        with_profile(&registry).await;

        let err = registry
            .add_server("P1", "lobby", "", 25565)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProfileError>(),
            Some(ProfileError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_server_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, Arc::new(FixedStatus(0, 0, "")));
        with_profile(&registry).await;

        registry
            .add_server("P1", "lobby", "a.example.com", 25565)
            .await
            .unwrap();
        let err = registry
            .add_server("P1", "lobby", "b.example.com", 25566)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ProfileError>(),
            Some(ProfileError::DuplicateName(_))
        ));
        assert_eq!(registry.get("P1").await.unwrap().unwrap().servers.len(), 1);
    }

    #[tokio::test]
    async fn successful_poll_overwrites_status() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, Arc::new(FixedStatus(7, 100, "1.20.1")));
        with_profile(&registry).await;
        registry
            .add_server("P1", "lobby", "mc.example.com", 25565)
            .await
            .unwrap();

        registry.poll_server("P1", "lobby").await.unwrap();

        let profile = registry.get("P1").await.unwrap().unwrap();
        let server = profile.server("lobby").unwrap();
        assert_eq!(server.online, Some(7));
        assert_eq!(server.max_online, Some(100));
        assert_eq!(server.version, "1.20.1");
        assert!(server.is_online);
    }

    #[tokio::test]
    async fn timed_out_poll_records_offline_and_keeps_entry() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, Arc::new(HangingStatus));
        with_profile(&registry).await;
        registry
            .add_server("P1", "lobby", "mc.example.com", 25565)
            .await
            .unwrap();

        registry.poll_server("P1", "lobby").await.unwrap();

        let profile = registry.get("P1").await.unwrap().unwrap();
        let server = profile.server("lobby").unwrap();
        assert_eq!(server.online, None);
        assert_eq!(server.max_online, None);
        assert!(!server.is_online);
    }

    #[tokio::test]
    async fn sweep_polls_every_server() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, Arc::new(FixedStatus(3, 10, "1.20.1")));
        with_profile(&registry).await;
        registry
            .add_server("P1", "lobby", "a.example.com", 25565)
            .await
            .unwrap();
        registry
            .add_server("P1", "survival", "b.example.com", 25566)
            .await
            .unwrap();

        registry.poll_all("P1").await.unwrap();

        let profile = registry.get("P1").await.unwrap().unwrap();
        assert!(profile.servers.iter().all(|s| s.is_online));
        assert!(profile.servers.iter().all(|s| s.online == Some(3)));
    }

    #[tokio::test]
    async fn removing_an_absent_server_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, Arc::new(FixedStatus(0, 0, "")));
        with_profile(&registry).await;

        registry.remove_server("P1", "ghost").await.unwrap();
        assert!(registry.get("P1").await.unwrap().unwrap().servers.is_empty());
    }
}
