//! Lifecycle of the single managed container.

use crate::config::AgentConfig;
use crate::engine::{ContainerEngine, ContainerSpec};
use crate::error::AgentResult;
use std::sync::Arc;
use tracing::info;

pub struct ContainerLifecycle {
    engine: Arc<dyn ContainerEngine>,
    config: AgentConfig,
}

impl ContainerLifecycle {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: AgentConfig) -> Self {
        Self { engine, config }
    }

    /// Pure query used by session classification; never mutates.
    pub async fn is_running(&self) -> AgentResult<bool> {
        let container = self
            .engine
            .lookup_container(&self.config.container_name)
            .await?;

        Ok(container.is_some_and(|c| c.state.is_running()))
    }

    /// Create-if-absent, start-if-stopped, no-op if already running.
    pub async fn ensure_running(&self) -> AgentResult<()> {
        let container = self
            .engine
            .lookup_container(&self.config.container_name)
            .await?;

        if let Some(container) = container {
            if container.state.is_running() {
                return Ok(());
            }

            info!(id = %container.id, "starting stopped environment container");
            return self.engine.start_container(&container.id).await;
        }

        info!(name = %self.config.container_name, "creating environment container");
        let id = self.engine.create_container(&self.container_spec()).await?;
        self.engine.start_container(&id).await
    }

    /// Force-remove the container if it exists; no-op otherwise. Called
    /// before every rebuild so the next `ensure_running` observes a
    /// clean slate.
    pub async fn ensure_removed(&self) -> AgentResult<()> {
        let container = self
            .engine
            .lookup_container(&self.config.container_name)
            .await?;

        let Some(container) = container else {
            return Ok(());
        };

        info!(id = %container.id, "removing environment container");
        self.engine.remove_container(&container.id).await
    }

    fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: self.config.container_name.clone(),
            image: self.config.image_name.clone(),
            user: self.config.user_name.clone(),
            working_dir: self.config.workspace_dir.display().to_string(),
            entrypoint: vec![self.config.container_entrypoint.clone()],
            // The entrypoint script governs long-running behavior; the
            // command just keeps the container alive.
            command: vec!["sleep".to_string(), "infinity".to_string()],
            binds: self.host_mounts(),
            network_mode: "host".to_string(),
            privileged: true,
            restart_always: true,
        }
    }

    fn host_mounts(&self) -> Vec<String> {
        let home = format!("/home/{}", self.config.user_name);
        let workspace = self.config.workspace_dir.display();
        let workspace_config = self.config.workspace_config_dir.display();

        vec![
            format!("{}:{}", workspace, workspace),
            format!("{}:{}", workspace_config, workspace_config),
            // Host config files land under /etc so users can overwrite
            // them with files in their home directory.
            format!("{}/.gitconfig:/etc/gitconfig", home),
            format!("{}/.ssh/config:/etc/ssh/ssh_config", home),
            format!("{}/.ssh/known_hosts:/etc/ssh/ssh_known_hosts", home),
            // Source-control keys keep their host paths.
            self_mount(&self.config.scm_ssh_private_key_file),
            self_mount(&self.config.scm_ssh_public_key_file),
            self_mount(&self.config.scm_signing_private_key_file),
            self_mount(&self.config.scm_signing_public_key_file),
            "/var/run/docker.sock:/var/run/docker.sock".to_string(),
        ]
    }
}

fn self_mount(path: &std::path::Path) -> String {
    format!("{}:{}", path.display(), path.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::MockEngine;
    use crate::engine::{ContainerState, EngineContainer};

    fn lifecycle(engine: Arc<MockEngine>) -> ContainerLifecycle {
        ContainerLifecycle::new(engine, AgentConfig::default())
    }

    #[tokio::test]
    async fn test_rebuild_sequence_is_idempotent() {
        let engine = Arc::new(MockEngine::new());
        let lifecycle = lifecycle(engine.clone());

        // Clean slate: absent container, removal is a no-op.
        lifecycle.ensure_removed().await.unwrap();
        assert!(engine.container.lock().unwrap().is_none());

        // First ensure: create then start.
        lifecycle.ensure_running().await.unwrap();
        assert!(lifecycle.is_running().await.unwrap());

        let calls_after_first = engine.calls();
        assert!(calls_after_first.iter().any(|c| c.starts_with("create:")));
        assert!(calls_after_first.iter().any(|c| c.starts_with("start:")));

        // Second ensure: pure no-op beyond the lookup.
        lifecycle.ensure_running().await.unwrap();
        let new_calls = &engine.calls()[calls_after_first.len()..];
        assert_eq!(new_calls, ["lookup"]);
    }

    #[tokio::test]
    async fn test_ensure_running_starts_stopped_container() {
        let engine = Arc::new(MockEngine::new());
        *engine.container.lock().unwrap() = Some(EngineContainer {
            id: "stale".to_string(),
            state: ContainerState::Exited,
        });
        let lifecycle = lifecycle(engine.clone());

        lifecycle.ensure_running().await.unwrap();

        let calls = engine.calls();
        assert!(calls.contains(&"start:stale".to_string()));
        assert!(!calls.iter().any(|c| c.starts_with("create:")));
    }

    #[tokio::test]
    async fn test_ensure_removed_force_removes_running_container() {
        let engine = Arc::new(MockEngine::new());
        *engine.container.lock().unwrap() = Some(EngineContainer {
            id: "live".to_string(),
            state: ContainerState::Running,
        });
        let lifecycle = lifecycle(engine.clone());

        lifecycle.ensure_removed().await.unwrap();

        assert!(engine.container.lock().unwrap().is_none());
        assert!(engine.calls().contains(&"remove:live".to_string()));
    }

    #[test]
    fn test_host_mounts_include_engine_socket_and_workspace() {
        let lifecycle = lifecycle(Arc::new(MockEngine::new()));
        let mounts = lifecycle.host_mounts();

        assert!(mounts.contains(&"/var/run/docker.sock:/var/run/docker.sock".to_string()));
        assert!(mounts
            .iter()
            .any(|m| m == "/home/bosun/workspace:/home/bosun/workspace"));
    }
}
