//! Docker implementation of the engine seam, over the local socket.

use super::{
    BuildProgress, BuildProgressStream, ContainerEngine, ContainerSpec, ContainerState,
    EngineContainer, ImageBuildRequest,
};
use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::image::BuildImageOptions;
use bollard::models::{HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

/// Engine client over the local Docker socket.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn connect() -> AgentResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    /// Raw client handle, for the exec paths that attach to streams
    /// the trait does not model.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn lookup_container(&self, name: &str) -> AgentResult<Option<EngineContainer>> {
        // The engine prefixes names with a slash; anchor the filter so
        // "env" cannot match "env-2".
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![format!("^/{}$", name)]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        let Some(summary) = containers.into_iter().next() else {
            return Ok(None);
        };

        let id = summary
            .id
            .ok_or_else(|| AgentError::Internal("container summary without id".to_string()))?;
        let state = summary
            .state
            .as_deref()
            .map(ContainerState::from_engine)
            .unwrap_or(ContainerState::Unknown);

        Ok(Some(EngineContainer { id, state }))
    }

    async fn start_container(&self, id: &str) -> AgentResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> AgentResult<String> {
        let restart_policy = spec.restart_always.then(|| RestartPolicy {
            name: Some(RestartPolicyNameEnum::ALWAYS),
            ..Default::default()
        });

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                Config {
                    image: Some(spec.image.clone()),
                    user: Some(spec.user.clone()),
                    working_dir: Some(spec.working_dir.clone()),
                    entrypoint: Some(spec.entrypoint.clone()),
                    cmd: Some(spec.command.clone()),
                    host_config: Some(HostConfig {
                        binds: Some(spec.binds.clone()),
                        network_mode: Some(spec.network_mode.clone()),
                        privileged: Some(spec.privileged),
                        restart_policy,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await?;

        Ok(response.id)
    }

    async fn remove_container(&self, id: &str) -> AgentResult<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn build_image(&self, request: &ImageBuildRequest) -> AgentResult<BuildProgressStream> {
        let context = archive_context(&request.context_dir)?;
        debug!(
            tag = %request.tag,
            context_bytes = context.len(),
            "sending build context"
        );

        let options = BuildImageOptions {
            dockerfile: request.build_file_name.clone(),
            t: request.tag.clone(),
            buildargs: request.build_args.clone(),
            rm: true,
            ..Default::default()
        };

        // The client stream borrows the Docker handle, so a clone is
        // moved into a forwarder task and the caller consumes a
        // channel-backed stream instead.
        let docker = self.docker.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut stream = docker.build_image(options, None, Some(context.into()));
            while let Some(record) = stream.next().await {
                let progress = record.map_err(AgentError::from).map(|info| BuildProgress {
                    stream: info.stream,
                    error: info.error,
                    error_detail: info.error_detail.map(|detail| super::BuildErrorDetail {
                        message: detail.message,
                    }),
                });
                if tx.send(progress).is_err() {
                    break;
                }
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn prune_dangling_images(&self) -> AgentResult<()> {
        self.docker
            .prune_images(None::<bollard::image::PruneImagesOptions<String>>)
            .await?;
        Ok(())
    }
}

/// Tar up a build-context directory for the engine.
fn archive_context(dir: &Path) -> AgentResult<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_dir_all("", dir)?;
    Ok(builder.into_inner()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_context_includes_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("env.Dockerfile"), "FROM scratch\n").unwrap();

        let bytes = archive_context(dir.path()).unwrap();

        let mut archive = tar::Archive::new(bytes.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();

        assert!(names.iter().any(|n| n.ends_with("env.Dockerfile")));
    }
}
