//! Container-engine seam.
//!
//! [`ContainerEngine`] covers exactly the slice of the engine API the
//! agent consumes: name-filtered container lookup, create/start/remove,
//! image build with streamed output, and dangling-image prune. The
//! production implementation drives Docker through `bollard`; tests
//! substitute a scripted engine.

mod docker;

pub use docker::DockerEngine;

use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;

/// Engine-level container state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Restarting,
    Running,
    Paused,
    Exited,
    Dead,
    Unknown,
}

impl ContainerState {
    pub fn from_engine(state: &str) -> Self {
        match state {
            "created" => Self::Created,
            "restarting" => Self::Restarting,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

/// Narrow view of a container returned by name lookup.
#[derive(Clone, Debug)]
pub struct EngineContainer {
    pub id: String,
    pub state: ContainerState,
}

/// Everything the engine needs to create the managed container.
#[derive(Clone, Debug)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub user: String,
    pub working_dir: String,
    pub entrypoint: Vec<String>,
    pub command: Vec<String>,
    pub binds: Vec<String>,
    pub network_mode: String,
    pub privileged: bool,
    pub restart_always: bool,
}

/// One image build: a context directory, the build file within it, the
/// target tag and the build arguments.
#[derive(Clone, Debug)]
pub struct ImageBuildRequest {
    pub context_dir: PathBuf,
    pub build_file_name: String,
    pub tag: String,
    pub build_args: HashMap<String, String>,
}

/// One record of the engine's newline-delimited JSON build protocol.
///
/// Kept deserializable to document the wire contract even though the
/// production path receives records already decoded by `bollard`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BuildProgress {
    #[serde(default)]
    pub stream: Option<String>,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default, rename = "errorDetail")]
    pub error_detail: Option<BuildErrorDetail>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BuildErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
}

pub type BuildProgressStream = Pin<Box<dyn Stream<Item = AgentResult<BuildProgress>> + Send>>;

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Look up a container by exact name.
    async fn lookup_container(&self, name: &str) -> AgentResult<Option<EngineContainer>>;

    async fn start_container(&self, id: &str) -> AgentResult<()>;

    /// Create a container and return its id.
    async fn create_container(&self, spec: &ContainerSpec) -> AgentResult<String>;

    /// Force-remove a container, even if it is running.
    async fn remove_container(&self, id: &str) -> AgentResult<()>;

    async fn build_image(&self, request: &ImageBuildRequest) -> AgentResult<BuildProgressStream>;

    async fn prune_dangling_images(&self) -> AgentResult<()>;
}

/// Drain a build-output stream, forwarding each non-empty text fragment
/// to `on_fragment` in emission order.
///
/// The first `error` record aborts the whole build, surfacing the
/// engine's own detail message verbatim.
pub async fn handle_build_output<S, F>(mut stream: S, mut on_fragment: F) -> AgentResult<()>
where
    S: Stream<Item = AgentResult<BuildProgress>> + Unpin,
    F: FnMut(&str) -> AgentResult<()>,
{
    while let Some(record) = stream.next().await {
        let record = record?;

        if let Some(error) = record.error {
            let detail = record
                .error_detail
                .and_then(|d| d.message)
                .unwrap_or(error);
            return Err(AgentError::BuildEngine(detail));
        }

        match record.stream {
            Some(fragment) if !fragment.is_empty() => on_fragment(&fragment)?,
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted engine for unit tests.

    use super::*;
    use std::sync::Mutex;

    /// In-memory engine with real create/start/remove state transitions
    /// and a call log.
    pub struct MockEngine {
        pub container: Mutex<Option<EngineContainer>>,
        pub calls: Mutex<Vec<String>>,
        pub build_records: Mutex<Vec<Vec<BuildProgress>>>,
    }

    impl MockEngine {
        pub fn new() -> Self {
            Self {
                container: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
                build_records: Mutex::new(Vec::new()),
            }
        }

        pub fn with_build_records(records: Vec<Vec<BuildProgress>>) -> Self {
            let engine = Self::new();
            *engine.build_records.lock().unwrap() = records;
            engine
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl ContainerEngine for MockEngine {
        async fn lookup_container(&self, _name: &str) -> AgentResult<Option<EngineContainer>> {
            self.record("lookup");
            Ok(self.container.lock().unwrap().clone())
        }

        async fn start_container(&self, id: &str) -> AgentResult<()> {
            self.record(format!("start:{}", id));
            let mut container = self.container.lock().unwrap();
            if let Some(container) = container.as_mut() {
                container.state = ContainerState::Running;
            }
            Ok(())
        }

        async fn create_container(&self, spec: &ContainerSpec) -> AgentResult<String> {
            self.record(format!("create:{}", spec.name));
            *self.container.lock().unwrap() = Some(EngineContainer {
                id: "mock-id".to_string(),
                state: ContainerState::Created,
            });
            Ok("mock-id".to_string())
        }

        async fn remove_container(&self, id: &str) -> AgentResult<()> {
            self.record(format!("remove:{}", id));
            *self.container.lock().unwrap() = None;
            Ok(())
        }

        async fn build_image(
            &self,
            request: &ImageBuildRequest,
        ) -> AgentResult<BuildProgressStream> {
            self.record(format!("build:{}", request.tag));
            let records = {
                let mut all = self.build_records.lock().unwrap();
                if all.is_empty() {
                    Vec::new()
                } else {
                    all.remove(0)
                }
            };
            Ok(Box::pin(futures::stream::iter(
                records.into_iter().map(Ok),
            )))
        }

        async fn prune_dangling_images(&self) -> AgentResult<()> {
            self.record("prune");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(text: &str) -> BuildProgress {
        BuildProgress {
            stream: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_build_output_forwards_fragments_in_order() {
        let stream = futures::stream::iter(vec![
            Ok(fragment("step 1\n")),
            Ok(fragment("")),
            Ok(fragment("step 2\n")),
        ]);

        let mut seen = Vec::new();
        handle_build_output(stream, |line| {
            seen.push(line.to_string());
            Ok(())
        })
        .await
        .unwrap();

        // Empty fragments are dropped, order is preserved.
        assert_eq!(seen, vec!["step 1\n", "step 2\n"]);
    }

    #[tokio::test]
    async fn test_build_output_error_aborts_with_detail() {
        let stream = futures::stream::iter(vec![
            Ok(fragment("step 1\n")),
            Ok(BuildProgress {
                error: Some("build failed".to_string()),
                error_detail: Some(BuildErrorDetail {
                    message: Some("exit status 127".to_string()),
                }),
                ..Default::default()
            }),
            Ok(fragment("never seen\n")),
        ]);

        let mut seen = Vec::new();
        let err = handle_build_output(stream, |line| {
            seen.push(line.to_string());
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, AgentError::BuildEngine(ref m) if m == "exit status 127"));
        assert_eq!(seen, vec!["step 1\n"]);
    }

    #[tokio::test]
    async fn test_build_output_decodes_wire_records() {
        let record: BuildProgress =
            serde_json::from_str(r#"{"errorDetail":{"message":"boom"},"error":"boom"}"#).unwrap();

        assert_eq!(record.error.as_deref(), Some("boom"));
        assert_eq!(
            record.error_detail.and_then(|d| d.message).as_deref(),
            Some("boom")
        );
    }

    #[test]
    fn test_container_state_mapping() {
        assert!(ContainerState::from_engine("running").is_running());
        assert!(!ContainerState::from_engine("exited").is_running());
        assert_eq!(ContainerState::from_engine("weird"), ContainerState::Unknown);
    }
}
