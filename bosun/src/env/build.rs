//! Two-stage environment image build.
//!
//! Stage one builds the user-config build file, which must derive from
//! the platform base image. Stage two, present only when the repository
//! carries its own build file, must derive from the stage-one image and
//! produces the final tag. When stage two is absent, stage one is
//! tagged as the final image directly.

use crate::config::AgentConfig;
use crate::dockerfile;
use crate::engine::{handle_build_output, ContainerEngine, ImageBuildRequest};
use crate::error::{AgentError, AgentResult};
use crate::workspace::PreparedWorkspace;
use bosun_shared::constants::build_args;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::user::lookup_platform_ids;

/// One line of caller-visible build output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildLogEvent {
    /// Section header announcing the stage being built.
    Header(String),

    /// Raw build-engine output fragment, forwarded verbatim.
    Line(String),
}

pub struct BuildPipeline {
    engine: Arc<dyn ContainerEngine>,
    config: AgentConfig,
}

impl BuildPipeline {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: AgentConfig) -> Self {
        Self { engine, config }
    }

    /// Run the whole pipeline, streaming output through `log`.
    ///
    /// `user_config_repo` and `repo` are "owner/name" slugs used only
    /// in the section headers. Dangling images are pruned after every
    /// attempt, successful or not.
    pub async fn run(
        &self,
        workspace: &PreparedWorkspace,
        user_config_repo: &str,
        repo: &str,
        log: &mpsc::UnboundedSender<BuildLogEvent>,
    ) -> AgentResult<()> {
        let outcome = self.run_stages(workspace, user_config_repo, repo, log).await;

        if let Err(e) = self.engine.prune_dangling_images().await {
            warn!(error = %e, "dangling-image prune failed");
        }

        outcome
    }

    async fn run_stages(
        &self,
        workspace: &PreparedWorkspace,
        user_config_repo: &str,
        repo: &str,
        log: &mpsc::UnboundedSender<BuildLogEvent>,
    ) -> AgentResult<()> {
        send(
            log,
            BuildLogEvent::Header(format!(
                "Building {}/{}",
                user_config_repo, self.config.build_file_name
            )),
        )?;

        self.ensure_derives_from(
            &workspace.user_build_file,
            &self.config.build_file_name,
            &self.config.platform_base_image,
        )?;

        // The user image derives from the platform base, so it carries
        // the numeric identities the base's setup instructions expect.
        let build_args = self.resolve_build_args(true)?;

        // Without a repository build file the user image is the final
        // image; tag it as such instead of building twice.
        let user_image_tag = if workspace.has_repo_build_file() {
            &self.config.user_config_image_name
        } else {
            &self.config.image_name
        };

        self.build_stage(
            &workspace.user_config_dir,
            user_image_tag,
            build_args,
            log,
        )
        .await?;

        let (Some(repo_config_dir), Some(repo_build_file)) =
            (&workspace.repo_config_dir, &workspace.repo_build_file)
        else {
            return Ok(());
        };

        send(
            log,
            BuildLogEvent::Header(format!(
                "Building {}/{}/{}",
                repo, self.config.repo_config_dir_name, self.config.build_file_name
            )),
        )?;

        self.ensure_derives_from(
            repo_build_file,
            &format!(
                "{}/{}",
                self.config.repo_config_dir_name, self.config.build_file_name
            ),
            &self.config.user_config_image_name,
        )?;

        let build_args = self.resolve_build_args(false)?;

        self.build_stage(repo_config_dir, &self.config.image_name, build_args, log)
            .await
    }

    /// Fail with the expected ancestor's name when the file's resolved
    /// base image does not start with it. Runs before any engine call.
    fn ensure_derives_from(
        &self,
        build_file: &Path,
        file_label: &str,
        expected_base: &str,
    ) -> AgentResult<()> {
        let base_image = dockerfile::lookup_base_image(build_file)?;

        if !base_image.starts_with(expected_base) {
            return Err(AgentError::DerivationPolicy {
                file: file_label.to_string(),
                expected: expected_base.to_string(),
            });
        }

        Ok(())
    }

    fn resolve_build_args(&self, include_platform_ids: bool) -> AgentResult<HashMap<String, String>> {
        let mut args = HashMap::new();

        if include_platform_ids {
            let ids =
                lookup_platform_ids(&self.config.user_name, &self.config.docker_group_name)?;
            args.insert(build_args::USER_ID.to_string(), ids.uid.to_string());
            args.insert(build_args::USER_GROUP_ID.to_string(), ids.gid.to_string());
            args.insert(
                build_args::DOCKER_GROUP_ID.to_string(),
                ids.docker_gid.to_string(),
            );
        }

        args.insert(
            build_args::INSTANCE_ARCH.to_string(),
            std::env::consts::ARCH.to_string(),
        );
        args.insert(
            build_args::INSTANCE_OS.to_string(),
            std::env::consts::OS.to_string(),
        );

        Ok(args)
    }

    async fn build_stage(
        &self,
        context_dir: &Path,
        tag: &str,
        build_args: HashMap<String, String>,
        log: &mpsc::UnboundedSender<BuildLogEvent>,
    ) -> AgentResult<()> {
        info!(tag, context = %context_dir.display(), "building image");

        let stream = self
            .engine
            .build_image(&ImageBuildRequest {
                context_dir: context_dir.to_path_buf(),
                build_file_name: self.config.build_file_name.clone(),
                tag: tag.to_string(),
                build_args,
            })
            .await?;

        handle_build_output(stream, |fragment| {
            send(log, BuildLogEvent::Line(fragment.to_string()))
        })
        .await
    }
}

fn send(log: &mpsc::UnboundedSender<BuildLogEvent>, event: BuildLogEvent) -> AgentResult<()> {
    log.send(event)
        .map_err(|_| AgentError::Transport("build log receiver dropped".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::MockEngine;
    use crate::engine::BuildProgress;

    /// Config rooted in a temp dir, with user/group names resolvable on
    /// any machine so the build-arg lookup succeeds.
    fn test_config(root: &Path) -> AgentConfig {
        let user = nix::unistd::User::from_uid(nix::unistd::getuid())
            .unwrap()
            .unwrap();
        let group = nix::unistd::Group::from_gid(nix::unistd::getgid())
            .unwrap()
            .unwrap();

        AgentConfig {
            user_name: user.name,
            docker_group_name: group.name,
            workspace_dir: root.join("workspace"),
            workspace_config_dir: root.join("workspace-config"),
            ..AgentConfig::default()
        }
    }

    fn write_user_build_file(config: &AgentConfig, contents: &str) {
        let dir = config.workspace_config_dir.join("user-config");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(&config.build_file_name), contents).unwrap();
    }

    fn write_repo_build_file(config: &AgentConfig, repo_name: &str, contents: &str) {
        let dir = config
            .workspace_dir
            .join(repo_name)
            .join(&config.repo_config_dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(&config.build_file_name), contents).unwrap();
    }

    fn stream_record(text: &str) -> BuildProgress {
        BuildProgress {
            stream: Some(text.to_string()),
            ..Default::default()
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<BuildLogEvent>) -> Vec<BuildLogEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_user_derivation_failure_before_any_engine_build() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_user_build_file(&config, "FROM ubuntu:22.04\n");

        let engine = Arc::new(MockEngine::new());
        let pipeline = BuildPipeline::new(engine.clone(), config.clone());
        let workspace = PreparedWorkspace::locate(&config, "repo");
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = pipeline
            .run(&workspace, "me/config", "me/repo", &tx)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::DerivationPolicy { .. }));
        assert!(!engine.calls().iter().any(|c| c.starts_with("build:")));
    }

    #[tokio::test]
    async fn test_single_stage_build_tags_final_image() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_user_build_file(
            &config,
            &format!("FROM {}:latest\nRUN true\n", config.platform_base_image),
        );

        let engine = Arc::new(MockEngine::with_build_records(vec![vec![
            stream_record("Step 1/2 : FROM bosunhq/base-env:latest\n"),
        ]]));
        let pipeline = BuildPipeline::new(engine.clone(), config.clone());
        let workspace = PreparedWorkspace::locate(&config, "repo");
        let (tx, mut rx) = mpsc::unbounded_channel();

        pipeline
            .run(&workspace, "me/config", "me/repo", &tx)
            .await
            .unwrap();

        let calls = engine.calls();
        assert!(calls.contains(&format!("build:{}", config.image_name)));
        assert_eq!(calls.last().map(String::as_str), Some("prune"));

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, BuildLogEvent::Line(l) if l.starts_with("Step 1/2"))));
    }

    #[tokio::test]
    async fn test_two_stage_build_order_and_tags() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_user_build_file(
            &config,
            &format!("FROM {}:latest\n", config.platform_base_image),
        );
        write_repo_build_file(
            &config,
            "repo",
            &format!("FROM {}\nRUN make deps\n", config.user_config_image_name),
        );

        let engine = Arc::new(MockEngine::with_build_records(vec![
            vec![stream_record("user stage\n")],
            vec![stream_record("repo stage\n")],
        ]));
        let pipeline = BuildPipeline::new(engine.clone(), config.clone());
        let workspace = PreparedWorkspace::locate(&config, "repo");
        let (tx, mut rx) = mpsc::unbounded_channel();

        pipeline
            .run(&workspace, "me/config", "me/repo", &tx)
            .await
            .unwrap();

        let builds: Vec<String> = engine
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("build:"))
            .collect();
        assert_eq!(
            builds,
            vec![
                format!("build:{}", config.user_config_image_name),
                format!("build:{}", config.image_name),
            ]
        );

        let events = drain(&mut rx);
        let headers: Vec<&BuildLogEvent> = events
            .iter()
            .filter(|e| matches!(e, BuildLogEvent::Header(_)))
            .collect();
        assert_eq!(headers.len(), 2);
    }

    #[tokio::test]
    async fn test_repo_derivation_failure_stops_after_user_stage() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_user_build_file(
            &config,
            &format!("FROM {}:latest\n", config.platform_base_image),
        );
        write_repo_build_file(&config, "repo", "FROM debian:bookworm\n");

        let engine = Arc::new(MockEngine::new());
        let pipeline = BuildPipeline::new(engine.clone(), config.clone());
        let workspace = PreparedWorkspace::locate(&config, "repo");
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = pipeline
            .run(&workspace, "me/config", "me/repo", &tx)
            .await
            .unwrap_err();

        assert!(
            matches!(err, AgentError::DerivationPolicy { ref expected, .. }
                if expected == &config.user_config_image_name)
        );

        let builds: Vec<String> = engine
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("build:"))
            .collect();
        assert_eq!(
            builds,
            vec![format!("build:{}", config.user_config_image_name)]
        );
    }

    #[tokio::test]
    async fn test_prune_runs_after_failed_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_user_build_file(&config, "FROM ubuntu\n");

        let engine = Arc::new(MockEngine::new());
        let pipeline = BuildPipeline::new(engine.clone(), config.clone());
        let workspace = PreparedWorkspace::locate(&config, "repo");
        let (tx, _rx) = mpsc::unbounded_channel();

        pipeline
            .run(&workspace, "me/config", "me/repo", &tx)
            .await
            .unwrap_err();

        assert_eq!(engine.calls().last().map(String::as_str), Some("prune"));
    }
}
