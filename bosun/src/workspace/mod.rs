//! On-disk workspace contracts.
//!
//! Workspace assembly (cloning, config merge, hook installation) is
//! owned by a collaborator that runs before the agent builds anything.
//! This module only resolves where that collaborator left the build
//! inputs, and reads the editor workspace-config file it wrote.

use crate::config::AgentConfig;
use crate::error::AgentResult;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Directory under the workspace-config dir holding the user-config
/// repository checkout.
const USER_CONFIG_DIR_NAME: &str = "user-config";

/// Resolved locations of the build inputs for one environment.
///
/// The repository build file is optional; its absence selects the
/// one-stage build.
#[derive(Clone, Debug)]
pub struct PreparedWorkspace {
    pub user_config_dir: PathBuf,
    pub user_build_file: PathBuf,
    pub repo_config_dir: Option<PathBuf>,
    pub repo_build_file: Option<PathBuf>,
}

impl PreparedWorkspace {
    /// Resolve build-input paths for `repo_name` under the configured
    /// workspace layout.
    pub fn locate(config: &AgentConfig, repo_name: &str) -> Self {
        let user_config_dir = config.workspace_config_dir.join(USER_CONFIG_DIR_NAME);
        let user_build_file = user_config_dir.join(&config.build_file_name);

        let repo_config_dir = config
            .workspace_dir
            .join(repo_name)
            .join(&config.repo_config_dir_name);
        let repo_build_file = repo_config_dir.join(&config.build_file_name);

        if repo_build_file.is_file() {
            Self {
                user_config_dir,
                user_build_file,
                repo_config_dir: Some(repo_config_dir),
                repo_build_file: Some(repo_build_file),
            }
        } else {
            Self {
                user_config_dir,
                user_build_file,
                repo_config_dir: None,
                repo_build_file: None,
            }
        }
    }

    pub fn has_repo_build_file(&self) -> bool {
        self.repo_build_file.is_some()
    }
}

/// Workspace manifest written by the workspace collaborator: the
/// repositories it cloned and the hook scripts it installed in each.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub repositories: Vec<WorkspaceRepository>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WorkspaceRepository {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub hooks: Vec<WorkspaceHook>,
}

/// One installed hook script, addressed by its in-container paths.
#[derive(Clone, Debug, Deserialize)]
pub struct WorkspaceHook {
    pub script_file_path: String,
    pub script_working_dir_path: String,
}

impl WorkspaceConfig {
    /// Load from `path`; an absent file yields an empty manifest.
    pub fn load(path: &Path) -> AgentResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Editor workspace-config file, written by the workspace collaborator.
/// Only the extension recommendations are read here.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct EditorWorkspaceConfig {
    #[serde(default)]
    pub extensions: EditorExtensions,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EditorExtensions {
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl EditorWorkspaceConfig {
    /// Load from `path`; an absent file yields empty defaults.
    pub fn load(path: &Path) -> AgentResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}
