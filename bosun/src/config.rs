//! Agent configuration.
//!
//! One immutable value built from the `bosun-shared` constants at
//! process start and passed down; components never reach for the
//! constants directly, which keeps them testable against throwaway
//! names and paths.

use bosun_shared::constants;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Platform user every session runs as.
    pub user_name: String,

    /// Group granting access to the container-engine socket.
    pub docker_group_name: String,

    /// Image the user-config build file must derive from.
    pub platform_base_image: String,

    /// Tag of the intermediate image built from the user-config file.
    pub user_config_image_name: String,

    /// Tag of the final environment image.
    pub image_name: String,

    pub container_name: String,
    pub container_entrypoint: String,

    pub build_file_name: String,
    pub repo_config_dir_name: String,
    pub repo_hooks_dir_name: String,
    pub init_hook_file_name: String,

    pub workspace_dir: PathBuf,
    pub workspace_config_dir: PathBuf,
    pub workspace_config_file: PathBuf,
    pub editor_workspace_config_file: PathBuf,

    pub grpc_socket_path: PathBuf,

    pub ssh_listen_addr: String,
    pub ssh_listen_port: u16,
    pub ssh_host_key_file: PathBuf,
    pub authorized_keys_file: PathBuf,

    pub scm_ssh_private_key_file: PathBuf,
    pub scm_ssh_public_key_file: PathBuf,
    pub scm_signing_private_key_file: PathBuf,
    pub scm_signing_public_key_file: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            user_name: constants::user::NAME.to_string(),
            docker_group_name: constants::user::DOCKER_GROUP_NAME.to_string(),
            platform_base_image: constants::env::PLATFORM_BASE_IMAGE.to_string(),
            user_config_image_name: constants::env::USER_CONFIG_IMAGE_NAME.to_string(),
            image_name: constants::env::IMAGE_NAME.to_string(),
            container_name: constants::env::CONTAINER_NAME.to_string(),
            container_entrypoint: constants::env::CONTAINER_ENTRYPOINT_FILE_PATH.to_string(),
            build_file_name: constants::env::BUILD_FILE_NAME.to_string(),
            repo_config_dir_name: constants::env::REPO_CONFIG_DIR_NAME.to_string(),
            repo_hooks_dir_name: constants::env::REPO_HOOKS_DIR_NAME.to_string(),
            init_hook_file_name: constants::env::INIT_HOOK_FILE_NAME.to_string(),
            workspace_dir: PathBuf::from(constants::env::WORKSPACE_DIR_PATH),
            workspace_config_dir: PathBuf::from(constants::env::WORKSPACE_CONFIG_DIR_PATH),
            workspace_config_file: PathBuf::from(constants::env::WORKSPACE_CONFIG_FILE_PATH),
            editor_workspace_config_file: PathBuf::from(
                constants::env::EDITOR_WORKSPACE_CONFIG_FILE_PATH,
            ),
            grpc_socket_path: PathBuf::from(constants::grpc::SOCKET_PATH),
            ssh_listen_addr: constants::ssh::LISTEN_ADDR.to_string(),
            ssh_listen_port: constants::ssh::LISTEN_PORT,
            ssh_host_key_file: PathBuf::from(constants::ssh::HOST_KEY_FILE_PATH),
            authorized_keys_file: PathBuf::from(constants::user::AUTHORIZED_SSH_KEYS_FILE_PATH),
            scm_ssh_private_key_file: PathBuf::from(constants::keys::SCM_SSH_PRIVATE_KEY_FILE_PATH),
            scm_ssh_public_key_file: PathBuf::from(constants::keys::SCM_SSH_PUBLIC_KEY_FILE_PATH),
            scm_signing_private_key_file: PathBuf::from(
                constants::keys::SCM_SIGNING_PRIVATE_KEY_FILE_PATH,
            ),
            scm_signing_public_key_file: PathBuf::from(
                constants::keys::SCM_SIGNING_PUBLIC_KEY_FILE_PATH,
            ),
        }
    }
}
