//! Process-wide fixed names and paths.
//!
//! The agent drives exactly one environment per instance, so every
//! name here is a constant rather than configuration. `AgentConfig`
//! (in the `bosun` crate) is built from these once at startup and
//! passed down; nothing else should reference them directly.

/// Platform user inside the instance and the container.
pub mod user {
    /// Account every session runs as.
    pub const NAME: &str = "bosun";

    /// Group granting access to the container-engine socket.
    pub const DOCKER_GROUP_NAME: &str = "docker";

    pub const AUTHORIZED_SSH_KEYS_FILE_PATH: &str = "/home/bosun/.ssh/authorized_keys";
}

/// Managed environment image and container.
pub mod env {
    /// Image every user-config build file must derive from.
    pub const PLATFORM_BASE_IMAGE: &str = "bosunhq/base-env";

    /// Tag of the intermediate image built from the user-config build file.
    pub const USER_CONFIG_IMAGE_NAME: &str = "bosun-user-env-image";

    /// Tag of the final environment image.
    pub const IMAGE_NAME: &str = "bosun-env-image";

    pub const CONTAINER_NAME: &str = "bosun-env-container";

    /// In-image bootstrap script governing the container's long-running
    /// behavior. The container command itself is an infinite sleep.
    pub const CONTAINER_ENTRYPOINT_FILE_PATH: &str = "/bosun_entrypoint.sh";

    /// Build file name expected in the user-config repository and in the
    /// repository's config directory.
    pub const BUILD_FILE_NAME: &str = "env.Dockerfile";

    /// Per-repository config directory carrying the optional second-stage
    /// build file and the hooks directory.
    pub const REPO_CONFIG_DIR_NAME: &str = ".bosun";

    /// Directory under the repo config dir holding hook scripts.
    pub const REPO_HOOKS_DIR_NAME: &str = "hooks";

    /// Hook run inside the container once it is up after a rebuild.
    pub const INIT_HOOK_FILE_NAME: &str = "init.sh";

    pub const WORKSPACE_DIR_PATH: &str = "/home/bosun/workspace";
    pub const WORKSPACE_CONFIG_DIR_PATH: &str = "/home/bosun/.workspace-config";
    pub const WORKSPACE_CONFIG_FILE_PATH: &str =
        "/home/bosun/.workspace-config/bosun.workspace";
    pub const EDITOR_WORKSPACE_CONFIG_FILE_PATH: &str =
        "/home/bosun/.workspace-config/bosun.code-workspace";
}

/// Build arguments always passed to the user-config image build.
pub mod build_args {
    pub const USER_ID: &str = "BOSUN_USER_ID";
    pub const USER_GROUP_ID: &str = "BOSUN_USER_GROUP_ID";
    pub const DOCKER_GROUP_ID: &str = "BOSUN_DOCKER_GROUP_ID";
    pub const INSTANCE_ARCH: &str = "BOSUN_INSTANCE_ARCH";
    pub const INSTANCE_OS: &str = "BOSUN_INSTANCE_OS";
}

/// Metadata label keys recognized in build files.
pub mod labels {
    /// Editor extension identifiers, separated by `;` or `,`.
    pub const EDITOR_EXTENSIONS_KEY: &str = "sh.bosun.editor.extensions";

    /// Repository identifiers, separated by `;` or `,`.
    pub const REPOSITORIES_KEY: &str = "sh.bosun.repositories";

    /// Separator pattern for multi-value label values.
    pub const LIST_SEPARATOR_PATTERN: &str = r"[;,]\s*";
}

/// Control-plane gRPC server.
pub mod grpc {
    pub const SOCKET_PATH: &str = "/tmp/bosun_grpc.sock";
}

/// Remote-shell server.
pub mod ssh {
    pub const LISTEN_ADDR: &str = "0.0.0.0";
    pub const LISTEN_PORT: u16 = 2200;

    pub const HOST_KEY_FILE_PATH: &str = "/home/bosun/.ssh/bosun_ssh_server_host_key";
}

/// One-time key blobs produced by the instance bootstrap script.
pub mod keys {
    pub const SCM_SSH_PRIVATE_KEY_FILE_PATH: &str = "/home/bosun/.ssh/bosun_scm";
    pub const SCM_SSH_PUBLIC_KEY_FILE_PATH: &str = "/home/bosun/.ssh/bosun_scm.pub";

    pub const SCM_SIGNING_PRIVATE_KEY_FILE_PATH: &str =
        "/home/bosun/.gnupg/bosun_scm_signing_private.pgp";
    pub const SCM_SIGNING_PUBLIC_KEY_FILE_PATH: &str =
        "/home/bosun/.gnupg/bosun_scm_signing_public.pgp";
}
