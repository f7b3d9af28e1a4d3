//! Host user/group database lookups for build arguments.

use crate::error::{AgentError, AgentResult};
use nix::unistd::{Group, User};

/// Numeric identities baked into the user image so files created inside
/// the container are owned correctly on the host.
#[derive(Clone, Debug)]
pub struct PlatformIds {
    pub uid: u32,
    pub gid: u32,
    pub docker_gid: u32,
}

pub fn lookup_platform_ids(user_name: &str, docker_group_name: &str) -> AgentResult<PlatformIds> {
    let user = User::from_name(user_name)
        .map_err(|e| AgentError::UserLookup(format!("user \"{}\": {}", user_name, e)))?
        .ok_or_else(|| AgentError::UserLookup(format!("user \"{}\" not found", user_name)))?;

    let group = Group::from_name(docker_group_name)
        .map_err(|e| AgentError::UserLookup(format!("group \"{}\": {}", docker_group_name, e)))?
        .ok_or_else(|| {
            AgentError::UserLookup(format!("group \"{}\" not found", docker_group_name))
        })?;

    Ok(PlatformIds {
        uid: user.uid.as_raw(),
        gid: user.gid.as_raw(),
        docker_gid: group.gid.as_raw(),
    })
}
