//! Environment orchestration: the two-stage image build and the
//! managed container's lifecycle.

mod build;
mod container;
mod hooks;
mod user;

pub use build::{BuildLogEvent, BuildPipeline};
pub use container::ContainerLifecycle;
pub use hooks::run_init_hooks;
pub use user::{lookup_platform_ids, PlatformIds};
