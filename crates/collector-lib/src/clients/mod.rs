//! Cluster access: the shared clientset, exec contexts and the tagged
//! command pipeline that runs over them.

mod clientset;
mod command;
mod debug_pod;
mod exec_context;

#[cfg(test)]
pub(crate) mod mock;

pub use clientset::{Clientset, REST_TIMEOUT};
pub use command::{trim_space, Command, CommandGroup, OutputProcessor};
pub use debug_pod::{
    DebugPodContext, DebugPodSpec, HostPathMount, DELETION_TIMEOUT, START_TIMEOUT,
};
pub use exec_context::{select_pod_name, ContainerExecContext, PodSelector};

use crate::error::Result;
use async_trait::async_trait;

/// The shell every tagged script is piped into
pub const SHELL: &str = "/usr/bin/sh";

/// Captured output of one exec call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run commands inside a container.
///
/// Collectors only depend on this trait so they do not care whether the
/// target is the long-lived PTP daemon container or a short-lived debug pod.
#[async_trait]
pub trait ExecContext: Send + Sync {
    /// Execute `argv` in the container, writing `stdin` to it when provided.
    ///
    /// When the server reports the pod is gone the context refreshes its
    /// pod name before returning the error, so the next call targets the
    /// replacement pod.
    async fn exec(&self, argv: &[&str], stdin: Option<&str>) -> Result<ExecOutput>;

    /// Resolve the target pod name again
    async fn refresh(&self) -> Result<()>;

    /// Human readable `namespace/pod/container` description
    async fn describe(&self) -> String;

    /// Pipe a script into the shell
    async fn exec_script(&self, script: &str) -> Result<ExecOutput> {
        self.exec(&[SHELL], Some(script)).await
    }
}
