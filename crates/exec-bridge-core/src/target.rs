//! Target descriptor for exec sessions.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Target validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("Missing required target field: {0}")]
    Missing(&'static str),
}

/// The remote process a session attaches to.
///
/// Only presence is validated here. Whether the pod or container
/// actually exists is for the executor to find out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Namespace the pod lives in.
    pub namespace: String,
    /// Pod name.
    pub pod: String,
    /// Container inside the pod, if not the default one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

impl Target {
    /// Create a target descriptor.
    ///
    /// An empty container name is treated as absent.
    ///
    /// # Errors
    /// Returns error if namespace or pod is empty.
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: Option<String>,
    ) -> Result<Self, TargetError> {
        let namespace = namespace.into();
        let pod = pod.into();

        if namespace.trim().is_empty() {
            return Err(TargetError::Missing("namespace"));
        }
        if pod.trim().is_empty() {
            return Err(TargetError::Missing("pod"));
        }

        Ok(Self {
            namespace,
            pod,
            container: container.filter(|c| !c.trim().is_empty()),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod)?;
        if let Some(container) = &self.container {
            write!(f, "[{container}]")?;
        }
        Ok(())
    }
}
