//! Error kinds the demo distinguishes.
//!
//! Everything else travels as `anyhow::Error` with context attached; these
//! variants are the ones callers match on (via `downcast_ref`) to decide
//! between local recovery and shutdown.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DemoError {
    /// Shader or texture missing, unreadable or malformed. Fatal at startup.
    #[error("Asset error in {path:?}: {reason}")]
    Asset { path: PathBuf, reason: String },

    /// Window could not be created. Fatal.
    #[error("Could not create window: {0}")]
    Window(String),

    /// Swap chain no longer matches the surface; rebuild and retry.
    #[error("Swap chain is out of date")]
    SwapChainStale,

    /// Submission, present or flush failed permanently. Fatal.
    #[error("Device lost: {0}")]
    DeviceLost(vk::Result),
}

impl DemoError {
    pub fn asset(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Asset {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Map a failed queue operation: device loss is terminal, anything else
    /// stays a plain Vulkan error.
    pub fn from_queue_result(result: vk::Result) -> anyhow::Error {
        match result {
            vk::Result::ERROR_DEVICE_LOST => DemoError::DeviceLost(result).into(),
            other => anyhow::Error::new(other),
        }
    }

    /// True when `err` is (or wraps) a recoverable stale swap chain.
    pub fn is_stale(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<DemoError>(), Some(DemoError::SwapChainStale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_is_classified() {
        let err = DemoError::from_queue_result(vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(
            err.downcast_ref::<DemoError>(),
            Some(DemoError::DeviceLost(vk::Result::ERROR_DEVICE_LOST))
        ));

        let err = DemoError::from_queue_result(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(err.downcast_ref::<DemoError>().is_none());
    }

    #[test]
    fn stale_survives_context() {
        let err = anyhow::Error::from(DemoError::SwapChainStale).context("acquiring image");
        assert!(DemoError::is_stale(&err));
        assert!(!DemoError::is_stale(&anyhow::anyhow!("other")));
    }

    #[test]
    fn asset_error_names_the_file() {
        let err = DemoError::asset("Shader/Demo1.vert.spv", "file is empty");
        let text = err.to_string();
        assert!(text.contains("Demo1.vert.spv"));
        assert!(text.contains("file is empty"));
    }
}
