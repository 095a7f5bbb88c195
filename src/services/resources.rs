use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Static text loaded once at startup and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct StaticResources {
    system_prompt: Arc<str>,
}

impl StaticResources {
    pub fn load(system_prompt_path: impl AsRef<Path>) -> Result<Self, ResourceError> {
        let path = system_prompt_path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ResourceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_prompt(text).map_err(|_| ResourceError::Empty(path.to_path_buf()))
    }

    pub fn from_prompt(text: impl Into<String>) -> Result<Self, ResourceError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ResourceError::Empty(PathBuf::from("<inline>")));
        }
        Ok(Self {
            system_prompt: Arc::from(text.trim()),
        })
    }

    pub fn system_prompt(&self) -> Arc<str> {
        Arc::clone(&self.system_prompt)
    }

    pub fn is_loaded(&self) -> bool {
        !self.system_prompt.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("System prompt at {0} is empty")]
    Empty(PathBuf),
}
