use crate::{captioner::Captioner, error::ApiError};
use std::{path::PathBuf, sync::Arc};

/// Shared, read-only request context.
pub struct AppState {
    captioner: Option<Arc<dyn Captioner>>,
    device: String,
    upload_dir: PathBuf,
}

impl AppState {
    /// `captioner` is `None` when model loading failed; the server still runs and
    /// reports it through `/health`.
    pub fn new(
        captioner: Option<Arc<dyn Captioner>>,
        device: impl Into<String>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            captioner,
            device: device.into(),
            upload_dir: upload_dir.into(),
        }
    }

    pub fn models_loaded(&self) -> bool {
        self.captioner.is_some()
    }

    pub fn captioner(&self) -> Result<Arc<dyn Captioner>, ApiError> {
        self.captioner.clone().ok_or(ApiError::ModelsNotLoaded)
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn upload_dir(&self) -> &PathBuf {
        &self.upload_dir
    }
}
