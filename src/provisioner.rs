use crate::{
    config::{LabelsConfig, ModelConfig, Validatable},
    error::{ServiceError, ServiceResult},
    fetcher::ArtifactFetcher,
    ort_service::OrtModelService,
    state::{load_class_labels, ClassLabels},
};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Makes sure the model artifact is cached locally and loads it.
pub struct ModelProvisioner<F: ArtifactFetcher> {
    fetcher: F,
    model_config: ModelConfig,
    // Serializes bootstrap so concurrent callers never fetch twice.
    fetch_guard: Mutex<()>,
}

impl<F: ArtifactFetcher> ModelProvisioner<F> {
    pub fn new(fetcher: F, model_config: ModelConfig) -> Self {
        Self {
            fetcher,
            model_config,
            fetch_guard: Mutex::new(()),
        }
    }

    /// Local path of the artifact, downloading it first if it is not cached.
    pub async fn ensure_artifact(&self) -> ServiceResult<PathBuf> {
        self.locate_or_fetch().await.map(|(path, _)| path)
    }

    /// Like `ensure_artifact`, also reporting whether this call downloaded it.
    async fn locate_or_fetch(&self) -> ServiceResult<(PathBuf, bool)> {
        let _guard = self.fetch_guard.lock().await;
        let model_path = self.model_config.get_path();

        let cached = tokio::fs::try_exists(&model_path).await.map_err(|e| {
            ServiceError::ModelUnavailable(format!("cannot inspect {:?}: {}", model_path, e))
        })?;
        if cached {
            tracing::info!("Using cached model at {:?}", model_path);
            return Ok((model_path, false));
        }

        if let Some(parent) = model_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ServiceError::ModelUnavailable(format!("cannot create {:?}: {}", parent, e))
            })?;
        }

        let url = self.model_config.get_download_url();
        tracing::info!("Model not found locally, downloading from {}", url);

        let written = self.fetcher.fetch(&url, &model_path).await?;
        tracing::info!("Downloaded model ({} bytes) to {:?}", written, model_path);

        Ok((model_path, true))
    }

    /// Loads the artifact into a session pool. A freshly downloaded artifact
    /// that fails to load is deleted so the next start fetches it again.
    pub async fn ensure_model_available(&self) -> ServiceResult<OrtModelService> {
        let (model_path, fetched) = self.locate_or_fetch().await?;
        let num_instances = self.model_config.num_instances;

        let load_path = model_path.clone();
        let loaded = tokio::task::spawn_blocking(move || {
            OrtModelService::new(&load_path, num_instances)
        })
        .await
        .map_err(|e| ServiceError::ModelUnavailable(format!("model loading panicked: {}", e)))
        .and_then(|result| result);

        if let Err(e) = &loaded {
            if fetched {
                tracing::error!("Discarding downloaded model {:?}: {}", model_path, e);
                if let Err(remove_err) = tokio::fs::remove_file(&model_path).await {
                    tracing::warn!("Cannot remove {:?}: {}", model_path, remove_err);
                }
            }
        }
        loaded
    }
}

/// Reads the label table, applying the missing-file policy.
pub fn load_labels(labels_config: &LabelsConfig) -> ServiceResult<ClassLabels> {
    let path = labels_config.get_path();
    read_labels(&path, labels_config.required)
}

fn read_labels(path: &Path, required: bool) -> ServiceResult<ClassLabels> {
    match load_class_labels(path) {
        Ok(labels) => {
            tracing::info!("Loaded {} class labels from {:?}", labels.len(), path);
            Ok(labels)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if required {
                tracing::error!("Class label file {:?} not found", path);
                return Err(ServiceError::LabelTableMissing(path.to_path_buf()));
            }
            tracing::warn!(
                "Class label file {:?} not found, predictions will report class indices",
                path
            );
            Ok(ClassLabels::default())
        }
        Err(e) => Err(ServiceError::ModelUnavailable(format!(
            "failed to read class labels from {:?}: {}",
            path, e
        ))),
    }
}
