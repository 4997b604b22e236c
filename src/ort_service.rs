use crate::{
    error::{ServiceError, ServiceResult},
    model_service::ModelService,
    preprocess::ImageTensor,
};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// ONNX Runtime backed classifier holding a small pool of sessions.
///
/// `Session::run` needs exclusive access, so each session sits behind its own
/// lock and requests are spread round-robin over the pool.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    output_name: Arc<str>,
}

impl OrtModelService {
    pub fn new(model_path: &Path, num_instances: usize) -> ServiceResult<Self> {
        let num_instances = num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| {
                ServiceError::ModelUnavailable(format!(
                    "failed to load model from {:?}: {}",
                    model_path, e
                ))
            })?;

        let output_name = {
            let session = sessions[0].lock();
            session
                .outputs
                .first()
                .map(|output| output.name.clone())
                .ok_or_else(|| {
                    ServiceError::ModelUnavailable(format!(
                        "model {:?} declares no outputs",
                        model_path
                    ))
                })?
        };

        tracing::info!(
            "Created {} ONNX sessions for {:?}, reading output {:?}",
            num_instances,
            model_path,
            output_name
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            output_name: output_name.into(),
        })
    }
}

impl ModelService for OrtModelService {
    fn infer(&self, input: &ImageTensor) -> ServiceResult<Vec<f32>> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();

        let tensor_ref = TensorRef::from_array_view(input.view()).map_err(|e| {
            ServiceError::InferenceFailed(format!("failed to build tensor: {}", e))
        })?;

        tracing::debug!("Handling request with session {}", index);
        let mut session = self.sessions[index].lock();

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ServiceError::InferenceFailed(format!("inference failed: {}", e)))?;

        let (_, data) = outputs[&*self.output_name]
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                ServiceError::InferenceFailed(format!("failed to extract tensor: {}", e))
            })?;

        if data.is_empty() {
            return Err(ServiceError::InferenceFailed(
                "model returned an empty output".to_string(),
            ));
        }

        Ok(data.to_vec())
    }
}
