use crate::{
    error::{ServiceError, ServiceResult},
    model_service::ModelService,
    preprocess::ImageTensor,
};
use std::{fs, io, path::Path, sync::Arc};

/// Class names in model output order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassLabels(Vec<String>);

impl ClassLabels {
    pub fn new(labels: Vec<String>) -> Self {
        Self(labels)
    }

    /// One label per line. Lines are trimmed but kept in place so indices stay
    /// aligned; trailing blank lines are dropped.
    pub fn parse(content: &str) -> Self {
        let mut labels: Vec<String> = content
            .lines()
            .map(|line| line.trim().to_string())
            .collect();
        while labels.last().is_some_and(|l| l.is_empty()) {
            labels.pop();
        }
        Self(labels)
    }

    /// Label for `index`, or the index itself when no label is known.
    pub fn name_for(&self, index: usize) -> String {
        self.0
            .get(index)
            .cloned()
            .unwrap_or_else(|| index.to_string())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn load_class_labels(filepath: &Path) -> io::Result<ClassLabels> {
    let content = fs::read_to_string(filepath)?;
    Ok(ClassLabels::parse(&content))
}

/// Immutable per-process context shared by every request: the loaded model
/// and its label table.
pub struct ServiceState<M: ModelService> {
    model: Arc<M>,
    labels: Arc<ClassLabels>,
    num_classes: usize,
}

impl<M: ModelService> Clone for ServiceState<M> {
    fn clone(&self) -> Self {
        Self {
            model: self.model.clone(),
            labels: self.labels.clone(),
            num_classes: self.num_classes,
        }
    }
}

impl<M: ModelService> ServiceState<M> {
    /// Runs the model once with a blank image to learn its output width and
    /// checks the label table against it.
    pub fn new(model: M, labels: ClassLabels) -> ServiceResult<Self> {
        let warmup = model.infer(&ImageTensor::zeros()).map_err(|e| {
            ServiceError::ModelUnavailable(format!("model failed its startup warm-up run: {}", e))
        })?;
        let num_classes = warmup.len();

        if !labels.is_empty() && labels.len() != num_classes {
            return Err(ServiceError::ModelUnavailable(format!(
                "label table has {} entries but the model outputs {} classes",
                labels.len(),
                num_classes
            )));
        }

        tracing::info!(
            "Model ready: {} classes, {} labels",
            num_classes,
            labels.len()
        );

        Ok(Self {
            model: Arc::new(model),
            labels: Arc::new(labels),
            num_classes,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn labels(&self) -> &ClassLabels {
        &self.labels
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct FixedModel(Vec<f32>);

    impl ModelService for FixedModel {
        fn infer(&self, _input: &ImageTensor) -> ServiceResult<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenModel;

    impl ModelService for BrokenModel {
        fn infer(&self, _input: &ImageTensor) -> ServiceResult<Vec<f32>> {
            Err(ServiceError::InferenceFailed("corrupted".to_string()))
        }
    }

    fn labels(names: &[&str]) -> ClassLabels {
        ClassLabels::new(names.iter().map(|n| n.to_string()).collect())
    }

    #[test]
    fn test_parse_trims_and_keeps_order() {
        let parsed = ClassLabels::parse("Healthy\r\n  Blight \nRust\n\n");
        assert_eq!(parsed, labels(&["Healthy", "Blight", "Rust"]));
    }

    #[test]
    fn test_name_for_falls_back_to_index() {
        let table = labels(&["Healthy", "Blight"]);
        assert_eq!(table.name_for(1), "Blight");
        assert_eq!(table.name_for(5), "5");
        assert_eq!(ClassLabels::default().name_for(0), "0");
    }

    #[test]
    fn test_load_class_labels_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Apple___scab").unwrap();
        writeln!(file, "Apple___healthy").unwrap();

        let table = load_class_labels(file.path()).unwrap();
        assert_eq!(table, labels(&["Apple___scab", "Apple___healthy"]));
    }

    #[test]
    fn test_state_accepts_matching_labels() {
        let state =
            ServiceState::new(FixedModel(vec![0.2, 0.8]), labels(&["a", "b"])).unwrap();
        assert_eq!(state.num_classes(), 2);
        assert_eq!(state.labels().len(), 2);
    }

    #[test]
    fn test_state_accepts_empty_labels() {
        let state = ServiceState::new(FixedModel(vec![0.1, 0.2, 0.7]), ClassLabels::default())
            .unwrap();
        assert_eq!(state.num_classes(), 3);
        assert!(state.labels().is_empty());
    }

    #[test]
    fn test_state_rejects_label_width_mismatch() {
        let result = ServiceState::new(FixedModel(vec![0.5, 0.5]), labels(&["a", "b", "c"]));
        assert!(matches!(result, Err(ServiceError::ModelUnavailable(_))));
    }

    #[test]
    fn test_state_rejects_failing_model() {
        let result = ServiceState::new(BrokenModel, labels(&["a"]));
        assert!(matches!(result, Err(ServiceError::ModelUnavailable(_))));
    }
}
