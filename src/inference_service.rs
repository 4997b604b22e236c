use crate::{
    error::{ServiceError, ServiceResult},
    model_service::ModelService,
    preprocess::{preprocess, ImageTensor},
    state::{ClassLabels, ServiceState},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_class: String,
    pub confidence: f32,
    pub class_names: Vec<String>,
    pub probabilities: Vec<f32>,
}

/// Index of the first maximum, ignoring NaN. `None` when nothing is left.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, value)| !value.is_nan())
        .reduce(|best, current| if current.1 > best.1 { current } else { best })
        .map(|(index, _)| index)
}

pub fn predict<M: ModelService>(
    tensor: &ImageTensor,
    model: &M,
    labels: &ClassLabels,
) -> ServiceResult<PredictionResult> {
    let probabilities = model.infer(tensor)?;

    let class_index = argmax(&probabilities).ok_or_else(|| {
        ServiceError::InferenceFailed("model returned no usable scores".to_string())
    })?;

    Ok(PredictionResult {
        predicted_class: labels.name_for(class_index),
        confidence: probabilities[class_index],
        class_names: labels.as_slice().to_vec(),
        probabilities,
    })
}

/// Per-request pipeline: decode, normalize, infer.
pub struct InferenceService<M: ModelService> {
    state: ServiceState<M>,
}

impl<M: ModelService> Clone for InferenceService<M> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<M: ModelService> InferenceService<M> {
    pub fn new(state: ServiceState<M>) -> Self {
        Self { state }
    }

    /// Runs the CPU-bound pipeline on the blocking pool.
    pub async fn predict_image(&self, image_data: Bytes) -> ServiceResult<PredictionResult> {
        let state = self.state.clone();

        let result = tokio::task::spawn_blocking(move || {
            let tensor = preprocess(&image_data)?;
            predict(&tensor, state.model(), state.labels())
        })
        .await
        .map_err(|e| ServiceError::InferenceFailed(format!("prediction task failed: {}", e)))??;

        tracing::debug!(
            "Predicted class={}, confidence={:.3}",
            result.predicted_class,
            result.confidence
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, Rgb};
    use rstest::rstest;
    use std::io::Cursor;

    struct MockModelService {
        output: Vec<f32>,
    }

    impl ModelService for MockModelService {
        fn infer(&self, _input: &ImageTensor) -> ServiceResult<Vec<f32>> {
            Ok(self.output.clone())
        }
    }

    /// Fails every call except the startup warm-up run.
    struct FlakyModelService {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ModelService for FlakyModelService {
        fn infer(&self, _input: &ImageTensor) -> ServiceResult<Vec<f32>> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                Ok(vec![0.5, 0.5])
            } else {
                Err(ServiceError::InferenceFailed("shape mismatch".to_string()))
            }
        }
    }

    fn labels(names: &[&str]) -> ClassLabels {
        ClassLabels::new(names.iter().map(|n| n.to_string()).collect())
    }

    fn png_bytes() -> Bytes {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(64, 48, Rgb([10, 200, 30]));
        let mut image_data: Vec<u8> = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut image_data), image::ImageFormat::Png)
            .unwrap();
        Bytes::from(image_data)
    }

    #[rstest]
    #[case(vec![0.1, 0.7, 0.2], Some(1))]
    #[case(vec![0.4, 0.2, 0.4], Some(0))]
    #[case(vec![0.1, 0.3, 0.3, 0.3], Some(1))]
    #[case(vec![1.0], Some(0))]
    #[case(vec![], None)]
    #[case(vec![f32::NAN, 0.2, 0.7], Some(2))]
    #[case(vec![0.3, f32::NAN, 0.1], Some(0))]
    #[case(vec![f32::NAN, f32::NAN], None)]
    fn test_argmax_prefers_first_maximum(#[case] values: Vec<f32>, #[case] expected: Option<usize>) {
        assert_eq!(argmax(&values), expected);
        if let Some(index) = expected {
            let max = values.iter().cloned().fold(f32::MIN, f32::max);
            assert_eq!(values[index], max);
        }
    }

    #[test]
    fn test_predict_maps_index_through_labels() {
        let model = MockModelService {
            output: vec![0.1, 0.7, 0.2],
        };
        let table = labels(&["Healthy", "Blight", "Rust"]);

        let result = predict(&ImageTensor::zeros(), &model, &table).unwrap();

        assert_eq!(result.predicted_class, "Blight");
        assert_eq!(result.confidence, 0.7);
        assert_eq!(result.class_names, vec!["Healthy", "Blight", "Rust"]);
        assert_eq!(result.probabilities, vec![0.1, 0.7, 0.2]);
    }

    #[test]
    fn test_predict_falls_back_to_index_without_labels() {
        let model = MockModelService {
            output: vec![0.2, 0.5, 0.3],
        };

        let result = predict(&ImageTensor::zeros(), &model, &ClassLabels::default()).unwrap();

        assert_eq!(result.predicted_class, "1");
        assert_eq!(result.confidence, 0.5);
        assert!(result.class_names.is_empty());
    }

    #[test]
    fn test_predict_rejects_empty_output() {
        let model = MockModelService { output: vec![] };
        let result = predict(&ImageTensor::zeros(), &model, &ClassLabels::default());
        assert!(matches!(result, Err(ServiceError::InferenceFailed(_))));
    }

    #[test]
    fn test_predict_rejects_all_nan_output() {
        let model = MockModelService {
            output: vec![f32::NAN, f32::NAN, f32::NAN],
        };
        let result = predict(&ImageTensor::zeros(), &model, &labels(&["a", "b", "c"]));
        assert!(matches!(result, Err(ServiceError::InferenceFailed(_))));
    }

    #[test]
    fn test_predict_skips_leading_nan() {
        let model = MockModelService {
            output: vec![f32::NAN, 0.3, 0.6],
        };
        let result = predict(&ImageTensor::zeros(), &model, &labels(&["a", "b", "c"])).unwrap();
        assert_eq!(result.predicted_class, "c");
        assert_eq!(result.confidence, 0.6);
    }

    #[tokio::test]
    async fn test_predict_image_runs_full_pipeline() -> Result<(), Box<dyn std::error::Error>> {
        let model = MockModelService {
            output: vec![0.05, 0.15, 0.8],
        };
        let state = ServiceState::new(model, labels(&["Healthy", "Blight", "Rust"]))?;
        let inference_service = InferenceService::new(state);

        let result = inference_service.predict_image(png_bytes()).await?;

        assert_eq!(result.predicted_class, "Rust");
        assert_eq!(result.confidence, 0.8);
        let total: f32 = result.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);

        Ok(())
    }

    #[tokio::test]
    async fn test_predict_image_rejects_non_image_bytes() -> Result<(), Box<dyn std::error::Error>>
    {
        let model = MockModelService {
            output: vec![0.5, 0.5],
        };
        let inference_service = InferenceService::new(ServiceState::new(model, labels(&[]))?);

        let result = inference_service
            .predict_image(Bytes::from_static(b"%PDF-1.4 definitely not pixels"))
            .await;

        assert!(matches!(result, Err(ServiceError::InvalidImage(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_predict_image_surfaces_inference_failure() -> Result<(), Box<dyn std::error::Error>>
    {
        let model = FlakyModelService {
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        let inference_service = InferenceService::new(ServiceState::new(model, labels(&[]))?);

        let result = inference_service.predict_image(png_bytes()).await;

        assert!(matches!(result, Err(ServiceError::InferenceFailed(_))));
        Ok(())
    }
}
