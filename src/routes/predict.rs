use crate::{
    error::ServiceError, inference_service::PredictionResult, model_service::ModelService,
    server::SharedState,
};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const FILE_FIELD: &str = "file";
const ROUTE: &str = "/predict";

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("No file uploaded")]
    MissingFile,
    #[error("Invalid multipart request: {0}")]
    Rejection(#[from] MultipartRejection),
    #[error("Failed to read upload: {0}")]
    Upload(#[from] MultipartError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl PredictError {
    pub fn status(&self) -> StatusCode {
        match self {
            PredictError::MissingFile => StatusCode::BAD_REQUEST,
            PredictError::Rejection(rejection) => rejection.status(),
            PredictError::Upload(err) => err.status(),
            PredictError::Service(ServiceError::InvalidImage(_)) => StatusCode::BAD_REQUEST,
            PredictError::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PredictError::MissingFile => "missing_file",
            PredictError::Rejection(_) | PredictError::Upload(_) => "invalid_upload",
            PredictError::Service(err) => err.kind(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Prediction failed: {}", self);
        } else {
            tracing::warn!("Rejected prediction request: {}", self);
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<axum::body::Bytes, PredictError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FILE_FIELD) {
            tracing::debug!(
                "Received upload {:?} ({:?})",
                field.file_name(),
                field.content_type()
            );
            return Ok(field.bytes().await?);
        }
    }
    Err(PredictError::MissingFile)
}

#[instrument(skip(state, multipart))]
pub async fn predict<M: ModelService>(
    State(state): State<SharedState<M>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResult>, PredictError> {
    state.metrics.record_request(ROUTE);
    let start = Instant::now();

    let result = async {
        let image_data = read_upload(multipart?).await?;
        let prediction = state.inference_service.predict_image(image_data).await?;
        Ok::<_, PredictError>(prediction)
    }
    .await;

    match result {
        Ok(prediction) => {
            state
                .metrics
                .record_prediction_duration(start.elapsed().as_secs_f64() * 1000.0, ROUTE);
            Ok(Json(prediction))
        }
        Err(err) => {
            state.metrics.record_prediction_error(err.kind());
            Err(err)
        }
    }
}
