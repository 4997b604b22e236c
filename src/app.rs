use crate::{
    config::Config,
    fetcher::HttpFetcher,
    inference_service::InferenceService,
    provisioner::{load_labels, ModelProvisioner},
    server::HttpServer,
    state::ServiceState,
};
use std::time::Duration;

/// Provisions the model, then serves until a shutdown signal arrives.
/// Any provisioning failure is returned before the listener is bound.
pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let fetcher = HttpFetcher::new(Duration::from_secs(config.model.download_timeout_secs))?;
    let provisioner = ModelProvisioner::new(fetcher, config.model.clone());

    let model = match provisioner.ensure_model_available().await {
        Ok(model) => model,
        Err(e) => {
            tracing::error!("Failed to provision model: {}", e);
            return Err(e.into());
        }
    };

    let labels = load_labels(&config.labels)?;
    let state = ServiceState::new(model, labels)?;
    let inference_service = InferenceService::new(state);

    let server = HttpServer::new(inference_service, &config.server).await?;
    server.run().await
}
