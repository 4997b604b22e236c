mod routes;

pub mod app;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod inference_service;
pub mod model_service;
pub mod ort_service;
pub mod preprocess;
pub mod provisioner;
pub mod server;
pub mod state;
pub mod telemetry;

pub use app::start_app;
