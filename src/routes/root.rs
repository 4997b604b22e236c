use axum::Json;
use serde::Serialize;

pub const WELCOME_MESSAGE: &str = "Welcome to the Plant Disease Detection API!";

#[derive(Serialize)]
pub struct Welcome {
    message: &'static str,
}

pub async fn root() -> Json<Welcome> {
    Json(Welcome {
        message: WELCOME_MESSAGE,
    })
}
