use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;

use crate::sandbox::{Sandbox, profiles};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    runtime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[get("/api/languages")]
pub async fn get_languages_handler() -> impl Responder {
    HttpResponse::Ok().json(profiles())
}

/// Reports whether the container runtime currently answers
#[get("/api/health")]
pub async fn get_health_handler(sandbox: web::Data<Sandbox>) -> impl Responder {
    let runtime = sandbox.launcher().runtime().to_string();
    match sandbox.launcher().server_version().await {
        Ok(version) => HttpResponse::Ok().json(HealthResponse {
            status: "ok",
            runtime,
            version: Some(version),
            message: None,
        }),
        Err(e) => {
            log::warn!("Health check failed: {e:#}");
            HttpResponse::ServiceUnavailable().json(HealthResponse {
                status: "unavailable",
                runtime,
                version: None,
                message: Some(format!("{e:#}")),
            })
        }
    }
}
