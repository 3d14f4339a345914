use actix_web::dev::Server;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use uuid::Uuid;

use crate::health::HealthRegistry;
use crate::service::OrderService;

/// Everything the HTTP handlers read from.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OrderService>,
    pub registry: Registry,
    pub health: Arc<HealthRegistry>,
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/v1/orders/{id}", web::get().to(order_handler))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/health", web::get().to(health_handler));
}

/// Bind the HTTP server. The returned `Server` must be awaited (or spawned)
/// to start serving; its handle stops it.
pub fn start_http_server(state: AppState, host: &str, port: u16) -> std::io::Result<Server> {
    tracing::info!("Starting HTTP server on http://{}:{}", host, port);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(routes)
    })
    .bind((host, port))?
    .disable_signals()
    .run();

    Ok(server)
}

async fn order_handler(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let Ok(id) = Uuid::parse_str(&path) else {
        return HttpResponse::BadRequest().json(serde_json::json!({ "error": "invalid order id" }));
    };

    match state.service.get_order(id).await {
        Ok(order) => HttpResponse::Ok().json(order),
        Err(e) if e.is_not_found() => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": "order not found" }))
        }
        Err(e) => {
            tracing::error!(order_id = %id, error = %e, "Order lookup failed");
            HttpResponse::InternalServerError().json(serde_json::json!({ "error": "internal error" }))
        }
    }
}

async fn metrics_handler(state: web::Data<AppState>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler(state: web::Data<AppState>) -> impl Responder {
    let health = state.health.snapshot();

    if health.overall.is_unhealthy() {
        HttpResponse::ServiceUnavailable().json(health)
    } else {
        HttpResponse::Ok().json(health)
    }
}
