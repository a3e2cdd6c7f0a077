use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, Registry, TextEncoder};

use crate::health::HealthRegistry;

/// Start the metrics HTTP server.
/// actix-web needs its own system; callers run this on a dedicated thread.
pub async fn start_metrics_server(
    registry: Registry,
    health: HealthRegistry,
    port: u16,
) -> std::io::Result<()> {
    tracing::info!("📊 Starting metrics server on http://0.0.0.0:{}/metrics", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(health.clone()))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
    })
    .workers(1)
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn metrics_handler(registry: web::Data<Registry>) -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler(health: web::Data<HealthRegistry>) -> impl Responder {
    let snapshot = health.snapshot().await;

    if snapshot.overall_status.is_unhealthy() {
        HttpResponse::ServiceUnavailable().json(snapshot)
    } else {
        HttpResponse::Ok().json(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthStatus;
    use actix_web::{body::to_bytes, http::StatusCode, test};
    use prometheus::IntCounter;

    #[actix_web::test]
    async fn test_metrics_endpoint_exposes_registry() {
        let registry = Registry::new();
        let counter = IntCounter::new("relay_test_total", "test counter").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(registry))
                .route("/metrics", web::get().to(metrics_handler)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = to_bytes(resp.into_body()).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("relay_test_total 1"));
    }

    #[actix_web::test]
    async fn test_health_endpoint_reports_unhealthy() {
        let health = HealthRegistry::new();
        health
            .update("paypal-worker", HealthStatus::Unhealthy("stopped".into()), None)
            .await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(health))
                .route("/health", web::get().to(health_handler)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
