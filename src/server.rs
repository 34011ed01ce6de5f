use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use log::{error, info};
use prometheus::Registry;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::metrics::MetricPublisher;

fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}

async fn metrics_handler(State(registry): State<Registry>) -> impl IntoResponse {
    match MetricPublisher::render(&registry) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serves `/metrics` on an already bound listener until the process exits.
pub async fn serve(listener: TcpListener, registry: Registry) -> Result<()> {
    info!("Serving metrics on http://{}/metrics", listener.local_addr()?);
    axum::serve(listener, router(registry)).await?;
    Ok(())
}

/// Starts the metrics endpoint in the background.
///
/// Failing to bind the port is logged and does not stop the caller.
pub fn spawn(port: u16, registry: Registry) -> JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind metrics port {port}: {e}");
                return;
            }
        };

        if let Err(e) = serve(listener, registry).await {
            error!("Metrics server stopped: {e}");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_endpoint_exposes_registry() {
        let publisher = MetricPublisher::new(false).unwrap();
        publisher.record_cycle(3, 1);

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, publisher.registry()));

        let response = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
        assert!(response.status().is_success());
        assert!(response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));

        let body = response.text().await.unwrap();
        assert!(body.contains("github_actions_exporter_cycle_api_calls 3"));
        assert!(body.contains("github_actions_exporter_monitored_workflows 1"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let publisher = MetricPublisher::new(false).unwrap();
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, publisher.registry()));

        let response = reqwest::get(format!("http://{addr}/other")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_spawn_survives_port_in_use() {
        let occupied = std::net::TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = occupied.local_addr().unwrap().port();

        let publisher = MetricPublisher::new(false).unwrap();
        let handle = spawn(port, publisher.registry());

        // The task logs the bind failure and ends without panicking.
        assert!(handle.await.is_ok());
    }
}
