//! HTTP surface of the clearing ledger
//!
//! Routes match the externally-observed wire contract:
//! - `POST /balance` applies a transfer
//! - `GET /settle` captures and returns a snapshot
//! - `POST /settle` settles the outstanding snapshot
//!
//! Each route accepts an optional `Timeout` query parameter in
//! milliseconds. Ledger calls are not preemptible: on expiry the
//! caller gets 408 and the call may still complete and mutate state;
//! an expired snapshot request additionally cancels the pending
//! snapshot so the single-outstanding slot is never left stuck.

use axum::{
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ledger_core::{Ledger, Transfer};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

/// Optional per-request options carried as query parameters
#[derive(Debug, Default, Deserialize)]
pub struct CallOptions {
    /// Caller-supplied timeout in milliseconds
    #[serde(rename = "Timeout")]
    pub timeout_ms: Option<u64>,
}

enum CallError {
    TimedOut,
    Failed,
}

/// Run a ledger call on the blocking pool, bounded by the caller's
/// timeout if one was supplied. The call itself is never cancelled.
async fn with_timeout<T, F>(timeout_ms: Option<u64>, f: F) -> Result<T, CallError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);
    let joined = match timeout_ms {
        Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), task).await {
            Ok(joined) => joined,
            Err(_) => return Err(CallError::TimedOut),
        },
        None => task.await,
    };
    joined.map_err(|err| {
        tracing::error!(%err, "ledger call panicked");
        CallError::Failed
    })
}

/// HTTP service over a shared ledger instance
pub struct HttpService {
    ledger: Arc<Ledger>,
}

impl HttpService {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Build the axum router
    pub fn router(self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/balance", post(handle_update_balances))
            .route("/settle", get(handle_get_snapshot).post(handle_settle_snapshot))
            .route("/health", get(handle_health))
            .layer(cors)
            .with_state(self.ledger)
    }

    /// Bind and serve
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP service listening on {}", addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Serve on an existing listener until the shutdown future resolves
    pub async fn serve_with_shutdown(
        self,
        listener: tokio::net::TcpListener,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

async fn handle_health() -> impl IntoResponse {
    StatusCode::OK
}

/// POST /balance
async fn handle_update_balances(
    State(ledger): State<Arc<Ledger>>,
    Query(options): Query<CallOptions>,
    Json(transfer): Json<Transfer>,
) -> Response {
    let result = with_timeout(options.timeout_ms, move || {
        ledger.update_balances(&transfer)
    })
    .await;

    match result {
        Ok(Ok(())) => StatusCode::OK.into_response(),
        Ok(Err(err)) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
        Err(CallError::TimedOut) => {
            (StatusCode::REQUEST_TIMEOUT, "request timed out").into_response()
        }
        Err(CallError::Failed) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// GET /settle
async fn handle_get_snapshot(
    State(ledger): State<Arc<Ledger>>,
    Query(options): Query<CallOptions>,
) -> Response {
    let call_ledger = Arc::clone(&ledger);
    let result = with_timeout(options.timeout_ms, move || call_ledger.get_snapshot()).await;

    match result {
        Ok(Ok(snapshot)) => Json(snapshot).into_response(),
        Ok(Err(err)) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
        Err(CallError::TimedOut) => {
            // The capture may still land after the deadline; release
            // the pending slot so a later request is not blocked.
            ledger.cancel_snapshot();
            (StatusCode::REQUEST_TIMEOUT, "request timed out").into_response()
        }
        Err(CallError::Failed) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// POST /settle
async fn handle_settle_snapshot(
    State(ledger): State<Arc<Ledger>>,
    Query(options): Query<CallOptions>,
) -> Response {
    let result = with_timeout(options.timeout_ms, move || ledger.settle_snapshot()).await;

    match result {
        Ok(Ok(())) => StatusCode::OK.into_response(),
        Ok(Err(err)) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
        Err(CallError::TimedOut) => {
            (StatusCode::REQUEST_TIMEOUT, "request timed out").into_response()
        }
        Err(CallError::Failed) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use ledger_core::LedgerConfig;
    use serde_json::Value;
    use tower::util::ServiceExt;

    fn test_router() -> (Router, Arc<Ledger>) {
        let ledger = Arc::new(Ledger::new(LedgerConfig::default()));
        (HttpService::new(Arc::clone(&ledger)).router(), ledger)
    }

    fn post_balance(from: &str, to: &str, amount: i32) -> Request<Body> {
        let body = serde_json::json!({
            "Sender": {"Name": from, "Account": 1},
            "Receiver": {"Name": to, "Account": 1},
            "Amount": amount,
        });
        Request::builder()
            .method("POST")
            .uri("/balance")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn balance_route_applies_transfer() {
        let (router, _ledger) = test_router();
        let response = router.oneshot(post_balance("A", "B", 100)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_balance_body_is_rejected() {
        let (router, _ledger) = test_router();
        let request = Request::builder()
            .method("POST")
            .uri("/balance")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"Sender": 3}"#))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn settle_roundtrip_over_http() {
        let (router, _ledger) = test_router();

        let response = router
            .clone()
            .oneshot(post_balance("A", "B", 100))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/settle").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["Banks"]["A"]["Balance"], -100);
        assert_eq!(json["Banks"]["B"]["Accounts"]["1"], 100);
        assert!(json["Timestamp"].is_string());

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/settle")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Settling again is protocol misuse
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/settle")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn settle_without_snapshot_is_bad_request() {
        let (router, _ledger) = test_router();
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/settle")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn generous_timeout_still_succeeds() {
        let (router, _ledger) = test_router();
        let response = router
            .clone()
            .oneshot(post_balance("A", "B", 10))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/settle?Timeout=5000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn expired_call_reports_timeout() {
        let result = with_timeout(Some(5), || {
            std::thread::sleep(Duration::from_millis(100));
            42
        })
        .await;
        assert!(matches!(result, Err(CallError::TimedOut)));
    }
}
