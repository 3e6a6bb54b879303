use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use greenlight_db::DbPool;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Open requests awaiting a decision; `None` when the database check
    /// failed.
    pub open_approvals: Option<i64>,
    pub detail: String,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn spawn(bind_address: &str, port: u16, db_pool: DbPool) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool)).await {
            error!(
                event_name = "system.health.error",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

/// Ready means the workflow schema answers queries, not merely that a
/// connection can be opened. The count doubles as a queue-depth reading.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let open_count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM approval_request WHERE status IN ('pending', 'escalated')",
    )
    .fetch_one(&state.db_pool)
    .await;

    let (status_code, payload) = match open_count {
        Ok(count) => (
            StatusCode::OK,
            HealthResponse {
                status: "ready",
                open_approvals: Some(count),
                detail: "approval workflow schema reachable".to_string(),
                checked_at: Utc::now().to_rfc3339(),
            },
        ),
        Err(error) => (
            StatusCode::SERVICE_UNAVAILABLE,
            HealthResponse {
                status: "degraded",
                open_approvals: None,
                detail: format!("workflow schema query failed: {error}"),
                checked_at: Utc::now().to_rfc3339(),
            },
        ),
    };

    (status_code, Json(payload))
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use greenlight_db::{connect_with_settings, migrations};

    use crate::health::{health, HealthState};

    #[tokio::test]
    async fn health_reports_ready_with_the_open_queue_depth() {
        let pool =
            connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.open_approvals, Some(0));

        pool.close().await;
    }

    #[tokio::test]
    async fn health_degrades_when_the_schema_is_missing() {
        // Connected but never migrated: the workflow tables do not exist.
        let pool =
            connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.open_approvals, None);
    }
}
