//! Integration tests for the artifact download server

#[cfg(feature = "server")]
mod server_tests {
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;
    use tapstudy_analytics::core::ExportKind;
    use tapstudy_analytics::export::{ArtifactKey, ArtifactMeta, ArtifactStore, MemoryStore};
    use tapstudy_analytics::server::{run, ServerConfig};
    use uuid::Uuid;

    async fn start(store: Arc<MemoryStore>) -> (std::net::SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let config = ServerConfig::new(0, store);
        let started = run(config).await.expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;
        started
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, shutdown_tx) = start(Arc::new(MemoryStore::new())).await;

        let response = reqwest::get(format!("http://{}/health", addr))
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_missing_artifact_is_not_ready() {
        let (addr, shutdown_tx) = start(Arc::new(MemoryStore::new())).await;

        let response = reqwest::get(format!("http://{}/exports/processed/AB12", addr))
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["error"], "not ready for download yet");
        assert_eq!(body["code"], "NOT_READY");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_stored_artifact_is_served_as_csv() {
        let store = Arc::new(MemoryStore::new());
        let csv = b"experiment_code,subject_code\nAB12,s1\n";
        store
            .put(
                &ArtifactKey::new(ExportKind::Raw, "AB12"),
                csv,
                &ArtifactMeta {
                    response_count: 1,
                    rows: 1,
                    generated_at: Utc::now(),
                    run_id: Uuid::new_v4(),
                },
            )
            .unwrap();
        let (addr, shutdown_tx) = start(store).await;

        let response = reqwest::get(format!("http://{}/exports/raw/AB12.csv", addr))
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/csv"));

        let body = response.bytes().await.expect("Failed to read body");
        assert_eq!(body.as_ref(), csv);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_unknown_kind_is_rejected() {
        let (addr, shutdown_tx) = start(Arc::new(MemoryStore::new())).await;

        let response = reqwest::get(format!("http://{}/exports/summary/AB12", addr))
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "INVALID_KIND");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_path_like_code_is_rejected() {
        let (addr, shutdown_tx) = start(Arc::new(MemoryStore::new())).await;

        let response = reqwest::get(format!("http://{}/exports/raw/..%2F..%2Fsecret", addr))
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "INVALID_CODE");

        let _ = shutdown_tx.send(());
    }
}
