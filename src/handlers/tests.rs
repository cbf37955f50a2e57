//! Router tests over the full middleware stack

#[cfg(test)]
mod router_tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::gateway::RequestGateway;
    use crate::metrics::MetricsRegistry;
    use crate::middleware::auth::API_KEY_HEADER;
    use crate::model::testing::SeededWeights;
    use crate::model::ModelRegistry;
    use crate::scoring::ScoringEngine;
    use crate::{create_router, AppState};

    const KEY: &str = "router-test-key";

    fn app() -> Router {
        app_with(SeededWeights::new(10))
    }

    fn app_with(weights: SeededWeights) -> Router {
        let registry = Arc::new(ModelRegistry::load(&weights).unwrap());
        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        for (kind, bytes) in registry.memory_usage() {
            metrics.set_model_memory(kind, bytes);
        }
        let gateway = RequestGateway::new(registry, ScoringEngine::default(), metrics, Some(KEY));
        create_router(AppState {
            gateway: Arc::new(gateway),
        })
    }

    fn predict_request(key: Option<&str>, body: Value) -> Request<Body> {
        raw_predict_request(key, body.to_string())
    }

    fn raw_predict_request(key: Option<&str>, body: String) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/predict")
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_health_lists_models() {
        let response = app().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["input_dim"], 10);

        let models: HashSet<&str> = body["models_loaded"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(models, HashSet::from(["autoencoder", "lstm", "dlrm", "rnn"]));
    }

    #[tokio::test]
    async fn test_predict_zero_vector() {
        let response = app()
            .oneshot(predict_request(
                Some(KEY),
                json!({ "data": [0, 0, 0, 0, 0, 0, 0, 0, 0, 0], "model_type": "autoencoder" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let score = body["anomaly_score"].as_f64().unwrap();
        assert_eq!(body["model_used"], "autoencoder");
        assert!(score >= 0.0);
        assert_eq!(body["is_anomaly"].as_bool().unwrap(), score > 0.1);
        assert!(body["timestamp"].is_string());

        let confidence = body["confidence"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&confidence));
    }

    #[tokio::test]
    async fn test_predict_is_deterministic() {
        let app = app();
        let body = json!({ "data": [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0], "model_type": "dlrm" });

        let first = body_json(app.clone().oneshot(predict_request(Some(KEY), body.clone())).await.unwrap()).await;
        let second = body_json(app.oneshot(predict_request(Some(KEY), body)).await.unwrap()).await;

        assert_eq!(first["anomaly_score"], second["anomaly_score"]);
        assert_eq!(first["is_anomaly"], second["is_anomaly"]);
    }

    #[tokio::test]
    async fn test_predict_echoes_timestamp() {
        let response = app()
            .oneshot(predict_request(
                Some(KEY),
                json!({ "data": vec![1.0; 10], "timestamp": "2024-05-01T12:00:00Z" }),
            ))
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["timestamp"], "2024-05-01T12:00:00Z");
        assert_eq!(body["model_used"], "autoencoder");
    }

    /// Missing or wrong keys are rejected whatever the body says
    #[tokio::test]
    async fn test_predict_requires_api_key() {
        let bodies = [
            json!({ "data": vec![0.0; 10] }),
            json!({ "data": [1.0], "model_type": "unknown" }),
            json!({ "nonsense": true }),
        ];

        for body in bodies {
            for key in [None, Some("wrong"), Some("")] {
                let response = app().oneshot(predict_request(key, body.clone())).await.unwrap();
                assert_eq!(response.status(), StatusCode::FORBIDDEN, "key {key:?}, body {body}");
            }
        }
    }

    #[tokio::test]
    async fn test_predict_wrong_length() {
        let response = app()
            .oneshot(predict_request(Some(KEY), json!({ "data": [1.0, 2.0, 3.0] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("10 features"));
    }

    #[tokio::test]
    async fn test_predict_unknown_model() {
        let response = app()
            .oneshot(predict_request(Some(KEY), json!({ "data": vec![0.0; 10], "model_type": "unknown" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let message = body_json(response).await["error"].as_str().unwrap().to_string();
        for id in ["autoencoder", "lstm", "dlrm", "rnn"] {
            assert!(message.contains(id), "{message} is missing {id}");
        }
    }

    #[tokio::test]
    async fn test_predict_malformed_body() {
        let response = app()
            .oneshot(predict_request(Some(KEY), json!({ "data": "not a list" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let app = app();
        app.clone()
            .oneshot(predict_request(Some(KEY), json!({ "data": vec![0.0; 10] })))
            .await
            .unwrap();

        let response = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let text = body_text(response).await;
        assert!(text.contains("predictions_total 1"));
        assert!(text.contains("anomalies_detected_total"));
        assert!(text.contains("prediction_latency_seconds_count 1"));
        assert!(text.contains("model_memory_usage_bytes{model_name=\"autoencoder\"}"));
        assert!(text.contains("model_memory_usage_bytes{model_name=\"rnn\"}"));
    }

    #[tokio::test]
    async fn test_predict_oversized_body() {
        let body = format!("{{\"data\": [{}]}}", vec!["0.0"; 600_000].join(","));
        let response = app().oneshot(raw_predict_request(Some(KEY), body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_json(response).await["status"], 413);
    }

    /// Overflowing weights: the reconstruction is non-finite, the caller
    /// sees a generic 500 and only the internal error counter moves
    #[tokio::test]
    async fn test_predict_overflow_is_internal_error() {
        let mut weights = SeededWeights::new(10);
        weights.weight_scale = 1e30;
        let app = app_with(weights);

        let response = app
            .clone()
            .oneshot(predict_request(Some(KEY), json!({ "data": vec![1.0; 10] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Prediction error");
        assert_eq!(body["status"], 500);

        let text = body_text(app.oneshot(get("/metrics")).await.unwrap()).await;
        assert!(text.contains("prediction_errors_total{kind=\"internal\"} 1"), "{text}");
        assert!(text.contains("predictions_total 0"), "{text}");
    }

    /// Health and metrics need no key
    #[tokio::test]
    async fn test_public_routes_need_no_key() {
        for uri in ["/health", "/metrics"] {
            let response = app().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
        }
    }
}
