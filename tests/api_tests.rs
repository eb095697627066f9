use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use outfit_recommender::{
    api::{create_router, AppState},
    config::Config,
    db::create_memory_pool,
    services::InMemoryScoreCache,
};

struct TestApp {
    router: Router,
    _model_dir: tempfile::TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let model_dir = tempfile::tempdir().unwrap();
        let mut config: Config = envy::from_iter(Vec::<(String, String)>::new()).unwrap();
        config.exploration_rate = 0.0;
        config.n_estimators = 10;
        config.model_dir = model_dir.path().to_path_buf();

        let pool = create_memory_pool().await.unwrap();
        let state = AppState::new(pool, Arc::new(InMemoryScoreCache::new()), &config);
        Self {
            router: create_router(state),
            _model_dir: model_dir,
        }
    }

    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body)).await
    }

    async fn add_item(&self, category: &str, body: Value) -> String {
        let mut request = body;
        request["category"] = json!(category);
        let (status, item) = self.post("/wardrobe/items", request).await;
        assert_eq!(status, StatusCode::CREATED);
        item["clothing_id"].as_str().unwrap().to_string()
    }

    /// Six shirts, one pants, one shoes; five ratings and a trained model.
    /// Returns the active version.
    async fn seed_and_train(&self) -> String {
        for formality in [0.1, 0.2, 0.4, 0.8, 0.9, 0.85] {
            self.add_item(
                "shirt",
                json!({
                    "visual": { "dominant_color": "#224466", "avg_brightness": formality },
                    "semantic": { "style": "casual", "formality_score": formality, "versatility_score": 0.5 }
                }),
            )
            .await;
        }
        self.add_item("pants", json!({ "visual": { "dominant_color": "#101010" } })).await;
        self.add_item("shoes", json!({ "visual": { "dominant_color": "#5a3d1e" } })).await;

        let mut last = Value::Null;
        for (shirt, stars) in [("shirt_1", 1), ("shirt_2", 2), ("shirt_3", 2), ("shirt_4", 5), ("shirt_5", 4)] {
            last = self.rate(shirt, stars).await;
        }
        assert_eq!(last["rating_count"], 5);
        assert_eq!(last["should_retrain"], true);

        let (status, outcome) = self.send(Method::POST, "/model/retrain", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["status"], "trained");
        assert_eq!(outcome["model"]["training_samples"], 5);
        outcome["model"]["version"].as_str().unwrap().to_string()
    }

    async fn rate(&self, shirt: &str, stars: u8) -> Value {
        let (status, body) = self
            .post(
                "/outfits/rate",
                json!({ "shirt_id": shirt, "pants_id": "pants_1", "shoes_id": "shoes_1", "rating": stars }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new().await;
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "trace-123")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "trace-123");
}

#[tokio::test]
async fn test_wardrobe_item_lifecycle() {
    let app = TestApp::new().await;
    assert_eq!(app.add_item("shirt", json!({})).await, "shirt_1");
    assert_eq!(
        app.add_item("shirt", json!({ "visual": { "dominant_color": "#aa0000" } }))
            .await,
        "shirt_2"
    );
    assert_eq!(app.add_item("pants", json!({})).await, "pants_1");

    let (status, items) = app.get("/wardrobe/items?category=shirt").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(items.as_array().unwrap().len(), 2);

    let (status, _) = app.send(Method::DELETE, "/wardrobe/items/shirt_1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = app.send(Method::DELETE, "/wardrobe/items/shirt_1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (_, items) = app.get("/wardrobe/items").await;
    assert_eq!(items.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_random_outfit_needs_every_category() {
    let app = TestApp::new().await;
    app.add_item("shirt", json!({})).await;
    let (status, _) = app.get("/outfits/random").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rating_overrides_random_fallback() {
    let app = TestApp::new().await;
    app.add_item("shirt", json!({})).await;
    app.add_item("shirt", json!({})).await;
    app.add_item("pants", json!({})).await;
    app.add_item("shoes", json!({})).await;

    let rated = app.rate("shirt_1", 5).await;
    assert_eq!(rated["rating_count"], 1);
    assert_eq!(rated["should_retrain"], false);

    for _ in 0..25 {
        let (status, outfit) = app.get("/outfits/random").await;
        assert_eq!(status, StatusCode::OK);
        if outfit["shirt_id"] == "shirt_1" {
            assert_eq!(outfit["score"], 1.0);
            assert_eq!(outfit["source"], "user_rating");
            assert_eq!(outfit["rating"], 5);
        } else {
            assert_eq!(outfit["shirt_id"], "shirt_2");
            assert_eq!(outfit["source"], "random");
            let score = outfit["score"].as_f64().unwrap();
            assert!((0.3..=0.7).contains(&score));
        }
    }

    let (status, partial) = app.post("/outfits/partial", json!({ "shirt_id": "shirt_1" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(partial["source"], "user_rating");
}

#[tokio::test]
async fn test_invalid_rating_is_rejected() {
    let app = TestApp::new().await;
    let (status, _) = app
        .post(
            "/outfits/rate",
            json!({ "shirt_id": "shirt_1", "pants_id": "pants_1", "shoes_id": "shoes_1", "rating": 6 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_retrain_below_minimum_is_not_trained() {
    let app = TestApp::new().await;
    let (status, outcome) = app.post("/model/retrain", json!({ "force": true })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "not_trained");
}

#[tokio::test]
async fn test_training_then_prediction_cascade() {
    let app = TestApp::new().await;
    let version = app.seed_and_train().await;

    let unrated = json!({ "shirt_id": "shirt_6", "pants_id": "pants_1", "shoes_id": "shoes_1" });
    let (status, fresh) = app.post("/outfits/score", unrated.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fresh["source"], "new_ml");

    let (_, cached) = app.post("/outfits/score", unrated).await;
    assert_eq!(cached["source"], "cached_ml");
    assert_eq!(cached["probability"], fresh["probability"]);

    let (_, rated) = app
        .post(
            "/outfits/score",
            json!({ "shirt_id": "shirt_4", "pants_id": "pants_1", "shoes_id": "shoes_1" }),
        )
        .await;
    assert_eq!(rated["source"], "user_rating");
    assert_eq!(rated["score"], 1.0);

    let (_, stats) = app.get("/cache/stats").await;
    assert_eq!(stats["active_model"], version.as_str());
    assert_eq!(stats["cached_predictions"], 1);
    assert_eq!(stats["total_combinations"], 6);

    let (status, completed) = app
        .post("/outfits/complete", json!({ "item_type": "pants", "item_id": "pants_1" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["pants_id"], "pants_1");

    let (_, ratings) = app.get("/ratings").await;
    assert_eq!(ratings.as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_wardrobe_changes_force_rescoring() {
    let app = TestApp::new().await;
    app.seed_and_train().await;

    let unrated = json!({ "shirt_id": "shirt_6", "pants_id": "pants_1", "shoes_id": "shoes_1" });
    let (_, fresh) = app.post("/outfits/score", unrated.clone()).await;
    assert_eq!(fresh["source"], "new_ml");
    let (_, cached) = app.post("/outfits/score", unrated.clone()).await;
    assert_eq!(cached["source"], "cached_ml");

    let (status, _) = app.get("/outfits/random").await;
    assert_eq!(status, StatusCode::OK);
    let (_, stats) = app.get("/cache/stats").await;
    assert_eq!(stats["scored_combinations"], 6);

    let added = app
        .add_item("shirt", json!({ "semantic": { "style": "casual", "formality_score": 0.5 } }))
        .await;
    assert_eq!(added, "shirt_7");

    let (_, stats) = app.get("/cache/stats").await;
    assert_eq!(stats["cached_predictions"], 0);
    assert_eq!(stats["cached_features"], 0);
    assert_eq!(stats["scored_combinations"], 0);
    assert_eq!(stats["total_combinations"], 7);

    let (_, rescored) = app.post("/outfits/score", unrated.clone()).await;
    assert_eq!(rescored["source"], "new_ml");
    assert_eq!(rescored["probability"], fresh["probability"]);

    let (status, _) = app.send(Method::DELETE, "/wardrobe/items/shirt_7", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, rescored) = app.post("/outfits/score", unrated).await;
    assert_eq!(rescored["source"], "new_ml");
}

#[tokio::test]
async fn test_precompute_fills_feature_cache() {
    let app = TestApp::new().await;
    app.add_item("shirt", json!({ "visual": { "dominant_color": "#ffffff" } })).await;
    app.add_item("shirt", json!({ "visual": { "dominant_color": "#000000" } })).await;
    app.add_item("pants", json!({ "visual": { "dominant_color": "#101010" } })).await;
    app.add_item("shoes", json!({ "visual": { "dominant_color": "#5a3d1e" } })).await;

    let (status, body) = app.send(Method::POST, "/cache/precompute", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["computed"], 2);

    let (_, stats) = app.get("/cache/stats").await;
    assert_eq!(stats["cached_features"], 2);
    assert_eq!(stats["total_combinations"], 2);

    let (_, body) = app.send(Method::POST, "/cache/precompute", None).await;
    assert_eq!(body["computed"], 0);
}
