// routes.rs
use axum::{
    routing::{get, post},
    Router,
};
use http::{header::CONTENT_TYPE, HeaderName, Method};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{self, ADMIN_PASSWORD_HEADER};
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(ADMIN_PASSWORD_HEADER)]);

    let api = Router::new()
        .route("/data", get(handlers::get_data))
        .route(
            "/couples",
            get(handlers::get_couples).put(handlers::update_couples),
        )
        .route("/vote", post(handlers::vote))
        .route("/results-status", get(handlers::results_status))
        .route("/reset", post(handlers::reset))
        .route("/toggle-results", post(handlers::toggle_results));

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use http::{Request, StatusCode};
    use secrecy::SecretString;
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::config::StorageConfig;
    use crate::db::{tests::temp_db, Store};
    use crate::models::{Snapshot, VoteResponse};

    const PASSWORD: &str = "letmein";

    async fn app() -> (Router, TempDir) {
        let (dir, path) = temp_db();
        let store = Store::open(&StorageConfig::File { path }).await.unwrap();
        let state = AppState::new(store, SecretString::from(PASSWORD));
        (create_routes(state), dir)
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn admin_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        let mut request = json_request(method, uri, body);
        request
            .headers_mut()
            .insert(ADMIN_PASSWORD_HEADER, PASSWORD.parse().unwrap());
        request
    }

    async fn send<T: DeserializeOwned>(app: &Router, request: Request<Body>) -> (StatusCode, T) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_vote_then_data_reflects_count() {
        let (app, _dir) = app().await;

        let (status, body): (_, VoteResponse) = send(
            &app,
            json_request(Method::POST, "/api/vote", json!({"coupleId": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        assert_eq!(body.couple.unwrap().votes, 1);

        let (status, snapshot): (_, Snapshot) = send(&app, get("/api/data")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot.couples[1].id, 2);
        assert_eq!(snapshot.couples[1].votes, 1);
        assert!(!snapshot.results_visible);
    }

    #[tokio::test]
    async fn test_vote_unknown_couple_is_404() {
        let (app, _dir) = app().await;

        let (status, body): (_, Value) = send(
            &app,
            json_request(Method::POST, "/api/vote", json!({"coupleId": 404})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Couple 404 not found");

        let (_, snapshot): (_, Snapshot) = send(&app, get("/api/data")).await;
        assert!(snapshot.couples.iter().all(|c| c.votes == 0));
    }

    #[tokio::test]
    async fn test_vote_without_id_is_400() {
        let (app, _dir) = app().await;

        let (status, body): (_, Value) =
            send(&app, json_request(Method::POST, "/api/vote", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "coupleId is required");

        let (status, _): (_, Value) = send(
            &app,
            json_request(Method::POST, "/api/vote", json!({"coupleId": "two"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admin_requires_password() {
        let (app, _dir) = app().await;

        let (status, body): (_, Value) =
            send(&app, json_request(Method::POST, "/api/reset", json!({}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid admin password");

        let mut wrong = json_request(Method::POST, "/api/toggle-results", json!({}));
        wrong
            .headers_mut()
            .insert(ADMIN_PASSWORD_HEADER, "guess".parse().unwrap());
        let (status, _): (_, Value) = send(&app, wrong).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, status_body): (_, Value) = send(&app, get("/api/results-status")).await;
        assert_eq!(status_body["resultsVisible"], false);
    }

    #[tokio::test]
    async fn test_reset_and_toggle() {
        let (app, _dir) = app().await;

        let _: (_, Value) = send(
            &app,
            json_request(Method::POST, "/api/vote", json!({"coupleId": 1})),
        )
        .await;

        let (status, body): (_, Value) =
            send(&app, admin_request(Method::POST, "/api/reset", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let last_reset = body["lastReset"].as_i64().unwrap();
        assert!(last_reset > 0);

        let (status, body): (_, Value) = send(
            &app,
            admin_request(Method::POST, "/api/toggle-results", json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resultsVisible"], true);

        let (_, snapshot): (_, Snapshot) = send(&app, get("/api/data")).await;
        assert!(snapshot.couples.iter().all(|c| c.votes == 0));
        assert_eq!(snapshot.last_reset, last_reset);
        assert!(snapshot.results_visible);
    }

    #[tokio::test]
    async fn test_update_couples() {
        let (app, _dir) = app().await;

        let (status, body): (_, Value) = send(
            &app,
            admin_request(
                Method::PUT,
                "/api/couples",
                json!([{"id": 3, "name": "Olga & Petr", "image": "photos/op.webp"}]),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["couples"][2]["name"], "Olga & Petr");
        assert_eq!(body["couples"][2]["votes"], 0);

        let (status, _): (_, Value) = send(
            &app,
            admin_request(
                Method::PUT,
                "/api/couples",
                json!([{"id": 99, "name": "Nobody", "image": ""}]),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _): (_, Value) = send(
            &app,
            admin_request(
                Method::PUT,
                "/api/couples",
                json!([{"id": 3, "name": "  ", "image": ""}]),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _): (_, Value) = send(
            &app,
            admin_request(Method::PUT, "/api/couples", json!({"id": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
