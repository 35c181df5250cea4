use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use sea_orm::Database;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use storefront_api as api;

/// In-process application wired against an in-memory SQLite database with
/// the real migrations applied.
pub struct TestApp {
    router: axum::Router,
    auth: Arc<api::auth::AuthService>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db = Arc::new(
            Database::connect("sqlite::memory:")
                .await
                .expect("connect in-memory sqlite"),
        );
        api::db::run_migrations(&db).await.expect("run migrations");

        let config = api::config::AppConfig::new(
            "sqlite::memory:".to_string(),
            "integration-test-secret-that-is-long-enough".to_string(),
            "127.0.0.1".to_string(),
            0,
        );

        let (event_tx, mut event_rx) = tokio::sync::mpsc::channel(64);
        tokio::spawn(async move { while event_rx.recv().await.is_some() {} });
        let event_sender = api::events::EventSender::new(event_tx);

        let media_dir = tempfile::tempdir().expect("media dir");
        let media = Arc::new(api::media::LocalMediaStorage::new(media_dir.path()));
        // Keep the directory alive for the whole test process.
        std::mem::forget(media_dir);

        let services = api::handlers::AppServices::new(
            db.clone(),
            Some(Arc::new(event_sender.clone())),
            media,
        );

        let state = api::AppState {
            db,
            config: config.clone(),
            event_sender,
            services,
        };

        let auth = Arc::new(api::auth::AuthService::new(api::auth::AuthConfig::new(
            config.jwt_secret.clone(),
            Duration::from_secs(3600),
        )));

        let router = api::app_routes()
            .layer(axum::middleware::from_fn_with_state(
                auth.clone(),
                |axum::extract::State(svc): axum::extract::State<Arc<api::auth::AuthService>>,
                 mut req: axum::extract::Request,
                 next: axum::middleware::Next| async move {
                    req.extensions_mut().insert(svc);
                    next.run(req).await
                },
            ))
            .with_state(state);

        Self { router, auth }
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        self.auth
            .generate_token(user_id, &["buyer".to_string()])
            .expect("token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("response")
    }
}

pub async fn response_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
