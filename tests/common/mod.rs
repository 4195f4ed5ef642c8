#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use http_body_util::BodyExt;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde_json::Value;
use storefront_api::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    db,
    entities::{order, order_item},
    events::{self, EventSender},
    handlers::AppServices,
    payments::{
        AuthorizationStatus, CreateAuthorization, GatewayError, PaymentAuthorization,
        PaymentGateway,
    },
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str =
    "k3Jd9sLq2Xz7Vb4Nw8Ty1Hf6Gm5Rp0Ue3Oa9Ic2Ws7Ed4Fr1Tg6Yh8Uj5Ik0Ol3Pz9Xc2Vb7Nm4Qw1";

/// In-process stand-in for the payment processor.
#[derive(Default)]
pub struct FakeGateway {
    authorizations: Mutex<HashMap<String, PaymentAuthorization>>,
    next_id: AtomicU64,
    pub retrieve_calls: AtomicU64,
}

impl FakeGateway {
    pub fn put(&self, authorization: PaymentAuthorization) {
        self.authorizations
            .lock()
            .unwrap()
            .insert(authorization.id.clone(), authorization);
    }

    /// Registers an authorization in the given state.
    pub fn with_status(&self, id: &str, amount: i64, currency: &str, status: AuthorizationStatus) {
        self.put(PaymentAuthorization {
            id: id.to_string(),
            amount,
            currency: currency.to_string(),
            status,
            payment_method_types: vec!["card".to_string()],
            metadata: HashMap::new(),
            client_secret: Some(format!("{}_secret", id)),
            livemode: false,
        });
    }

    pub fn settled(&self, id: &str, amount: i64, currency: &str) {
        self.with_status(id, amount, currency, AuthorizationStatus::Succeeded);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_authorization(
        &self,
        request: CreateAuthorization,
    ) -> Result<PaymentAuthorization, GatewayError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let authorization = PaymentAuthorization {
            id: format!("pi_fake_{}", n),
            amount: request.amount_minor,
            currency: request.currency,
            status: AuthorizationStatus::RequiresPaymentMethod,
            payment_method_types: vec!["card".to_string()],
            metadata: request.metadata.into_iter().collect(),
            client_secret: Some(format!("pi_fake_{}_secret", n)),
            livemode: false,
        };
        self.put(authorization.clone());
        Ok(authorization)
    }

    async fn retrieve_authorization(
        &self,
        authorization_id: &str,
    ) -> Result<PaymentAuthorization, GatewayError> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        self.authorizations
            .lock()
            .unwrap()
            .get(authorization_id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found(authorization_id))
    }
}

/// Helper harness for spinning up the application against a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub user_id: Uuid,
    token: String,
    admin_token: String,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir for test database");
        let db_path = db_dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::default());
        let auth_service = Arc::new(AuthService::new(AuthConfig::from_app_config(&cfg)));

        let services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            gateway.clone(),
            &cfg.default_currency,
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
            auth: auth_service.clone(),
        };

        let user_id = Uuid::new_v4();
        let token = auth_service
            .issue_token(
                user_id,
                Some("Test User".to_string()),
                Some("test@example.com".to_string()),
                vec!["customer".to_string()],
            )
            .expect("issue customer token");
        let admin_token = auth_service
            .issue_token(
                Uuid::new_v4(),
                Some("Admin".to_string()),
                Some("admin@example.com".to_string()),
                vec!["admin".to_string()],
            )
            .expect("issue admin token");

        Self {
            router: storefront_api::app_router(state.clone()),
            state,
            gateway,
            user_id,
            token,
            admin_token,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// Bearer token for the default customer.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }

    /// Token for another customer, returned with that customer's id.
    pub fn other_customer(&self) -> (Uuid, String) {
        let id = Uuid::new_v4();
        let token = self
            .state
            .auth
            .issue_token(id, Some("Other".into()), None, vec!["customer".into()])
            .expect("issue token");
        (id, token)
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for requests as the default customer.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    pub async fn request_as_admin(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.admin_token()))
            .await
    }

    pub async fn orders_for_authorization(&self, authorization_id: &str) -> u64 {
        order::Entity::find()
            .filter(order::Column::PaymentIntentId.eq(authorization_id))
            .count(&*self.state.db)
            .await
            .expect("count orders")
    }

    pub async fn order_for_authorization(&self, authorization_id: &str) -> Option<order::Model> {
        order::Entity::find()
            .filter(order::Column::PaymentIntentId.eq(authorization_id))
            .one(&*self.state.db)
            .await
            .expect("load order")
    }

    pub async fn items_of(&self, order_id: Uuid) -> Vec<order_item::Model> {
        order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Position)
            .all(&*self.state.db)
            .await
            .expect("load order items")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Collects a response body as JSON.
pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read response body")
        .to_bytes();
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response body is json")
    }
}
