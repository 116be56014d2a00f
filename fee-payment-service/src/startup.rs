//! Application startup and lifecycle management.
//!
//! Wires the store, gateway simulator, and receipt collaborators into the
//! orchestrator, then serves the HTTP surface. Binding port 0 yields a
//! random port, which the test harness relies on.

use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::handlers;
use crate::services::gateway::{PaymentGateway, SimulatedGateway};
use crate::services::receipts::{
    FileReceiptRenderer, MockNotifier, NotificationSender, ReceiptRenderer, SmtpNotifier,
};
use crate::services::repository::{InMemoryPaymentStore, MongoPaymentRepository, PaymentStore};
use crate::services::{DuesService, PaymentService};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub payments: PaymentService,
    pub dues: DuesService,
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn PaymentStore> = match &config.database.url {
            Some(url) => {
                let mut client_options = ClientOptions::parse(url.expose_secret()).await?;
                client_options.app_name = Some(config.service_name.clone());
                let client = Client::with_options(client_options)?;
                let db = client.database(&config.database.db_name);

                let repository = MongoPaymentRepository::new(&db);
                repository.init_indexes().await?;
                Arc::new(repository)
            }
            None => {
                tracing::warn!("no database URL configured - using the in-memory payment store");
                Arc::new(InMemoryPaymentStore::new())
            }
        };

        let gateway: Arc<dyn PaymentGateway> =
            Arc::new(SimulatedGateway::new(config.gateway.policy()));
        let receipts: Arc<dyn ReceiptRenderer> =
            Arc::new(FileReceiptRenderer::new(config.receipts.dir.clone()));
        let notifier: Arc<dyn NotificationSender> = if config.smtp.enabled {
            Arc::new(SmtpNotifier::new(config.smtp.clone())?)
        } else {
            tracing::info!("SMTP disabled - receipt emails are mocked");
            Arc::new(MockNotifier::default())
        };

        let payments = PaymentService::new(
            Arc::clone(&store),
            gateway,
            receipts,
            notifier,
            config.catalog.clone(),
            config.fees.clone(),
        );
        let dues = DuesService::new(store, config.catalog.clone());

        let state = AppState {
            config: config.clone(),
            payments,
            dues,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        tracing::info!("fee-payment service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let router = build_router(self.state);
        axum::serve(self.listener, router).await?;
        Ok(())
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        // Payment state machine
        .route("/payments/initiate", post(handlers::payments::initiate_payment))
        .route("/payments/:id", get(handlers::payments::get_payment))
        .route(
            "/payments/:id/process",
            post(handlers::payments::process_payment),
        )
        .route(
            "/payments/:id/verify-otp",
            post(handlers::payments::verify_otp),
        )
        .route(
            "/payments/:id/complete",
            post(handlers::payments::complete_payment),
        )
        // Student-scoped reads
        .route(
            "/students/:student_id/payments",
            get(handlers::payments::payment_history),
        )
        .route(
            "/students/:student_id/dues",
            get(handlers::dues::outstanding_dues),
        )
        .route(
            "/students/:student_id/installments",
            get(handlers::dues::pending_installments),
        )
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .with_state(state)
}
