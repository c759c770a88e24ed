use std::sync::Arc;

use axum::Router;
use potholer_core::config::{AppConfig, ConfigError, LoadOptions};
use potholer_core::{ClassificationError, InMemoryPendingStore};
use potholer_messenger::{
    delivery::DeliveryRunner, events::default_dispatcher, router::ConversationRouter,
};
use thiserror::Error;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::{clarifai::ClarifaiClient, graph::GraphApiClient, health, webhook};

pub struct Application {
    pub config: AppConfig,
    pub store: Arc<InMemoryPendingStore>,
    pub runner: DeliveryRunner,
    pub batches: TaskTracker,
}

impl Application {
    /// Webhook routes plus `/health`, all on the configured port.
    pub fn router(&self) -> Router {
        webhook::router(webhook::WebhookState::new(
            self.config.messenger.verify_token.clone(),
            self.runner.clone(),
            self.batches.clone(),
        ))
        .merge(health::router(self.store.clone()))
    }

    /// Waits for every acknowledged webhook batch to finish its replies.
    pub async fn drain_batches(&self) {
        self.batches.close();
        info!(
            event_name = "system.server.draining",
            correlation_id = "shutdown",
            in_flight = self.batches.len(),
            "waiting for acknowledged webhook batches"
        );
        self.batches.wait().await;
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("http client construction failed: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("could not connect to the image classifier: {0}")]
    ClassifierHandshake(#[source] ClassificationError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let classifier = ClarifaiClient::new(&config.classifier).map_err(BootstrapError::HttpClient)?;
    classifier.handshake().await.map_err(BootstrapError::ClassifierHandshake)?;

    let messenger =
        Arc::new(GraphApiClient::new(&config.messenger).map_err(BootstrapError::HttpClient)?);
    let store = Arc::new(InMemoryPendingStore::new());
    let conversation =
        Arc::new(ConversationRouter::new(store.clone(), Arc::new(classifier), messenger.clone()));
    let runner = DeliveryRunner::new(Arc::new(default_dispatcher(conversation)), messenger);

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        model = %config.classifier.model,
        "messenger pipeline assembled"
    );

    Ok(Application { config, store, runner, batches: TaskTracker::new() })
}
