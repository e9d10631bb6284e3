use ringdesk::application::{
    spawn_session_sweeper, ConversationBridge, DispatcherSettings, FailoverHandler,
    PostCallFinalizer, RetryPolicy, SignatureVerifier, WebhookDispatcher,
};
use ringdesk::application::bridge::BridgeRegistry;
use ringdesk::config::Config;
use ringdesk::domain::admission::{AdmissionController, AdmissionDirectory, NumberRoute, Subscription};
use ringdesk::domain::call::CallSessionStore;
use ringdesk::domain::call_summary::CallSummaryRepository;
use ringdesk::domain::notification::NotificationTrigger;
use ringdesk::domain::shared::value_objects::{BusinessId, PhoneNumberId, StoreId};
use ringdesk::infrastructure::persistence::{
    InMemoryAdmissionDirectory, InMemoryCallSessionStore, InMemoryCallSummaryRepository,
};
use ringdesk::infrastructure::{
    HttpNotificationTrigger, InMemoryPromptCache, LoggingNotificationTrigger, WsSpeechPipeline,
};
use ringdesk::interface::api::{build_router, init_metrics, AppState};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "postgres")]
use ringdesk::infrastructure::persistence::{
    create_pool, run_migrations, PgAdmissionDirectory, PgCallSessionStore, PgCallSummaryRepository,
};

type Backends = (
    Arc<dyn CallSessionStore>,
    Arc<dyn CallSummaryRepository>,
    Arc<dyn AdmissionDirectory>,
);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting RingDesk");

    let config = Config::load()?;
    if config.webhook.signing_secret.is_empty() {
        warn!("webhook.signing_secret is empty; every webhook will be rejected");
    }

    let (store, summaries, directory) = init_backends(&config).await?;

    let prometheus_handle = init_metrics()?;

    let retry = RetryPolicy::new(
        config.persistence.retry_attempts,
        config.persistence.retry_backoff(),
    );

    let prompts = Arc::new(InMemoryPromptCache::with_stores(
        config.pipeline.prompt_cache_ttl(),
        &config.pipeline.stores,
    ));
    let pipeline = Arc::new(WsSpeechPipeline::new(config.pipeline.url.clone()));
    let bridge = Arc::new(ConversationBridge::new(
        store.clone(),
        pipeline,
        prompts,
        BridgeRegistry::new(),
        config.bridge.clone(),
        retry,
    ));

    let notifier: Arc<dyn NotificationTrigger> = if config.notifications.endpoint.is_empty() {
        info!("No notification endpoint configured, logging notifications");
        Arc::new(LoggingNotificationTrigger)
    } else {
        Arc::new(HttpNotificationTrigger::new(
            config.notifications.endpoint.clone(),
            config.notifications.timeout(),
        )?)
    };

    let finalizer = Arc::new(PostCallFinalizer::new(
        store.clone(),
        bridge.clone(),
        summaries,
        notifier,
        config.session.eviction_grace(),
        config.pricing.cents_per_minute,
        retry,
    ));

    let dispatcher = WebhookDispatcher::new(
        SignatureVerifier::new(
            &config.webhook.signing_secret,
            config.webhook.timestamp_tolerance_secs,
        ),
        store.clone(),
        AdmissionController::new(directory),
        bridge.clone(),
        finalizer,
        FailoverHandler::new(&config.failover),
        DispatcherSettings::from_config(&config),
    );

    let sweeper = spawn_session_sweeper(store.clone(), config.session.sweep_interval());

    let state = AppState {
        dispatcher,
        store,
        bridge: bridge.clone(),
    };
    let app = build_router(state, prometheus_handle);

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", config.bind_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
        })
        .await?;

    bridge.stop_all().await;
    sweeper.abort();

    info!("RingDesk stopped");
    Ok(())
}

async fn init_backends(config: &Config) -> anyhow::Result<Backends> {
    match config.database.backend.as_str() {
        #[cfg(feature = "postgres")]
        "postgres" => {
            let pool = create_pool(&config.database).await?;
            info!("Running database migrations...");
            run_migrations(&pool).await?;
            info!("Database migrations completed");

            let store: Arc<dyn CallSessionStore> =
                Arc::new(PgCallSessionStore::new(pool.clone(), config.session.ttl()));
            let summaries: Arc<dyn CallSummaryRepository> =
                Arc::new(PgCallSummaryRepository::new(pool.clone()));
            let directory: Arc<dyn AdmissionDirectory> = Arc::new(PgAdmissionDirectory::new(pool));
            Ok((store, summaries, directory))
        }
        "memory" => {
            let summaries: Arc<dyn CallSummaryRepository> =
                Arc::new(InMemoryCallSummaryRepository::new());
            let directory = InMemoryAdmissionDirectory::new().with_usage_source(summaries.clone());
            for number in &config.directory.numbers {
                let business_id = BusinessId::new(number.business_id.clone());
                directory.add_number(
                    &number.number,
                    NumberRoute {
                        business_id: business_id.clone(),
                        store_id: StoreId::new(number.store_id.clone()),
                        phone_number_id: PhoneNumberId::new(number.phone_number_id.clone()),
                    },
                );
                directory.set_subscription(&business_id, Subscription::active(number.call_limit));
            }
            info!(
                "Using in-memory backends ({} provisioned numbers)",
                config.directory.numbers.len()
            );

            let store: Arc<dyn CallSessionStore> =
                Arc::new(InMemoryCallSessionStore::new(config.session.ttl()));
            Ok((store, summaries, Arc::new(directory) as Arc<dyn AdmissionDirectory>))
        }
        other => anyhow::bail!("unsupported database backend: {}", other),
    }
}
