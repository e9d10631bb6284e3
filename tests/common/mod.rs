//! Shared harness for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use metrics_exporter_prometheus::PrometheusBuilder;
use ringdesk::application::bridge::BridgeRegistry;
use ringdesk::application::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use ringdesk::application::{
    ConversationBridge, DispatcherSettings, FailoverHandler, PostCallFinalizer, RetryPolicy,
    SignatureVerifier, WebhookDispatcher,
};
use ringdesk::config::Config;
use ringdesk::domain::admission::{
    AdmissionController, AdmissionDirectory, NumberRoute, Subscription,
};
use ringdesk::domain::audio::AudioFrame;
use ringdesk::domain::call::{CallSessionStore, Speaker, TranscriptFragment};
use ringdesk::domain::call_summary::CallSummaryRepository;
use ringdesk::domain::notification::{NotificationRequest, NotificationTrigger};
use ringdesk::domain::pipeline::{
    PipelineConnection, PipelineEvent, PipelineSeed, PipelineSink, SpeechPipeline,
};
use ringdesk::domain::shared::value_objects::{BusinessId, PhoneNumberId, StoreId};
use ringdesk::infrastructure::persistence::{
    InMemoryAdmissionDirectory, InMemoryCallSessionStore, InMemoryCallSummaryRepository,
};
use ringdesk::infrastructure::InMemoryPromptCache;
use ringdesk::interface::api::{build_router, AppState};
use ringdesk::CallError;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt; // For `oneshot`

pub const SECRET: &str = "whsec_test";
pub const BUSINESS_NUMBER: &str = "+15550100";
pub const CALLER: &str = "+15550199";

pub fn business_id() -> BusinessId {
    BusinessId::new("biz-1")
}

pub fn route() -> NumberRoute {
    NumberRoute {
        business_id: business_id(),
        store_id: StoreId::new("store-1"),
        phone_number_id: PhoneNumberId::new("pn-1"),
    }
}

/// Config tuned for fast tests
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.webhook.signing_secret = SECRET.to_string();
    config.bridge.state_poll_interval_ms = 20;
    config.bridge.connect_timeout_ms = 500;
    config.bridge.stage_timeout_ms = 500;
    config.bridge.shutdown_grace_ms = 1000;
    config.persistence.retry_backoff_ms = 1;
    config
}

/// Speech pipeline double: every forwarded frame comes back as a caller
/// transcript `frame <seq>`
#[derive(Default)]
pub struct EchoPipeline {
    pub connects: AtomicUsize,
    pub cancels: Arc<AtomicUsize>,
    pub fail_connect: AtomicBool,
    senders: Mutex<Vec<mpsc::Sender<PipelineEvent>>>,
}

impl EchoPipeline {
    /// Event sender of the most recent connection
    pub fn events(&self) -> mpsc::Sender<PipelineEvent> {
        self.senders
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("pipeline never connected")
    }
}

#[async_trait]
impl SpeechPipeline for EchoPipeline {
    async fn connect(&self, _seed: &PipelineSeed) -> ringdesk::Result<PipelineConnection> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(CallError::PipelineError("pipeline unavailable".to_string()));
        }
        let (tx, rx) = mpsc::channel(1024);
        self.senders.lock().unwrap().push(tx.clone());
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(PipelineConnection {
            sink: Box::new(EchoSink {
                events: tx,
                cancels: self.cancels.clone(),
            }),
            events: rx,
        })
    }
}

struct EchoSink {
    events: mpsc::Sender<PipelineEvent>,
    cancels: Arc<AtomicUsize>,
}

#[async_trait]
impl PipelineSink for EchoSink {
    async fn send_audio(&mut self, frame: &AudioFrame) -> ringdesk::Result<()> {
        let _ = self.events.try_send(PipelineEvent::Transcript(TranscriptFragment::new(
            Speaker::Caller,
            format!("frame {}", frame.seq),
        )));
        Ok(())
    }

    async fn cancel_playback(&mut self) -> ringdesk::Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {}
}

/// Records every notification request
#[derive(Default)]
pub struct RecordingNotifier {
    pub requests: Mutex<Vec<NotificationRequest>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationTrigger for RecordingNotifier {
    async fn trigger(&self, request: &NotificationRequest) -> ringdesk::Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Admission directory counting full evaluations
pub struct CountingDirectory {
    pub inner: InMemoryAdmissionDirectory,
    pub evaluations: AtomicUsize,
}

#[async_trait]
impl AdmissionDirectory for CountingDirectory {
    async fn resolve_number(&self, to_number: &str) -> ringdesk::Result<Option<NumberRoute>> {
        self.inner.resolve_number(to_number).await
    }

    async fn store_active(&self, store_id: &StoreId) -> ringdesk::Result<bool> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        self.inner.store_active(store_id).await
    }

    async fn is_number_blocked(
        &self,
        phone_number_id: &PhoneNumberId,
        caller: &str,
    ) -> ringdesk::Result<bool> {
        self.inner.is_number_blocked(phone_number_id, caller).await
    }

    async fn subscription(&self, business_id: &BusinessId) -> ringdesk::Result<Subscription> {
        self.inner.subscription(business_id).await
    }

    async fn calls_this_period(&self, business_id: &BusinessId) -> ringdesk::Result<u64> {
        self.inner.calls_this_period(business_id).await
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<dyn CallSessionStore>,
    pub summaries: Arc<InMemoryCallSummaryRepository>,
    pub directory: Arc<CountingDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub pipeline: Arc<EchoPipeline>,
    pub bridge: Arc<ConversationBridge>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(test_config(), None, None)
    }

    /// Build the app; `store` and `admission` replace the in-memory defaults
    pub fn build(
        config: Config,
        store: Option<Arc<dyn CallSessionStore>>,
        admission: Option<Arc<dyn AdmissionDirectory>>,
    ) -> Self {
        let store = store.unwrap_or_else(|| {
            Arc::new(InMemoryCallSessionStore::new(config.session.ttl())) as Arc<dyn CallSessionStore>
        });
        let summaries = Arc::new(InMemoryCallSummaryRepository::new());

        let inner = InMemoryAdmissionDirectory::new()
            .with_usage_source(summaries.clone() as Arc<dyn CallSummaryRepository>);
        inner.add_number(BUSINESS_NUMBER, route());
        inner.set_subscription(&business_id(), Subscription::active(None));
        let directory = Arc::new(CountingDirectory {
            inner,
            evaluations: AtomicUsize::new(0),
        });
        let admission_source: Arc<dyn AdmissionDirectory> =
            admission.unwrap_or_else(|| directory.clone() as Arc<dyn AdmissionDirectory>);

        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = Arc::new(EchoPipeline::default());
        let retry = RetryPolicy::new(
            config.persistence.retry_attempts,
            config.persistence.retry_backoff(),
        );

        let bridge = Arc::new(ConversationBridge::new(
            store.clone(),
            pipeline.clone(),
            Arc::new(InMemoryPromptCache::new(Duration::from_secs(60))),
            BridgeRegistry::new(),
            config.bridge.clone(),
            retry,
        ));
        let finalizer = Arc::new(PostCallFinalizer::new(
            store.clone(),
            bridge.clone(),
            summaries.clone(),
            notifier.clone(),
            config.session.eviction_grace(),
            config.pricing.cents_per_minute,
            retry,
        ));
        let dispatcher = WebhookDispatcher::new(
            SignatureVerifier::new(SECRET, config.webhook.timestamp_tolerance_secs),
            store.clone(),
            AdmissionController::new(admission_source),
            bridge.clone(),
            finalizer,
            FailoverHandler::new(&config.failover),
            DispatcherSettings::from_config(&config),
        );

        let state = AppState {
            dispatcher,
            store: store.clone(),
            bridge: bridge.clone(),
        };
        let prometheus_handle = PrometheusBuilder::new().build_recorder().handle();

        Self {
            router: build_router(state, prometheus_handle),
            store,
            summaries,
            directory,
            notifier,
            pipeline,
            bridge,
        }
    }

    /// POST a correctly signed webhook
    pub async fn webhook(&self, body: Value) -> (StatusCode, Value) {
        let raw = serde_json::to_vec(&body).unwrap();
        let signature = SignatureVerifier::new(SECRET, 300).sign(&raw);
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.send(
            Request::builder()
                .method("POST")
                .uri("/webhooks/carrier")
                .header("content-type", "application/json")
                .header(SIGNATURE_HEADER, signature)
                .header(TIMESTAMP_HEADER, timestamp)
                .body(Body::from(raw))
                .unwrap(),
        )
        .await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }
}

/// Webhook body for one carrier event
pub fn event(event_type: &str, call_control_id: &str, sequence: u64, payload: Value) -> Value {
    json!({
        "data": {
            "event_type": event_type,
            "call_control_id": call_control_id,
            "sequence": sequence,
            "payload": payload,
        }
    })
}

pub fn setup_payload() -> Value {
    json!({ "from": CALLER, "to": BUSINESS_NUMBER, "direction": "incoming" })
}

pub fn audio_payload(seq: u64) -> Value {
    json!({ "seq": seq, "audio": STANDARD.encode([seq as u8; 160]) })
}

/// Action types of a webhook response
pub fn action_types(body: &Value) -> Vec<String> {
    body["actions"]
        .as_array()
        .map(|actions| {
            actions
                .iter()
                .filter_map(|a| a["type"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Poll until `check` holds or the deadline passes
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
