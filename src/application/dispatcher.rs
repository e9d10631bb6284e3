//! Webhook dispatcher
//!
//! Verifies, parses and routes carrier events. Each verified event is
//! handled on its own task under the response budget; whatever happens
//! downstream (error, panic, elapsed budget) the carrier gets a 200 with a
//! non-empty action list.

use crate::application::bridge::{ConversationBridge, ForwardResult};
use crate::application::failover::FailoverHandler;
use crate::application::finalizer::PostCallFinalizer;
use crate::application::signature::SignatureVerifier;
use crate::config::{Config, MediaConfig};
use crate::domain::admission::{AdmissionController, AdmissionDecision, AdmissionRequest, NumberRoute};
use crate::domain::call::{
    ActionList, CallSession, CallSessionStore, CallState, CarrierAction, CarrierEvent,
    CarrierEventKind, NewCallSession,
};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{normalize_e164, CallControlId};
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

/// Raw signed webhook request
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub body: Bytes,
    pub signature: Option<String>,
    pub timestamp: Option<String>,
}

/// What the HTTP layer should answer
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    /// 401, no side effect
    Unauthorized(String),
    /// 400, no side effect
    Malformed(String),
    /// 200 with these actions; `fallback` marks the catch-all path
    Actions { actions: ActionList, fallback: bool },
}

/// Handler outcome for one event
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// Respond with exactly these actions
    Respond(ActionList),
    /// Respond with the session's steady-state actions
    SteadyState,
    /// Respond with the decline sequence
    Failover,
}

/// Admission as seen by the handlers
enum Admission {
    Allowed,
    Denied,
    /// Timed out or data source failed; nothing cached
    Unavailable,
}

/// Why an admission evaluation produced no decision
enum EvaluationError {
    Unavailable,
    Store(CallError),
}

/// Dispatcher tunables
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub session_ttl: chrono::Duration,
    pub admission_timeout: Duration,
    pub response_budget: Duration,
    pub media: MediaConfig,
}

impl DispatcherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            session_ttl: config.session.ttl(),
            admission_timeout: config.admission.timeout(),
            response_budget: config.webhook.response_budget(),
            media: config.media.clone(),
        }
    }
}

/// Webhook dispatcher
#[derive(Clone)]
pub struct WebhookDispatcher {
    verifier: SignatureVerifier,
    handlers: Arc<EventHandlers>,
}

impl WebhookDispatcher {
    pub fn new(
        verifier: SignatureVerifier,
        store: Arc<dyn CallSessionStore>,
        admission: AdmissionController,
        bridge: Arc<ConversationBridge>,
        finalizer: Arc<PostCallFinalizer>,
        failover: FailoverHandler,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            verifier,
            handlers: Arc::new(EventHandlers {
                store,
                admission,
                bridge,
                finalizer,
                failover,
                settings,
                evaluations: DashMap::new(),
            }),
        }
    }

    /// Verify, parse and handle one webhook
    pub async fn dispatch(&self, request: WebhookRequest) -> DispatchResult {
        metrics::counter!("webhook_requests_total").increment(1);

        let now = chrono::Utc::now().timestamp();
        if let Err(e) = self.verifier.verify(
            &request.body,
            request.signature.as_deref(),
            request.timestamp.as_deref(),
            now,
        ) {
            warn!("Rejecting webhook: {}", e);
            return DispatchResult::Unauthorized(e.to_string());
        }

        let event = match CarrierEvent::parse(&request.body) {
            Ok(event) => event,
            Err(e) => {
                warn!("Rejecting webhook: {}", e);
                return DispatchResult::Malformed(e.to_string());
            }
        };

        let id = event.call_control_id.clone();
        let event_type = event.event_type.clone();
        let handlers = self.handlers.clone();
        let mut task = tokio::spawn(async move { handlers.handle(event).await });

        let joined = tokio::time::timeout(self.handlers.settings.response_budget, &mut task).await;
        let cause = match joined {
            Ok(Ok(Ok(actions))) if !actions.is_empty() => {
                debug!("{} for call {} -> {:?}", event_type, id, actions.kinds());
                return DispatchResult::Actions {
                    actions,
                    fallback: false,
                };
            }
            Ok(Ok(Ok(_))) => {
                error!("{} for call {} produced no actions", event_type, id);
                "empty"
            }
            Ok(Ok(Err(e))) => {
                error!("{} for call {} failed: {}", event_type, id, e);
                e.kind()
            }
            Ok(Err(join_error)) => {
                error!("{} for call {} panicked: {}", event_type, id, join_error);
                "panic"
            }
            Err(_) => {
                error!("{} for call {} exceeded the response budget", event_type, id);
                task.abort();
                "budget_elapsed"
            }
        };

        // The carrier is told to hang up; the call must not keep streaming
        let handlers = self.handlers.clone();
        let abandoned = id.clone();
        tokio::spawn(async move {
            if !task.is_finished() {
                let _ = task.await;
            }
            handlers.abandon(&abandoned).await;
        });

        metrics::counter!("webhook_failover_total", "cause" => cause).increment(1);
        DispatchResult::Actions {
            actions: self.handlers.failover.actions(None),
            fallback: true,
        }
    }
}

/// Per-event handlers; shared by the spawned handling tasks
struct EventHandlers {
    store: Arc<dyn CallSessionStore>,
    admission: AdmissionController,
    bridge: Arc<ConversationBridge>,
    finalizer: Arc<PostCallFinalizer>,
    failover: FailoverHandler,
    settings: DispatcherSettings,
    /// Admission evaluations in flight; concurrent first deliveries share one
    evaluations: DashMap<CallControlId, Arc<OnceCell<AdmissionDecision>>>,
}

impl EventHandlers {
    async fn handle(&self, event: CarrierEvent) -> Result<ActionList> {
        let id = event.call_control_id.clone();
        let outcome = match event.kind {
            None => {
                debug!("Ignoring unknown event type {} for call {}", event.event_type, id);
                WebhookOutcome::SteadyState
            }
            Some(kind @ (CarrierEventKind::Initiated | CarrierEventKind::Ringing)) => {
                self.on_setup(&event, kind).await?
            }
            Some(CarrierEventKind::Answered) => self.on_answered(&event).await?,
            Some(CarrierEventKind::Audio) => self.on_audio(&event).await?,
            Some(kind @ (CarrierEventKind::Hold | CarrierEventKind::Unhold)) => {
                self.on_hold_change(&event, kind).await?
            }
            Some(CarrierEventKind::StreamingFailed) => self.on_streaming_failed(&event).await?,
            Some(CarrierEventKind::Hangup) => self.on_hangup(&event).await?,
        };
        self.resolve(&id, outcome).await
    }

    async fn on_setup(&self, event: &CarrierEvent, kind: CarrierEventKind) -> Result<WebhookOutcome> {
        let session = self.ensure_session(event, kind).await?;
        if let Some(outcome) = self.gate_admission(&session).await? {
            return Ok(outcome);
        }

        if kind == CarrierEventKind::Ringing {
            self.transition(&session.call_control_id, CallState::Ringing, event.sequence)
                .await?;
        }
        Ok(WebhookOutcome::SteadyState)
    }

    async fn on_answered(&self, event: &CarrierEvent) -> Result<WebhookOutcome> {
        let session = self.ensure_session(event, CarrierEventKind::Answered).await?;
        if let Some(outcome) = self.gate_admission(&session).await? {
            return Ok(outcome);
        }

        let id = &session.call_control_id;
        if self.transition(id, CallState::Answered, event.sequence).await?.is_none() {
            return Ok(WebhookOutcome::SteadyState);
        }

        if let Err(e) = self.bridge.start(&session).await {
            error!("Bridge start failed for call {}: {}", id, e);
            metrics::counter!("bridge_failures_total").increment(1);
            self.transition(id, CallState::Failed, None).await?;
            return Ok(WebhookOutcome::Failover);
        }

        if self.transition(id, CallState::Streaming, None).await?.is_none() {
            // Hung up or failed while the pipeline was connecting
            self.bridge.stop(id).await;
            return Ok(WebhookOutcome::SteadyState);
        }

        info!("Call {} streaming", id);
        Ok(WebhookOutcome::Respond(ActionList::new(vec![self.stream_action(id)])))
    }

    async fn on_audio(&self, event: &CarrierEvent) -> Result<WebhookOutcome> {
        let id = &event.call_control_id;
        let Some(session) = self.store.get(id).await? else {
            return Ok(WebhookOutcome::SteadyState);
        };
        if session.state != CallState::Streaming {
            debug!("Dropping audio for call {} in state {}", id, session.state);
            return Ok(WebhookOutcome::Respond(self.steady_state(Some(&session))));
        }

        match event.audio_frame() {
            Ok(frame) => {
                if self.bridge.forward_audio(id, frame).await == ForwardResult::NoBridge {
                    debug!("No bridge for streaming call {}", id);
                }
            }
            Err(e) => warn!("Dropping unreadable audio for call {}: {}", id, e),
        }
        self.touch(id).await;
        Ok(WebhookOutcome::Respond(self.steady_state(Some(&session))))
    }

    async fn on_hold_change(&self, event: &CarrierEvent, kind: CarrierEventKind) -> Result<WebhookOutcome> {
        let id = &event.call_control_id;
        if let Some(target) = kind.target_state() {
            if self.transition(id, target, event.sequence).await?.is_some() {
                info!("Call {} -> {}", id, target);
                self.touch(id).await;
            }
        }
        Ok(WebhookOutcome::SteadyState)
    }

    async fn on_streaming_failed(&self, event: &CarrierEvent) -> Result<WebhookOutcome> {
        let id = &event.call_control_id;
        match self.transition(id, CallState::Failed, event.sequence).await? {
            Some(_) => {
                warn!("Carrier reported streaming failure for call {}", id);
                metrics::counter!("bridge_failures_total").increment(1);
                self.bridge.stop(id).await;
                Ok(WebhookOutcome::Failover)
            }
            None => Ok(WebhookOutcome::SteadyState),
        }
    }

    async fn on_hangup(&self, event: &CarrierEvent) -> Result<WebhookOutcome> {
        self.finalizer
            .on_hangup(&event.call_control_id, event.sequence)
            .await?;
        Ok(WebhookOutcome::Respond(ActionList::new(vec![CarrierAction::Hangup])))
    }

    /// Fetch the session, creating it on the first setup event
    ///
    /// Routing ids come from the event or, failing that, the dialed number.
    async fn ensure_session(&self, event: &CarrierEvent, kind: CarrierEventKind) -> Result<CallSession> {
        let id = &event.call_control_id;
        if let Some(session) = self.store.get(id).await? {
            return Ok(session);
        }

        let to_number = normalize_e164(event.payload.to.as_deref().unwrap_or_default());
        let route = match event.explicit_route() {
            Some(explicit) => Some(NumberRoute {
                business_id: explicit.business_id,
                store_id: explicit.store_id,
                phone_number_id: explicit.phone_number_id,
            }),
            None => {
                let lookup = self.admission.resolve_route(&to_number);
                match tokio::time::timeout(self.settings.admission_timeout, lookup).await {
                    Ok(Ok(route)) => route,
                    Ok(Err(e)) => {
                        warn!("Route lookup failed for call {}: {}", id, e);
                        None
                    }
                    Err(_) => {
                        warn!("Route lookup timed out for call {}", id);
                        None
                    }
                }
            }
        };

        // Events that transition right away must not pre-claim their sequence
        let sequence = match kind.target_state() {
            Some(_) => None,
            None => event.sequence,
        };
        let init = NewCallSession {
            direction: event.direction(),
            from_number: normalize_e164(event.payload.from.as_deref().unwrap_or_default()),
            to_number,
            route,
            sequence,
        };
        let session = self.store.create(id, init).await?;
        info!(
            "Call {} tracked: business={} store={}",
            id, session.business_id, session.store_id
        );
        Ok(session)
    }

    /// Admission gate shared by the setup handlers
    ///
    /// Returns the outcome to respond with when the call must not proceed.
    async fn gate_admission(&self, session: &CallSession) -> Result<Option<WebhookOutcome>> {
        let id = &session.call_control_id;
        match self.admit(session).await? {
            Admission::Allowed => Ok(None),
            Admission::Denied => {
                self.transition(id, CallState::Blocked, None).await?;
                Ok(Some(WebhookOutcome::Failover))
            }
            Admission::Unavailable => {
                self.transition(id, CallState::Failed, None).await?;
                Ok(Some(WebhookOutcome::Failover))
            }
        }
    }

    /// Cached decision, or a fresh one recorded set-if-absent
    async fn admit(&self, session: &CallSession) -> Result<Admission> {
        if let Some(decision) = &session.admission {
            return Ok(admission_of(decision));
        }

        let id = &session.call_control_id;
        let cell = self.evaluations.entry(id.clone()).or_default().clone();
        let evaluated = cell.get_or_try_init(|| self.evaluate(session)).await.cloned();
        self.evaluations.remove_if(id, |_, current| Arc::ptr_eq(current, &cell));

        match evaluated {
            Ok(decision) => Ok(admission_of(&decision)),
            Err(EvaluationError::Unavailable) => Ok(Admission::Unavailable),
            Err(EvaluationError::Store(e)) => Err(e),
        }
    }

    /// Run the admission checks and record the result
    async fn evaluate(&self, session: &CallSession) -> std::result::Result<AdmissionDecision, EvaluationError> {
        let request = AdmissionRequest {
            call_control_id: session.call_control_id.clone(),
            route: session.has_route().then(|| session.route()),
            caller: session.from_number.clone(),
        };
        let decision = match tokio::time::timeout(
            self.settings.admission_timeout,
            self.admission.decide(&request),
        )
        .await
        {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                error!("Admission failed for call {}: {}", session.call_control_id, e);
                return Err(EvaluationError::Unavailable);
            }
            Err(_) => {
                error!("Admission timed out for call {}", session.call_control_id);
                return Err(EvaluationError::Unavailable);
            }
        };

        let cached = self
            .store
            .record_admission(&session.call_control_id, decision)
            .await
            .map_err(EvaluationError::Store)?;
        metrics::counter!("admission_decisions_total", "reason" => cached.reason.as_str()).increment(1);
        Ok(cached)
    }

    /// CAS transition; `None` on conflict (duplicate, stale or illegal)
    async fn transition(
        &self,
        id: &CallControlId,
        target: CallState,
        seq: Option<u64>,
    ) -> Result<Option<CallState>> {
        match self.store.transition(id, target, seq).await {
            Ok(state) => Ok(Some(state)),
            Err(e) if e.is_conflict() => {
                debug!("Dropping transition for call {}: {}", id, e);
                Ok(None)
            }
            Err(CallError::NotFound(_)) => {
                debug!("Transition to {} for unknown call {}", target, id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Fail the call and stop its bridge after a catch-all decline
    async fn abandon(&self, id: &CallControlId) {
        self.evaluations.remove(id);
        match self.store.transition(id, CallState::Failed, None).await {
            Ok(_) => warn!("Call {} marked FAILED after fallback", id),
            Err(e) if e.is_conflict() => debug!("Call {} left as is after fallback: {}", id, e),
            Err(CallError::NotFound(_)) => {}
            Err(e) => error!("Failed to mark call {} FAILED after fallback: {}", id, e),
        }
        self.bridge.stop(id).await;
    }

    async fn touch(&self, id: &CallControlId) {
        if let Err(e) = self.store.touch(id).await {
            debug!("TTL refresh failed for call {}: {}", id, e);
        }
    }

    async fn resolve(&self, id: &CallControlId, outcome: WebhookOutcome) -> Result<ActionList> {
        match outcome {
            WebhookOutcome::Respond(actions) => Ok(actions),
            WebhookOutcome::Failover => {
                metrics::counter!("webhook_failover_total", "cause" => "declined").increment(1);
                let session = self.store.get(id).await?;
                Ok(self.failover.for_session(session.as_ref()))
            }
            WebhookOutcome::SteadyState => {
                let session = self.store.get(id).await?;
                Ok(self.steady_state(session.as_ref()))
            }
        }
    }

    /// Response for events that do not change the call
    fn steady_state(&self, session: Option<&CallSession>) -> ActionList {
        let Some(session) = session else {
            return self.failover.actions(None);
        };
        match session.state {
            CallState::Initiated | CallState::Ringing => ActionList::new(vec![CarrierAction::Answer]),
            CallState::Answered | CallState::Streaming | CallState::OnHold => {
                ActionList::new(vec![self.stream_action(&session.call_control_id)])
            }
            CallState::Blocked | CallState::Failed => self.failover.for_session(Some(session)),
            CallState::Completed => ActionList::new(vec![CarrierAction::Hangup]),
        }
    }

    fn stream_action(&self, id: &CallControlId) -> CarrierAction {
        CarrierAction::Stream {
            stream_url: self.settings.media.stream_url(id.as_str()),
            stream_track: self.settings.media.stream_track.clone(),
        }
    }
}

fn admission_of(decision: &AdmissionDecision) -> Admission {
    if decision.allowed {
        Admission::Allowed
    } else {
        Admission::Denied
    }
}
