//! Real-time conversation bridge
//!
//! One task per streaming call relays carrier audio to the speech pipeline
//! in sequence order and pipeline output back to the carrier. Pipeline
//! failures get a scripted apology, one reconnect, then a graceful hangup.

use super::registry::{BridgeHandle, BridgeRegistry, ForwardResult, OutboundMedia};
use super::writer::{SessionWrite, SessionWriter};
use crate::application::retry::RetryPolicy;
use crate::config::BridgeConfig;
use crate::domain::audio::{AudioFrame, AudioStreamState};
use crate::domain::call::{metadata_keys, CallSession, CallSessionStore, CallState};
use crate::domain::pipeline::{
    PipelineConnection, PipelineEvent, PipelineSeed, PromptCache, SpeechPipeline, StorePrompts,
};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::CallControlId;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const APOLOGY: &str = "Sorry, I'm having a little trouble on my end. One moment please.";
const REORDER_TICK: Duration = Duration::from_millis(20);

/// Starts, feeds and stops per-call bridge tasks
pub struct ConversationBridge {
    store: Arc<dyn CallSessionStore>,
    pipeline: Arc<dyn SpeechPipeline>,
    prompts: Arc<dyn PromptCache>,
    registry: BridgeRegistry,
    config: BridgeConfig,
    retry: RetryPolicy,
}

impl ConversationBridge {
    pub fn new(
        store: Arc<dyn CallSessionStore>,
        pipeline: Arc<dyn SpeechPipeline>,
        prompts: Arc<dyn PromptCache>,
        registry: BridgeRegistry,
        config: BridgeConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            pipeline,
            prompts,
            registry,
            config,
            retry,
        }
    }

    pub fn registry(&self) -> &BridgeRegistry {
        &self.registry
    }

    /// Connect the pipeline and spawn the bridge task
    ///
    /// Connection setup is awaited under the connect timeout; an error here
    /// means the call was never bridged. A second start for a live bridge
    /// is a no-op.
    pub async fn start(&self, session: &CallSession) -> Result<()> {
        let id = session.call_control_id.clone();
        if self.registry.contains(&id).await {
            debug!("Bridge already live for call {}", id);
            return Ok(());
        }

        let prompts = self.load_prompts(session).await;
        if let Some(locale) = prompts.locale() {
            if let Err(e) = self.store.set_metadata(&id, metadata_keys::LOCALE, locale).await {
                warn!("Failed to record locale for call {}: {}", id, e);
            }
        }

        let seed = PipelineSeed {
            call_control_id: id.clone(),
            business_id: session.business_id.clone(),
            store_id: session.store_id.clone(),
            caller: session.from_number.clone(),
            prompts,
        };
        let connection = connect(self.pipeline.as_ref(), &seed, self.config.connect_timeout()).await?;

        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_queue.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_queue.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);

        let writer = SessionWriter::spawn(
            self.store.clone(),
            id.clone(),
            self.config.transcript_queue,
            self.retry,
        );
        let bridge_id = Uuid::new_v4();
        let task = BridgeTask {
            call_control_id: id.clone(),
            bridge_id,
            seed,
            store: self.store.clone(),
            pipeline: self.pipeline.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            connection,
            state: AudioStreamState::new(self.config.reorder()),
            inbound: inbound_rx,
            stop: stop_rx,
            outbound: outbound_tx,
            writer,
            retries_left: self.config.max_retries,
            awaiting_reply_since: None,
            paused: false,
        };
        let join = tokio::spawn(task.run());

        let handle = BridgeHandle {
            bridge_id,
            inbound: inbound_tx,
            stop: stop_tx,
            task: join,
            outbound: Some(outbound_rx),
        };
        if let Some(rejected) = self.registry.insert(id.clone(), handle).await {
            // Lost a start race; the winner keeps the call
            let _ = rejected.stop.send(true);
            return Ok(());
        }

        info!("Bridge started for call {}", id);
        Ok(())
    }

    /// Hand a carrier frame to the call's bridge
    pub async fn forward_audio(&self, id: &CallControlId, frame: AudioFrame) -> ForwardResult {
        let result = self.registry.forward(id, frame).await;
        if result == ForwardResult::Full {
            metrics::counter!("audio_frames_dropped_total").increment(1);
        }
        result
    }

    /// Signal stop and wait for the bridge to drain
    pub async fn stop(&self, id: &CallControlId) -> bool {
        self.registry.stop(id, self.config.shutdown_grace()).await
    }

    pub async fn stop_all(&self) {
        self.registry.stop_all(self.config.shutdown_grace()).await;
    }

    /// Prompt lookup never blocks the bridge: misses, errors and slow
    /// lookups all use the fallback prompt
    async fn load_prompts(&self, session: &CallSession) -> StorePrompts {
        let lookup = self.prompts.get_cached_store_ai_prompts(&session.store_id);
        match tokio::time::timeout(self.config.stage_timeout(), lookup).await {
            Ok(Ok(Some(prompts))) => prompts,
            Ok(Ok(None)) => {
                debug!("No cached prompts for store {}, using fallback", session.store_id);
                StorePrompts::fallback()
            }
            Ok(Err(e)) => {
                warn!("Prompt cache error for store {}: {}", session.store_id, e);
                StorePrompts::fallback()
            }
            Err(_) => {
                warn!("Prompt cache lookup timed out for store {}", session.store_id);
                StorePrompts::fallback()
            }
        }
    }
}

async fn connect(
    pipeline: &dyn SpeechPipeline,
    seed: &PipelineSeed,
    timeout: Duration,
) -> Result<PipelineConnection> {
    match tokio::time::timeout(timeout, pipeline.connect(seed)).await {
        Ok(result) => result,
        Err(_) => Err(CallError::PipelineTimeout(format!(
            "connect for call {} exceeded {:?}",
            seed.call_control_id, timeout
        ))),
    }
}

/// Why the run loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Stopped,
    InboundClosed,
    CallEnded,
    Failed,
}

/// State owned by one bridge task
struct BridgeTask {
    call_control_id: CallControlId,
    bridge_id: Uuid,
    seed: PipelineSeed,
    store: Arc<dyn CallSessionStore>,
    pipeline: Arc<dyn SpeechPipeline>,
    registry: BridgeRegistry,
    config: BridgeConfig,
    connection: PipelineConnection,
    state: AudioStreamState,
    inbound: mpsc::Receiver<AudioFrame>,
    stop: watch::Receiver<bool>,
    outbound: mpsc::Sender<OutboundMedia>,
    writer: SessionWriter,
    retries_left: u32,
    /// Caller finished speaking at this instant and no reply has started
    awaiting_reply_since: Option<Instant>,
    paused: bool,
}

impl BridgeTask {
    async fn run(mut self) {
        metrics::gauge!("bridges_active").increment(1.0);
        let mut reorder_tick = tokio::time::interval(REORDER_TICK);
        let mut state_poll = tokio::time::interval(self.config.state_poll_interval());

        let exit = loop {
            let step = tokio::select! {
                changed = self.stop.changed() => {
                    // A dropped sender also means stop
                    let _ = changed;
                    Err(StepError::Exit(Exit::Stopped))
                }
                frame = self.inbound.recv() => match frame {
                    Some(frame) => self.on_inbound(frame).await,
                    None => Err(StepError::Exit(Exit::InboundClosed)),
                },
                event = self.connection.events.recv() => match event {
                    Some(event) => self.on_pipeline_event(event).await,
                    None => Err(StepError::Pipeline(CallError::PipelineError(
                        "event stream closed".to_string(),
                    ))),
                },
                _ = reorder_tick.tick() => self.on_tick().await,
                _ = state_poll.tick() => self.poll_state().await,
            };

            if let Err(err) = step {
                if let Some(exit) = self.handle_step_error(err).await {
                    break exit;
                }
            }
        };

        self.shutdown(exit).await;
    }

    async fn handle_step_error(&mut self, err: StepError) -> Option<Exit> {
        match err {
            StepError::Exit(exit) => Some(exit),
            StepError::Pipeline(e) => self.recover(e).await.err(),
        }
    }

    async fn on_inbound(&mut self, frame: AudioFrame) -> StepResult {
        if self.paused {
            debug!("Call {} on hold, dropping frame seq={}", self.call_control_id, frame.seq);
            return Ok(());
        }

        let before = self.dropped_total();
        let released = self.state.inbound.push(frame, Instant::now());
        let dropped = self.dropped_total() - before;
        if dropped > 0 {
            metrics::counter!("audio_frames_dropped_total").increment(dropped);
        }

        for frame in released {
            self.send_to_pipeline(&frame).await?;
        }
        Ok(())
    }

    async fn on_pipeline_event(&mut self, event: PipelineEvent) -> StepResult {
        match event {
            PipelineEvent::SpeechStarted => {
                self.awaiting_reply_since = None;
                if self.state.on_speech_started() {
                    info!("Barge-in on call {}", self.call_control_id);
                    self.emit(OutboundMedia::ClearPlayback);
                    let timeout = self.config.stage_timeout();
                    stage(timeout, "cancel playback", self.connection.sink.cancel_playback()).await?;
                }
            }
            PipelineEvent::SpeechEnded => {
                self.awaiting_reply_since = Some(Instant::now());
            }
            PipelineEvent::Transcript(fragment) => {
                self.writer.push(SessionWrite::Transcript(fragment));
            }
            PipelineEvent::Audio { turn, payload } => {
                if self.state.on_synthesized(turn) {
                    self.awaiting_reply_since = None;
                    self.emit(OutboundMedia::Audio(payload));
                } else {
                    debug!("Discarding audio of cancelled turn {} on call {}", turn, self.call_control_id);
                }
            }
            PipelineEvent::PlaybackFinished => self.state.on_playback_finished(),
            PipelineEvent::Activity {
                activity_type,
                activity_id,
            } => {
                self.writer.metadata(metadata_keys::ACTIVITY_TYPE, activity_type);
                self.writer.metadata(metadata_keys::ACTIVITY_ID, activity_id);
            }
            PipelineEvent::Error(message) => {
                return Err(StepError::Pipeline(CallError::PipelineError(message)));
            }
        }
        Ok(())
    }

    async fn on_tick(&mut self) -> StepResult {
        for frame in self.state.inbound.expire(Instant::now()) {
            self.send_to_pipeline(&frame).await?;
        }

        if let Some(since) = self.awaiting_reply_since {
            if since.elapsed() >= self.config.response_timeout() {
                self.awaiting_reply_since = None;
                return Err(StepError::Pipeline(CallError::PipelineTimeout(
                    "no reply after caller finished speaking".to_string(),
                )));
            }
        }
        Ok(())
    }

    async fn poll_state(&mut self) -> StepResult {
        match self.store.get(&self.call_control_id).await {
            Ok(Some(session)) if session.state.ends_bridge() => {
                info!("Call {} reached {}, stopping bridge", self.call_control_id, session.state);
                Err(StepError::Exit(Exit::CallEnded))
            }
            Ok(Some(session)) => {
                let paused = session.state == CallState::OnHold;
                if paused != self.paused {
                    info!("Bridge for call {} {}", self.call_control_id, if paused { "paused" } else { "resumed" });
                    self.paused = paused;
                }
                Ok(())
            }
            Ok(None) => Err(StepError::Exit(Exit::CallEnded)),
            Err(e) => {
                warn!("State poll failed for call {}: {}", self.call_control_id, e);
                Ok(())
            }
        }
    }

    async fn send_to_pipeline(&mut self, frame: &AudioFrame) -> StepResult {
        let timeout = self.config.stage_timeout();
        stage(timeout, "send audio", self.connection.sink.send_audio(frame)).await?;
        self.state.on_forwarded();
        Ok(())
    }

    /// Apology, then one reconnect; on exhaustion hang up and fail the call
    async fn recover(&mut self, cause: CallError) -> std::result::Result<(), Exit> {
        warn!("Pipeline failure on call {}: {}", self.call_control_id, cause);
        metrics::counter!("bridge_failures_total").increment(1);
        self.emit(OutboundMedia::Speak(APOLOGY.to_string()));

        while self.retries_left > 0 {
            self.retries_left -= 1;
            self.connection.sink.close().await;
            match connect(self.pipeline.as_ref(), &self.seed, self.config.connect_timeout()).await {
                Ok(connection) => {
                    info!("Pipeline reconnected for call {}", self.call_control_id);
                    self.connection = connection;
                    self.awaiting_reply_since = None;
                    return Ok(());
                }
                Err(e) => warn!("Pipeline reconnect failed for call {}: {}", self.call_control_id, e),
            }
        }

        error!("Giving up on call {}, hanging up", self.call_control_id);
        self.emit(OutboundMedia::Hangup);
        match self.store.transition(&self.call_control_id, CallState::Failed, None).await {
            Ok(_) => {}
            Err(e) if e.is_conflict() => debug!("Call {} already left the bridge: {}", self.call_control_id, e),
            Err(e) => error!("Failed to mark call {} FAILED: {}", self.call_control_id, e),
        }
        Err(Exit::Failed)
    }

    fn emit(&self, media: OutboundMedia) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.outbound.try_send(media) {
            warn!("Outbound media queue full for call {}", self.call_control_id);
        }
    }

    fn dropped_total(&self) -> u64 {
        let stats = self.state.inbound.stats();
        stats.frames_late + stats.frames_duplicate
    }

    /// Drain queued input, flush side effects, release the registry entry
    async fn shutdown(mut self, exit: Exit) {
        if exit != Exit::Failed {
            self.inbound.close();
            let before = self.dropped_total();
            let mut ready = Vec::new();
            while let Ok(frame) = self.inbound.try_recv() {
                ready.extend(self.state.inbound.push(frame, Instant::now()));
            }
            ready.extend(self.state.inbound.drain_all());
            let dropped = self.dropped_total() - before;
            if dropped > 0 {
                metrics::counter!("audio_frames_dropped_total").increment(dropped);
            }
            for frame in ready {
                if let Err(e) = self.connection.sink.send_audio(&frame).await {
                    debug!("Dropping trailing frame on call {}: {}", self.call_control_id, e);
                    break;
                }
                self.state.on_forwarded();
            }
        }

        while let Ok(event) = self.connection.events.try_recv() {
            match event {
                PipelineEvent::Transcript(fragment) => {
                    self.writer.push(SessionWrite::Transcript(fragment));
                }
                PipelineEvent::Activity {
                    activity_type,
                    activity_id,
                } => {
                    self.writer.metadata(metadata_keys::ACTIVITY_TYPE, activity_type);
                    self.writer.metadata(metadata_keys::ACTIVITY_ID, activity_id);
                }
                _ => {}
            }
        }
        self.connection.sink.close().await;

        let stats = self.state.inbound.stats();
        self.writer
            .metadata(metadata_keys::FRAMES_FORWARDED, self.state.frames_forwarded().to_string());
        self.writer
            .metadata(metadata_keys::FRAMES_PLAYED, self.state.frames_played().to_string());
        self.writer.metadata(
            metadata_keys::FRAMES_DROPPED,
            (stats.frames_late + stats.frames_duplicate + stats.frames_skipped).to_string(),
        );
        self.writer.flush().await;

        self.registry.release(&self.call_control_id, self.bridge_id).await;
        metrics::gauge!("bridges_active").decrement(1.0);
        info!(
            "Bridge for call {} ended ({:?}): forwarded={} played={} late={} skipped={}",
            self.call_control_id,
            exit,
            self.state.frames_forwarded(),
            self.state.frames_played(),
            stats.frames_late,
            stats.frames_skipped
        );
    }
}

/// Step failure inside the run loop
enum StepError {
    Exit(Exit),
    Pipeline(CallError),
}

impl From<CallError> for StepError {
    fn from(e: CallError) -> Self {
        StepError::Pipeline(e)
    }
}

type StepResult = std::result::Result<(), StepError>;

/// Await one pipeline stage under its timeout
async fn stage<F>(timeout: Duration, what: &str, fut: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CallError::PipelineTimeout(format!("{} exceeded {:?}", what, timeout))),
    }
}
