//! Bridge lifecycle manager
//!
//! Drives each session through
//! `IDLE -> NEGOTIATING_A -> BRIDGED_A -> NEGOTIATING_B -> ACTIVE` and tears
//! it down through `CLOSING -> CLOSED`. Steps of one session run under that
//! session's lock, so they are strictly ordered; separate sessions proceed
//! in parallel. Engine events are pumped into a single event loop that
//! forwards candidates, relays bandwidth estimates and reacts to media flow,
//! engine errors and egress exits.

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use castbridge_sdp_core::{
    parse_session_description, translate, MediaCapability, MediaKind, NegotiatedAnswer, OfferBuilder,
    PORTS_PER_BRIDGE,
};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::candidates::IceCandidate;
use crate::config::{BridgeConfig, CapabilitySource};
use crate::egress::{EgressExit, EgressProcess};
use crate::engine::{
    BridgeEngine, EndpointHandle, EndpointKind, EngineEvent, EngineEvents, EngineResult, IngestEngine, RtpTarget,
};
use crate::errors::{BridgeError, ErrorScope, Result};
use crate::feedback::{BridgeLeg, IngestLeg, LegId, RelayStats};
use crate::logging::SessionLog;
use crate::ports::PortAllocator;
use crate::registry::{RegistryStats, SessionRegistry};
use crate::sdp_file::SessionDescriptionFile;
use crate::session::{BridgeState, Session, SessionHandle, SessionSnapshot};
use crate::signaling::{EventSink, ServerEvent};

/// The two engine connections shared by all sessions
#[derive(Clone)]
pub struct BridgeEngines {
    pub ingest: Arc<dyn IngestEngine>,
    pub bridge: Arc<dyn BridgeEngine>,
}

impl BridgeEngines {
    pub fn new(ingest: Arc<dyn IngestEngine>, bridge: Arc<dyn BridgeEngine>) -> Self {
        Self { ingest, bridge }
    }
}

/// Event from one session endpoint, tagged for dispatch
#[derive(Debug)]
struct EndpointEvent {
    session_id: String,
    source: EndpointKind,
    event: EngineEvent,
}

/// Debug view returned for `DEBUG` requests
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugReport {
    pub session: SessionSnapshot,
    pub feedback: RelayStats,
}

/// Owns every session and the resources shared between them
pub struct BridgeManager {
    config: BridgeConfig,
    engines: BridgeEngines,
    ports: PortAllocator,
    registry: SessionRegistry,
    events_tx: mpsc::UnboundedSender<EndpointEvent>,
    exits_tx: mpsc::UnboundedSender<EgressExit>,
    fatal_tx: watch::Sender<Option<String>>,
    event_loop: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl BridgeManager {
    /// Validate `config`, verify both engines answer and start the event
    /// loop. Must be called within a Tokio runtime.
    pub async fn new(config: BridgeConfig, engines: BridgeEngines) -> Result<Arc<Self>> {
        Self::with_ports(config.clone(), engines, PortAllocator::new(&config.ports)).await
    }

    /// As [`new`](Self::new) with a caller-supplied allocator
    pub async fn with_ports(config: BridgeConfig, engines: BridgeEngines, ports: PortAllocator) -> Result<Arc<Self>> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        let (fatal_tx, _) = watch::channel(None);

        let manager = Arc::new(Self {
            config,
            engines,
            ports,
            registry: SessionRegistry::new(),
            events_tx,
            exits_tx,
            fatal_tx,
            event_loop: parking_lot::Mutex::new(None),
        });

        manager.check_engines().await?;

        let event_loop = tokio::spawn(run_event_loop(Arc::downgrade(&manager), events_rx, exits_rx));
        *manager.event_loop.lock() = Some(event_loop);

        tracing::info!(
            "Bridge manager ready (ingest: {}, bridge: {}, ports {}-{})",
            manager.engines.ingest.name(),
            manager.engines.bridge.name(),
            manager.config.ports.min_port,
            manager.config.ports.max_port
        );
        Ok(manager)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.get_stats()
    }

    /// Ask both engines whether they are reachable
    pub async fn check_engines(&self) -> Result<()> {
        let ingest = self.engines.ingest.as_ref();
        let bridge = self.engines.bridge.as_ref();
        self.call("-", ingest.name(), "availability check", ingest.check_available())
            .await
            .map_err(|e| as_unavailable(ingest.name(), e))?;
        self.call("-", bridge.name(), "availability check", bridge.check_available())
            .await
            .map_err(|e| as_unavailable(bridge.name(), e))?;
        Ok(())
    }

    /// Register a new session in `IDLE`. A random id is used unless the
    /// transport supplies one.
    pub fn open_session(&self, session_id: Option<String>, sink: Option<EventSink>) -> Result<String> {
        if let Some(reason) = self.fatal_reason() {
            return Err(BridgeError::engine_unavailable("media", reason));
        }
        let id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let handle = Arc::new(SessionHandle::new(Session::new(id.clone()), SessionLog::new(id.clone(), sink)));
        self.registry.register(handle)?;
        tracing::info!("Session {} opened", id);
        Ok(id)
    }

    /// Negotiate the browser leg with the ingest engine. Returns the answer
    /// for the client.
    pub async fn start_presenter(&self, session_id: &str, sdp_offer: &str) -> Result<String> {
        let handle = self.registry.require(session_id)?;
        let result = {
            let mut session = handle.lock().await;
            self.negotiate_ingest(&handle, &mut session, sdp_offer).await
        };
        if let Err(e) = &result {
            self.fail_session(&handle, e).await;
        }
        result
    }

    /// Negotiate the bridge leg and, once media flows, start egress
    pub async fn start_cast(&self, session_id: &str, encrypt: bool) -> Result<()> {
        let handle = self.registry.require(session_id)?;
        let result = {
            let mut session = handle.lock().await;
            self.negotiate_bridge(&handle, &mut session, encrypt).await
        };
        if let Err(e) = &result {
            self.fail_session(&handle, e).await;
        }
        result
    }

    /// Apply a client candidate, or queue it until the browser endpoint
    /// exists
    pub async fn add_ice_candidate(&self, session_id: &str, candidate: IceCandidate) -> Result<()> {
        let handle = self.registry.require(session_id)?;
        let result = {
            let mut session = handle.lock().await;
            handle.ensure_open(&session, "add candidate")?;
            match session.webrtc_endpoint.clone() {
                Some(endpoint) => self.apply_candidate(&handle, &endpoint, &candidate).await,
                None => {
                    session.candidates.push(candidate);
                    handle
                        .log()
                        .debug(format!("Queued candidate ({} pending)", session.candidates.len()));
                    Ok(())
                }
            }
        };
        if let Err(e) = &result {
            self.fail_session(&handle, e).await;
        }
        result
    }

    /// Move a bridged session to `ACTIVE`; called when the bridge engine
    /// reports video flowing. Sessions in any other state are left alone.
    pub async fn mark_active(&self, session_id: &str) -> Result<()> {
        let Some(handle) = self.registry.get(session_id) else {
            tracing::debug!("Media flow for unknown session {}", session_id);
            return Ok(());
        };
        let result = {
            let mut session = handle.lock().await;
            if session.state() != BridgeState::NegotiatingB {
                handle
                    .log()
                    .debug(format!("Media flow in state {}, nothing to activate", session.state()));
                return Ok(());
            }
            self.activate_locked(&handle, &mut session).await
        };
        if let Err(e) = &result {
            self.fail_session(&handle, e).await;
        }
        result
    }

    /// Tear a session down and forget it. Safe to call any number of times.
    pub async fn close_session(&self, session_id: &str, reason: &str) {
        let Some(handle) = self.registry.get(session_id) else {
            tracing::debug!("Close of unknown session {} ignored", session_id);
            return;
        };
        // Raised before waiting for the lock so a running negotiation stops
        // at its next step
        handle.request_close();
        {
            let mut session = handle.lock().await;
            self.teardown(&handle, &mut session, reason).await;
        }
        self.registry.unregister(session_id);
    }

    /// Snapshot of one session for debugging
    pub async fn debug_snapshot(&self, session_id: &str) -> Result<serde_json::Value> {
        let handle = self.registry.require(session_id)?;
        let report = DebugReport {
            session: handle.lock().await.snapshot(),
            feedback: handle.relay().stats(),
        };
        serde_json::to_value(report).map_err(|e| BridgeError::signaling(e.to_string()))
    }

    /// Close every session and stop the event loop
    pub async fn shutdown(&self) {
        let sessions = self.registry.list();
        tracing::info!("Shutting down bridge manager ({} sessions)", sessions.len());
        let closes = sessions
            .iter()
            .map(|session_id| self.close_session(session_id, "shutting down"));
        futures::future::join_all(closes).await;
        if let Some(event_loop) = self.event_loop.lock().take() {
            event_loop.abort();
        }
    }

    /// Receives the reason once an engine connection is lost
    pub fn subscribe_fatal(&self) -> watch::Receiver<Option<String>> {
        self.fatal_tx.subscribe()
    }

    pub fn fatal_reason(&self) -> Option<String> {
        self.fatal_tx.borrow().clone()
    }

    /// Wait for a lost engine connection, give in-flight work
    /// `fatal_exit_delay_ms`, close all sessions and call `exit` with a
    /// failure code so a supervisor can restart the process.
    pub async fn run_fatal_watchdog<F>(self: Arc<Self>, exit: F)
    where
        F: FnOnce(i32) + Send,
    {
        let mut fatal = self.subscribe_fatal();
        let reason = match fatal.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or_default(),
            Err(_) => return,
        };
        let delay = self.config.fatal_exit_delay();
        tracing::error!("Media engine unavailable ({}), exiting in {:?}", reason, delay);
        tokio::time::sleep(delay).await;
        self.shutdown().await;
        exit(1);
    }

    async fn negotiate_ingest(&self, handle: &SessionHandle, session: &mut Session, sdp_offer: &str) -> Result<String> {
        let id = handle.id();
        let log = handle.log();
        let ingest = self.engines.ingest.as_ref();
        let name = ingest.name();

        handle.ensure_open(session, "start presenter")?;
        session.require_state(BridgeState::Idle, "start presenter")?;
        session.transition(BridgeState::NegotiatingA)?;
        log.info("Negotiating presenter session");

        let pipeline = self.call(id, name, "create pipeline", ingest.create_pipeline(id)).await?;
        session.pipeline = Some(pipeline.clone());

        handle.ensure_open(session, "create endpoints")?;
        let webrtc = self
            .call(id, name, "create webrtc endpoint", ingest.create_webrtc_endpoint(&pipeline))
            .await?;
        session.webrtc_endpoint = Some(webrtc.clone());
        let events = self.call(id, name, "subscribe", ingest.subscribe(&webrtc)).await?;
        session.event_tasks.push(self.spawn_pump(handle, webrtc.kind, events));

        let rtp = self
            .call(id, name, "create rtp endpoint", ingest.create_rtp_endpoint(&pipeline))
            .await?;
        session.rtp_endpoint = Some(rtp.clone());
        let events = self.call(id, name, "subscribe", ingest.subscribe(&rtp)).await?;
        session.event_tasks.push(self.spawn_pump(handle, rtp.kind, events));

        handle.ensure_open(session, "connect endpoints")?;
        self.call(id, name, "connect", ingest.connect(&webrtc, &rtp)).await?;

        let queued = session.candidates.drain();
        if !queued.is_empty() {
            log.debug(format!("Applying {} queued candidates", queued.len()));
        }
        for candidate in &queued {
            self.apply_candidate(handle, &webrtc, candidate).await?;
        }

        handle.ensure_open(session, "process offer")?;
        let answer = self.call(id, name, "process offer", ingest.process_offer(&webrtc, sdp_offer)).await?;
        self.call(id, name, "gather candidates", ingest.gather_candidates(&webrtc))
            .await?;

        let capabilities = parse_session_description(&answer).and_then(|d| d.capabilities());
        session.ingest_capabilities = match (self.config.bridge.capability_source, capabilities) {
            (_, Ok(capabilities)) => capabilities,
            (CapabilitySource::Ingest, Err(e)) => return Err(BridgeError::from_sdp(id, e)),
            // The bridge offer is built from configured capabilities and never reads these
            (CapabilitySource::Fixed, Err(e)) => {
                log.warn(format!("Ingest answer capabilities unreadable: {}", e));
                Vec::new()
            }
        };

        session.transition(BridgeState::BridgedA)?;
        log.info("Presenter connected");
        Ok(answer)
    }

    async fn negotiate_bridge(&self, handle: &SessionHandle, session: &mut Session, encrypt: bool) -> Result<()> {
        let id = handle.id();
        let log = handle.log();
        let ingest = &self.engines.ingest;
        let bridge = &self.engines.bridge;
        let settings = &self.config.bridge;

        handle.ensure_open(session, "start cast")?;
        session.require_state(BridgeState::BridgedA, "start cast")?;
        let rtp = session
            .rtp_endpoint
            .clone()
            .ok_or_else(|| BridgeError::invalid_state(id, session.state(), "start cast without rtp endpoint"))?;

        // Allocated before the transition: exhaustion leaves the session in BRIDGED_A
        let block = self.ports.reserve(PORTS_PER_BRIDGE).await?;
        session.port_block = Some(block.clone());
        session.transition(BridgeState::NegotiatingB)?;
        session.encryption = encrypt;
        log.info(format!("Negotiating bridge on ports {}", block));

        let capabilities = self.offer_capabilities(id, session)?;
        session.capabilities = Some(capabilities.clone());

        let offer = OfferBuilder::new(id, settings.listen_ip)
            .protocol(settings.protocol)
            .comedia(settings.comedia)
            .encryption(encrypt)
            .capabilities(capabilities)
            .port_block(block)
            .build()
            .map_err(|e| BridgeError::from_sdp(id, e))?;
        log.debug(format!("Bridge offer:\n{}", offer.sdp));

        self.call(
            id,
            ingest.name(),
            "limit video bandwidth",
            ingest.set_max_video_send_bandwidth(&rtp, settings.max_video_send_kbps),
        )
        .await?;

        handle.ensure_open(session, "create bridge endpoint")?;
        let endpoint = self
            .call(id, bridge.name(), "create endpoint", bridge.create_endpoint(id))
            .await?;
        session.bridge_endpoint = Some(endpoint.clone());
        let events = self.call(id, bridge.name(), "subscribe", bridge.subscribe(&endpoint)).await?;
        session.event_tasks.push(self.spawn_pump(handle, endpoint.kind, events));

        handle.ensure_open(session, "send bridge offer")?;
        let answer_text = self
            .call(id, bridge.name(), "process offer", bridge.process_offer(&endpoint, &offer.sdp))
            .await?;
        let answer = NegotiatedAnswer::from_answer(&answer_text, &offer.kinds()).map_err(|e| BridgeError::from_sdp(id, e))?;
        let sdp = offer.sdp.clone();
        session.bridge_offer = Some(offer);

        handle.ensure_open(session, "connect rtp target")?;
        let target = RtpTarget::from_answer(&answer);
        self.call(id, ingest.name(), "connect rtp target", ingest.connect_rtp_target(&rtp, &target))
            .await?;
        session.bridge_answer = Some(answer);

        handle.relay().attach(LegId::Ingest, Arc::new(IngestLeg::new(ingest.clone(), rtp)));
        handle
            .relay()
            .attach(LegId::Bridge, Arc::new(BridgeLeg::new(bridge.clone(), endpoint)));

        session.sdp_file = Some(SessionDescriptionFile::write(&self.sdp_dir(), id, &sdp)?);
        log.info("Bridge negotiated");

        if !bridge.reports_media_flow() {
            self.activate_locked(handle, session).await?;
        }
        Ok(())
    }

    /// Start egress if configured, enter `ACTIVE` and tell the client
    async fn activate_locked(&self, handle: &SessionHandle, session: &mut Session) -> Result<()> {
        let id = handle.id();
        handle.ensure_open(session, "start egress")?;
        session.require_state(BridgeState::NegotiatingB, "activate bridge")?;

        if let Some(egress) = &self.config.egress {
            let path = session
                .sdp_file
                .as_ref()
                .map(|f| f.path().to_path_buf())
                .ok_or_else(|| BridgeError::egress(id, "no session description file"))?;
            let process = EgressProcess::spawn(egress, id, &path, self.exits_tx.clone())?;
            handle.log().info(format!("Egress started towards {}", process.target_url()));
            session.egress = Some(process);
        }

        session.transition(BridgeState::Active)?;
        handle.log().emit(ServerEvent::CastReady);
        handle.log().info("Cast ready");
        Ok(())
    }

    /// Release everything the session holds, latest resource first. Each
    /// step tolerates failure of the previous one; a closed session is left
    /// as it is.
    async fn teardown(&self, handle: &SessionHandle, session: &mut Session, reason: &str) {
        if session.state() == BridgeState::Closed {
            return;
        }
        if session.state() != BridgeState::Closing {
            if let Err(e) = session.transition(BridgeState::Closing) {
                tracing::warn!("{}", e);
            }
        }
        let id = handle.id();
        let log = handle.log();
        log.info(format!("Closing session: {}", reason));

        for task in session.event_tasks.drain(..) {
            task.abort();
        }
        handle.relay().clear();

        if let Some(egress) = session.egress.take() {
            match egress.stop().await {
                Some(report) if report.is_clean() => log.debug("Egress stopped"),
                Some(report) => log.warn(format!(
                    "Egress stopped with code {:?} signal {:?}",
                    report.code, report.signal
                )),
                None => log.warn("Egress exit not observed"),
            }
        }

        let bridge = self.engines.bridge.as_ref();
        if let Some(endpoint) = session.bridge_endpoint.take() {
            self.release_quietly(id, bridge.name(), &endpoint, bridge.release(&endpoint))
                .await;
        }

        let ingest = self.engines.ingest.as_ref();
        for endpoint in [
            session.rtp_endpoint.take(),
            session.webrtc_endpoint.take(),
            session.pipeline.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.release_quietly(id, ingest.name(), &endpoint, ingest.release(&endpoint))
                .await;
        }

        if let Some(block) = session.port_block.take() {
            self.ports.release(&block);
        }
        if let Some(file) = session.sdp_file.take() {
            if let Err(e) = file.remove() {
                log.warn(format!("Failed to remove session description: {}", e));
            }
        }
        let dropped = session.candidates.drain().len();
        if dropped > 0 {
            log.debug(format!("Dropped {} unapplied candidates", dropped));
        }

        if let Err(e) = session.transition(BridgeState::Closed) {
            tracing::warn!("{}", e);
        }
        tracing::info!("Session {} closed", id);
    }

    async fn release_quietly<F>(&self, session_id: &str, engine: &str, endpoint: &EndpointHandle, release: F)
    where
        F: Future<Output = EngineResult<()>>,
    {
        match self.call(session_id, engine, "release", release).await {
            Ok(()) => tracing::debug!("Session {}: released {}", session_id, endpoint),
            Err(e) => tracing::warn!("Session {}: releasing {} failed: {}", session_id, endpoint, e),
        }
    }

    /// Apply propagation policy to a failed step
    async fn fail_session(&self, handle: &SessionHandle, error: &BridgeError) {
        if handle.is_closing() {
            tracing::debug!("Session {} step abandoned during close: {}", handle.id(), error);
            return;
        }
        handle.log().error(error);
        match error.scope() {
            ErrorScope::Request => {}
            ErrorScope::Session => {
                self.registry.increment_failed();
                self.close_session(handle.id(), "negotiation failed").await;
            }
            ErrorScope::Process => {
                self.registry.increment_failed();
                self.report_fatal(error);
                self.close_session(handle.id(), "media engine unavailable").await;
            }
        }
    }

    fn report_fatal(&self, error: &BridgeError) {
        if self.fatal_tx.borrow().is_none() {
            tracing::error!("Fatal: {}", error);
            self.fatal_tx.send_replace(Some(error.to_string()));
        }
    }

    /// A rejected candidate is logged; others may still connect
    async fn apply_candidate(&self, handle: &SessionHandle, endpoint: &EndpointHandle, candidate: &IceCandidate) -> Result<()> {
        let ingest = self.engines.ingest.as_ref();
        match self
            .call(handle.id(), ingest.name(), "add candidate", ingest.add_ice_candidate(endpoint, candidate))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.scope() == ErrorScope::Process => Err(e),
            Err(e) => {
                handle.log().warn(format!("Candidate rejected: {}", e));
                Ok(())
            }
        }
    }

    fn offer_capabilities(&self, session_id: &str, session: &Session) -> Result<Vec<MediaCapability>> {
        let settings = &self.config.bridge;
        let remote = match settings.capability_source {
            CapabilitySource::Fixed => settings.fixed_media_capabilities()?,
            CapabilitySource::Ingest => session.ingest_capabilities.clone(),
        };
        translate(&remote, &settings.preferred_codecs).map_err(|e| BridgeError::from_sdp(session_id, e))
    }

    fn sdp_dir(&self) -> PathBuf {
        self.config
            .egress
            .as_ref()
            .map(|egress| egress.sdp_dir())
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Bound an engine call by the negotiation timeout
    async fn call<T, F>(&self, session_id: &str, engine: &str, step: &str, call: F) -> Result<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        let timeout = self.config.negotiation_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.into_bridge_error(engine, session_id)),
            Err(_) => Err(BridgeError::negotiation(
                session_id,
                format!("{} engine did not complete {} within {:?}", engine, step, timeout),
            )),
        }
    }

    /// Forward one endpoint's events to the event loop. Bandwidth estimates
    /// are relayed here instead, awaited one at a time so each leg's caps
    /// land in the order the engine reported them.
    fn spawn_pump(&self, handle: &SessionHandle, source: EndpointKind, mut events: EngineEvents) -> JoinHandle<()> {
        let tx = self.events_tx.clone();
        let session_id = handle.id().to_string();
        let relay = handle.relay().clone();
        let leg = LegId::for_endpoint(source);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let EngineEvent::BandwidthEstimate { bitrate_bps } = event {
                    match leg {
                        Some(from) => {
                            relay.on_estimate(from, bitrate_bps).await;
                        }
                        None => tracing::trace!(
                            "Session {}: ignoring {} bps estimate from {:?} endpoint",
                            session_id,
                            bitrate_bps,
                            source
                        ),
                    }
                    continue;
                }
                let forwarded = EndpointEvent {
                    session_id: session_id.clone(),
                    source,
                    event,
                };
                if tx.send(forwarded).is_err() {
                    break;
                }
            }
        })
    }

    fn dispatch(self: &Arc<Self>, event: EndpointEvent) {
        let EndpointEvent {
            session_id,
            source,
            event,
        } = event;
        let Some(handle) = self.registry.get(&session_id) else {
            tracing::trace!("Event for closed session {} dropped", session_id);
            return;
        };

        match event {
            EngineEvent::IceCandidate(candidate) => {
                if source == EndpointKind::WebRtc {
                    handle.log().emit(ServerEvent::IceCandidate { candidate });
                } else {
                    handle
                        .log()
                        .debug(format!("Ignoring candidate from {:?} endpoint: {}", source, candidate.candidate));
                }
            }
            // Relayed by the pump
            EngineEvent::BandwidthEstimate { .. } => {}
            EngineEvent::MediaFlow { kind, flowing } => {
                handle
                    .log()
                    .debug(format!("{:?} endpoint {} media flowing: {}", source, kind, flowing));
                if source == EndpointKind::Bridge && kind == MediaKind::Video && flowing {
                    let manager = self.clone();
                    tokio::spawn(async move {
                        let _ = manager.mark_active(&session_id).await;
                    });
                }
            }
            EngineEvent::Error { reason } => {
                handle.log().error(format!("{:?} endpoint error: {}", source, reason));
                self.registry.increment_failed();
                let manager = self.clone();
                tokio::spawn(async move {
                    manager.close_session(&session_id, "media engine error").await;
                });
            }
            EngineEvent::Disconnected => {
                let engine = if source == EndpointKind::Bridge {
                    self.engines.bridge.name()
                } else {
                    self.engines.ingest.name()
                };
                let error = BridgeError::engine_unavailable(engine, "connection lost");
                let manager = self.clone();
                tokio::spawn(async move {
                    manager.fail_session(&handle, &error).await;
                });
            }
        }
    }

    fn on_egress_exit(self: &Arc<Self>, exit: EgressExit) {
        if exit.report.expected {
            return;
        }
        let Some(handle) = self.registry.get(&exit.session_id) else {
            return;
        };
        let error = BridgeError::egress(
            &exit.session_id,
            format!("exited unexpectedly (code {:?}, signal {:?})", exit.report.code, exit.report.signal),
        );
        let manager = self.clone();
        tokio::spawn(async move {
            manager.fail_session(&handle, &error).await;
        });
    }
}

impl std::fmt::Debug for BridgeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeManager")
            .field("ingest", &self.engines.ingest.name())
            .field("bridge", &self.engines.bridge.name())
            .field("ports", &self.ports)
            .field("sessions", &self.registry.len())
            .finish()
    }
}

fn as_unavailable(engine: &str, error: BridgeError) -> BridgeError {
    match error {
        BridgeError::EngineUnavailable { .. } => error,
        other => BridgeError::engine_unavailable(engine, other.to_string()),
    }
}

async fn run_event_loop(
    manager: Weak<BridgeManager>,
    mut events: mpsc::UnboundedReceiver<EndpointEvent>,
    mut exits: mpsc::UnboundedReceiver<EgressExit>,
) {
    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                let Some(manager) = manager.upgrade() else { break };
                manager.dispatch(event);
            }
            Some(exit) = exits.recv() => {
                let Some(manager) = manager.upgrade() else { break };
                manager.on_egress_exit(exit);
            }
            else => break,
        }
    }
    tracing::debug!("Bridge event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_mapping() {
        let timeout = BridgeError::negotiation("-", "no reply");
        assert!(matches!(
            as_unavailable("ingest", timeout),
            BridgeError::EngineUnavailable { ref engine, .. } if engine == "ingest"
        ));
        let lost = BridgeError::engine_unavailable("bridge", "closed");
        assert!(matches!(
            as_unavailable("ingest", lost),
            BridgeError::EngineUnavailable { ref engine, .. } if engine == "bridge"
        ));
    }
}
