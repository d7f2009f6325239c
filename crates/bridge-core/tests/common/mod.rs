//! In-memory engine doubles shared by the integration tests
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use castbridge_bridge_core::config::{BridgeConfig, EgressConfig, PortConfig};
use castbridge_bridge_core::engine::{
    BridgeEngine, EndpointHandle, EndpointKind, EngineError, EngineEvent, EngineEvents, EngineResult, IngestEngine,
    RtpTarget,
};
use castbridge_bridge_core::{
    BridgeEngines, BridgeManager, EventSink, IceCandidate, PortAllocator, PortCheck, ServerEvent,
};
use castbridge_sdp_core::parse_session_description;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A single-video-track browser offer
pub const BROWSER_OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 102\r\n\
c=IN IP4 0.0.0.0\r\n\
a=rtcp:9 IN IP4 0.0.0.0\r\n\
a=sendonly\r\n\
a=rtpmap:102 H264/90000\r\n\
a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f\r\n";

/// What the ingest engine answers the browser with
pub const INGEST_ANSWER: &str = "v=0\r\n\
o=- 3747185467 3747185467 IN IP4 127.0.0.1\r\n\
s=Ingest\r\n\
c=IN IP4 127.0.0.1\r\n\
t=0 0\r\n\
m=video 1 UDP/TLS/RTP/SAVPF 102\r\n\
a=recvonly\r\n\
a=rtpmap:102 H264/90000\r\n\
a=fmtp:102 packetization-mode=1;profile-level-id=42e01f\r\n\
a=rtcp-fb:102 nack pli\r\n";

/// Cross-engine call log
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Every port is free
pub struct AllPortsFree;

impl PortCheck for AllPortsFree {
    fn is_free(&self, _ip: IpAddr, _port: u16) -> bool {
        true
    }
}

/// Shared bookkeeping of a fake engine
#[derive(Default)]
pub struct Ledger {
    prefix: &'static str,
    next_id: AtomicU32,
    calls: Mutex<Vec<String>>,
    /// Calls of every engine sharing it, in order
    journal: Journal,
    live: Mutex<HashSet<String>>,
    released: Mutex<Vec<String>>,
    subscribers: Mutex<HashMap<String, (EndpointKind, mpsc::Sender<EngineEvent>)>>,
    fail_step: Mutex<Option<String>>,
    unavailable: AtomicBool,
}

impl Ledger {
    fn new(prefix: &'static str, journal: Journal) -> Self {
        Self {
            prefix,
            journal,
            ..Default::default()
        }
    }

    fn record(&self, call: impl Into<String>) {
        let call = call.into();
        self.journal.lock().push(format!("{}: {}", self.prefix, call));
        self.calls.lock().push(call);
    }

    fn check(&self, step: &str) -> EngineResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::unavailable("connection closed"));
        }
        if self.fail_step.lock().as_deref() == Some(step) {
            return Err(EngineError::rejected(format!("{} refused", step)));
        }
        Ok(())
    }

    fn create(&self, step: &str, kind: EndpointKind) -> EngineResult<EndpointHandle> {
        self.check(step)?;
        let id = format!("{}-{}", self.prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.record(format!("{} {}", step, id));
        self.live.lock().insert(id.clone());
        Ok(EndpointHandle::new(id, kind))
    }

    fn subscribe(&self, endpoint: &EndpointHandle) -> EngineResult<EngineEvents> {
        self.check("subscribe")?;
        let (tx, rx) = mpsc::channel(64);
        self.subscribers.lock().insert(endpoint.id.clone(), (endpoint.kind, tx));
        Ok(rx)
    }

    fn release(&self, endpoint: &EndpointHandle) -> EngineResult<()> {
        self.record(format!("release {}", endpoint.id));
        self.released.lock().push(endpoint.id.clone());
        self.check("release")?;
        self.subscribers.lock().remove(&endpoint.id);
        if !self.live.lock().remove(&endpoint.id) {
            return Err(EngineError::failed(format!("{} is not live", endpoint.id)));
        }
        Ok(())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Calls whose name starts with `prefix`
    pub fn calls_starting(&self, prefix: &str) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.starts_with(prefix)).collect()
    }

    pub fn live(&self) -> HashSet<String> {
        self.live.lock().clone()
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().clone()
    }

    pub fn fail_on(&self, step: &str) {
        *self.fail_step.lock() = Some(step.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Push an event from every endpoint of `kind`
    pub fn emit(&self, kind: EndpointKind, event: EngineEvent) {
        let senders: Vec<_> = self
            .subscribers
            .lock()
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, tx)| tx.clone())
            .collect();
        for tx in senders {
            let _ = tx.try_send(event.clone());
        }
    }
}

/// Ingest engine double
pub struct FakeIngest {
    pub ledger: Ledger,
    pub answer: Mutex<String>,
    pub targets: Mutex<Vec<RtpTarget>>,
    pub caps: Mutex<Vec<u64>>,
    /// Local candidates announced after gathering
    pub local_candidates: Vec<IceCandidate>,
}

impl FakeIngest {
    pub fn new(journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            ledger: Ledger::new("ingest", journal),
            answer: Mutex::new(INGEST_ANSWER.to_string()),
            targets: Mutex::new(Vec::new()),
            caps: Mutex::new(Vec::new()),
            local_candidates: vec![IceCandidate::new(
                "candidate:1 1 UDP 2013266431 127.0.0.1 41234 typ host",
            )
            .with_mid("0", 0)],
        })
    }
}

#[async_trait]
impl IngestEngine for FakeIngest {
    fn name(&self) -> &str {
        "fake-ingest"
    }

    async fn check_available(&self) -> EngineResult<()> {
        self.ledger.check("check_available")
    }

    async fn create_pipeline(&self, _session_id: &str) -> EngineResult<EndpointHandle> {
        self.ledger.create("create_pipeline", EndpointKind::Pipeline)
    }

    async fn create_webrtc_endpoint(&self, _pipeline: &EndpointHandle) -> EngineResult<EndpointHandle> {
        self.ledger.create("create_webrtc_endpoint", EndpointKind::WebRtc)
    }

    async fn create_rtp_endpoint(&self, _pipeline: &EndpointHandle) -> EngineResult<EndpointHandle> {
        self.ledger.create("create_rtp_endpoint", EndpointKind::Rtp)
    }

    async fn connect(&self, source: &EndpointHandle, sink: &EndpointHandle) -> EngineResult<()> {
        self.ledger.check("connect")?;
        self.ledger.record(format!("connect {} {}", source.id, sink.id));
        Ok(())
    }

    async fn add_ice_candidate(&self, _endpoint: &EndpointHandle, candidate: &IceCandidate) -> EngineResult<()> {
        self.ledger.check("add_ice_candidate")?;
        self.ledger.record(format!("add_ice_candidate {}", candidate.candidate));
        Ok(())
    }

    async fn process_offer(&self, _endpoint: &EndpointHandle, _offer: &str) -> EngineResult<String> {
        self.ledger.check("process_offer")?;
        self.ledger.record("process_offer");
        Ok(self.answer.lock().clone())
    }

    async fn gather_candidates(&self, _endpoint: &EndpointHandle) -> EngineResult<()> {
        self.ledger.check("gather_candidates")?;
        self.ledger.record("gather_candidates");
        for candidate in &self.local_candidates {
            self.ledger
                .emit(EndpointKind::WebRtc, EngineEvent::IceCandidate(candidate.clone()));
        }
        Ok(())
    }

    async fn set_max_video_send_bandwidth(&self, _endpoint: &EndpointHandle, kbps: u32) -> EngineResult<()> {
        self.ledger.check("set_max_video_send_bandwidth")?;
        self.ledger.record(format!("set_max_video_send_bandwidth {}", kbps));
        Ok(())
    }

    async fn connect_rtp_target(&self, _endpoint: &EndpointHandle, target: &RtpTarget) -> EngineResult<()> {
        self.ledger.check("connect_rtp_target")?;
        self.ledger.record("connect_rtp_target");
        self.targets.lock().push(target.clone());
        Ok(())
    }

    async fn cap_inbound_bandwidth(&self, _endpoint: &EndpointHandle, bitrate_bps: u64) -> EngineResult<()> {
        self.caps.lock().push(bitrate_bps);
        Ok(())
    }

    async fn subscribe(&self, endpoint: &EndpointHandle) -> EngineResult<EngineEvents> {
        self.ledger.subscribe(endpoint)
    }

    async fn release(&self, endpoint: &EndpointHandle) -> EngineResult<()> {
        self.ledger.release(endpoint)
    }
}

/// How the bridge double answers
#[derive(Debug, Clone)]
pub enum AnswerMode {
    /// Accept every offered section on engine ports from 40000 upwards
    Echo,
    /// Reply with fixed text
    Scripted(String),
}

/// Bridge engine double
pub struct FakeBridge {
    pub ledger: Ledger,
    pub answer: Mutex<AnswerMode>,
    pub offers: Mutex<Vec<String>>,
    pub caps: Mutex<Vec<u64>>,
    pub media_flow: bool,
    /// Delay inside `process_offer`
    pub offer_delay: Mutex<Duration>,
}

impl FakeBridge {
    pub fn new(media_flow: bool, journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            ledger: Ledger::new("bridge", journal),
            answer: Mutex::new(AnswerMode::Echo),
            offers: Mutex::new(Vec::new()),
            caps: Mutex::new(Vec::new()),
            media_flow,
            offer_delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn last_offer(&self) -> Option<String> {
        self.offers.lock().last().cloned()
    }
}

/// Answer every section of `offer` with its first payload type
pub fn echo_answer(offer: &str) -> String {
    let mut answer = String::from("v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=bridge\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\n");
    let Ok(description) = parse_session_description(offer) else {
        return answer;
    };
    for (index, media) in description.media.iter().enumerate() {
        let Some(&payload_type) = media.payload_types().first() else {
            continue;
        };
        let port = 40000 + 2 * index as u16;
        answer.push_str(&format!("m={} {} {} {}\r\n", media.media, port, media.protocol, payload_type));
        if let Some(rtpmap) = media.rtpmap(payload_type) {
            let mut encoding = format!("{}/{}", rtpmap.codec, rtpmap.clock_rate);
            if let Some(channels) = rtpmap.channels {
                encoding.push_str(&format!("/{}", channels));
            }
            answer.push_str(&format!("a=rtpmap:{} {}\r\n", payload_type, encoding));
        }
        answer.push_str("a=sendonly\r\n");
    }
    answer
}

#[async_trait]
impl BridgeEngine for FakeBridge {
    fn name(&self) -> &str {
        "fake-bridge"
    }

    async fn check_available(&self) -> EngineResult<()> {
        self.ledger.check("check_available")
    }

    async fn create_endpoint(&self, _session_id: &str) -> EngineResult<EndpointHandle> {
        self.ledger.create("create_endpoint", EndpointKind::Bridge)
    }

    async fn process_offer(&self, _endpoint: &EndpointHandle, offer: &str) -> EngineResult<String> {
        self.ledger.check("process_offer")?;
        self.ledger.record("process_offer");
        self.offers.lock().push(offer.to_string());

        let delay = *self.offer_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mode = self.answer.lock().clone();
        Ok(match mode {
            AnswerMode::Echo => echo_answer(offer),
            AnswerMode::Scripted(text) => text,
        })
    }

    fn reports_media_flow(&self) -> bool {
        self.media_flow
    }

    async fn subscribe(&self, endpoint: &EndpointHandle) -> EngineResult<EngineEvents> {
        self.ledger.subscribe(endpoint)
    }

    async fn cap_inbound_bandwidth(&self, _endpoint: &EndpointHandle, bitrate_bps: u64) -> EngineResult<()> {
        self.caps.lock().push(bitrate_bps);
        Ok(())
    }

    async fn release(&self, endpoint: &EndpointHandle) -> EngineResult<()> {
        self.ledger.release(endpoint)
    }
}

/// Configuration for tests: a small port range and short timeouts
pub fn test_config(egress: Option<EgressConfig>) -> BridgeConfig {
    BridgeConfig {
        ports: PortConfig {
            min_port: 30000,
            max_port: 30011,
            ..PortConfig::default()
        },
        egress,
        fatal_exit_delay_ms: 50,
        ..BridgeConfig::default()
    }
}

/// Egress settings running `script` through `/bin/sh` with the session
/// description path as `$1`
pub fn shell_egress(script: &str, sdp_dir: &std::path::Path) -> EgressConfig {
    EgressConfig {
        program: "/bin/sh".to_string(),
        args: vec![
            "-c".to_string(),
            script.to_string(),
            "egress".to_string(),
            "{sdp}".to_string(),
            "{url}".to_string(),
        ],
        env: BTreeMap::new(),
        target_url: "rtmp://127.0.0.1/live/test".to_string(),
        ready_marker: "Setting pipeline to PLAYING".to_string(),
        settle_delay_ms: 20,
        stop_timeout_ms: 1000,
        sdp_dir: Some(sdp_dir.to_path_buf()),
    }
}

/// A manager over fresh engine doubles
pub struct Harness {
    pub manager: Arc<BridgeManager>,
    pub ingest: Arc<FakeIngest>,
    pub bridge: Arc<FakeBridge>,
    pub journal: Journal,
}

impl Harness {
    pub async fn new(config: BridgeConfig, media_flow: bool) -> Self {
        let journal = Journal::default();
        let ingest = FakeIngest::new(journal.clone());
        let bridge = FakeBridge::new(media_flow, journal.clone());
        let ports = PortAllocator::with_check(&config.ports, Arc::new(AllPortsFree));
        let engines = BridgeEngines::new(ingest.clone(), bridge.clone());
        let manager = BridgeManager::with_ports(config, engines, ports)
            .await
            .expect("manager starts");
        Self {
            manager,
            ingest,
            bridge,
            journal,
        }
    }

    /// Journal entries that release something
    pub fn releases(&self) -> Vec<String> {
        self.journal
            .lock()
            .iter()
            .filter(|entry| entry.contains(": release "))
            .cloned()
            .collect()
    }

    /// Open a session with an event channel
    pub fn connect(&self) -> (String, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx): (EventSink, _) = mpsc::unbounded_channel();
        let id = self.manager.open_session(None, Some(tx)).expect("session opens");
        (id, rx)
    }
}

/// Wait for the first event matching `pred`, skipping others
pub async fn wait_for_event<F>(rx: &mut mpsc::UnboundedReceiver<ServerEvent>, pred: F) -> Option<ServerEvent>
where
    F: Fn(&ServerEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = rx.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Poll `cond` until it holds or two seconds pass
pub async fn eventually<F>(cond: F) -> bool
where
    F: Fn() -> bool,
{
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
