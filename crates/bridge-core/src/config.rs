//! Bridge configuration
//!
//! Loaded from a TOML file layered under `CASTBRIDGE__`-prefixed environment
//! variables, e.g. `CASTBRIDGE__PORTS__MIN_PORT=20000`.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use castbridge_sdp_core::{
    CodecPreference, EngineCodec, EngineFeedback, EngineRtpCapabilities, MediaCapability, TransportProtocol,
    PORTS_PER_BRIDGE,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::{BridgeError, Result};
use crate::logging::{parse_log_level, LoggingConfig};

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "CASTBRIDGE";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub ports: PortConfig,
    pub bridge: BridgeSettings,
    /// Absent disables the egress process
    pub egress: Option<EgressConfig>,
    pub timeouts: TimeoutConfig,
    /// Delay before the process exits once an engine connection is lost
    pub fatal_exit_delay_ms: u64,
    pub logging: LogSettings,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ports: PortConfig::default(),
            bridge: BridgeSettings::default(),
            egress: None,
            timeouts: TimeoutConfig::default(),
            fatal_exit_delay_ms: 3000,
            logging: LogSettings::default(),
        }
    }
}

impl BridgeConfig {
    /// Load `path` and apply environment overrides, then validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: BridgeConfig = config::Config::builder()
            .add_source(config::File::new(&path.to_string_lossy(), config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| BridgeError::configuration(format!("{}: {}", path.display(), e)))?;

        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse TOML text without environment overrides
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: BridgeConfig =
            toml::from_str(text).map_err(|e| BridgeError::configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.ports.validate()?;
        self.bridge.validate()?;
        if let Some(egress) = &self.egress {
            egress.validate()?;
        }
        if self.timeouts.negotiation_step_ms == 0 {
            return Err(BridgeError::configuration("timeouts.negotiation_step_ms must be positive"));
        }
        parse_log_level(&self.logging.level)?;
        Ok(())
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.negotiation_step_ms)
    }

    pub fn fatal_exit_delay(&self) -> Duration {
        Duration::from_millis(self.fatal_exit_delay_ms)
    }
}

/// Port range for engine-B legs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub min_port: u16,
    pub max_port: u16,
    /// Interface port availability is checked on
    pub bind_ip: IpAddr,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            min_port: 10000,
            max_port: 65535,
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

impl PortConfig {
    fn validate(&self) -> Result<()> {
        if self.min_port == 0 || self.min_port > self.max_port {
            return Err(BridgeError::configuration(format!(
                "invalid port range {}-{}",
                self.min_port, self.max_port
            )));
        }
        let span = usize::from(self.max_port - self.min_port) + 1;
        if span < PORTS_PER_BRIDGE {
            return Err(BridgeError::configuration(format!(
                "port range {}-{} cannot hold a single bridge",
                self.min_port, self.max_port
            )));
        }
        Ok(())
    }
}

/// Where the engine-B offer takes its capabilities from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilitySource {
    /// Operator-configured capability list
    Fixed,
    /// Capabilities negotiated with the ingest engine
    Ingest,
}

/// Engine-B leg settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Address written into the engine-B offer
    pub listen_ip: IpAddr,
    pub protocol: TransportProtocol,
    /// Emit `a=direction:active`
    pub comedia: bool,
    pub max_video_send_kbps: u32,
    pub capability_source: CapabilitySource,
    pub fixed_capabilities: EngineRtpCapabilities,
    pub preferred_codecs: Vec<CodecPreference>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            protocol: TransportProtocol::RtpAvpf,
            comedia: true,
            max_video_send_kbps: 2000,
            capability_source: CapabilitySource::Fixed,
            fixed_capabilities: default_fixed_capabilities(),
            preferred_codecs: CodecPreference::defaults(),
        }
    }
}

impl BridgeSettings {
    fn validate(&self) -> Result<()> {
        if self.max_video_send_kbps == 0 {
            return Err(BridgeError::configuration("bridge.max_video_send_kbps must be positive"));
        }
        if self.preferred_codecs.is_empty() {
            return Err(BridgeError::configuration("bridge.preferred_codecs is empty"));
        }
        if self.capability_source == CapabilitySource::Fixed {
            self.fixed_media_capabilities()?;
        }
        Ok(())
    }

    /// Validated records of the configured capability list
    pub fn fixed_media_capabilities(&self) -> Result<Vec<MediaCapability>> {
        self.fixed_capabilities
            .to_media_capabilities()
            .map_err(|e| BridgeError::configuration(format!("bridge.fixed_capabilities: {}", e)))
    }
}

/// Opus and H264 as the bridge engine expects them
pub fn default_fixed_capabilities() -> EngineRtpCapabilities {
    let mut h264_parameters = BTreeMap::new();
    h264_parameters.insert("level-asymmetry-allowed".to_string(), json!(1));
    h264_parameters.insert("packetization-mode".to_string(), json!(1));
    h264_parameters.insert("profile-level-id".to_string(), json!("42001f"));

    let feedback = |kind: &str, parameter: &str| EngineFeedback {
        kind: kind.to_string(),
        parameter: parameter.to_string(),
    };

    EngineRtpCapabilities {
        codecs: vec![
            EngineCodec {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: Some(2),
                preferred_payload_type: 111,
                parameters: BTreeMap::new(),
                rtcp_feedback: Vec::new(),
            },
            EngineCodec {
                mime_type: "video/H264".to_string(),
                clock_rate: 90000,
                channels: None,
                preferred_payload_type: 102,
                parameters: h264_parameters,
                rtcp_feedback: vec![
                    feedback("goog-remb", ""),
                    feedback("ccm", "fir"),
                    feedback("nack", ""),
                    feedback("nack", "pli"),
                ],
            },
        ],
        header_extensions: Vec::new(),
    }
}

/// Egress process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    pub program: String,
    /// `{sdp}` and `{url}` are replaced with the session-description path
    /// and the target URL
    pub args: Vec<String>,
    /// Extra environment, typically log verbosity
    pub env: BTreeMap<String, String>,
    pub target_url: String,
    /// Output line that marks the stream as live
    pub ready_marker: String,
    pub settle_delay_ms: u64,
    pub stop_timeout_ms: u64,
    /// Directory for session-description files, system temp dir if unset
    pub sdp_dir: Option<PathBuf>,
}

impl Default for EgressConfig {
    fn default() -> Self {
        let args = [
            "--eos-on-shutdown",
            "filesrc",
            "location={sdp}",
            "!",
            "sdpdemux",
            "timeout=0",
            "!",
            "rtph264depay",
            "!",
            "h264parse",
            "!",
            "flvmux",
            "streamable=true",
            "!",
            "rtmpsink",
            "location={url}",
        ];
        let mut env = BTreeMap::new();
        env.insert("GST_DEBUG".to_string(), "2".to_string());

        Self {
            program: "gst-launch-1.0".to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env,
            target_url: "rtmp://127.0.0.1/live/stream".to_string(),
            ready_marker: "Setting pipeline to PLAYING".to_string(),
            settle_delay_ms: 1000,
            stop_timeout_ms: 5000,
            sdp_dir: None,
        }
    }
}

impl EgressConfig {
    fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(BridgeError::configuration("egress.program is empty"));
        }
        if !self.args.iter().any(|a| a.contains("{sdp}")) {
            return Err(BridgeError::configuration(
                "egress.args must reference the session description with {sdp}",
            ));
        }
        if self.target_url.trim().is_empty() {
            return Err(BridgeError::configuration("egress.target_url is empty"));
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Arguments with placeholders filled in
    pub fn render_args(&self, sdp_path: &Path) -> Vec<String> {
        let sdp = sdp_path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{sdp}", &sdp).replace("{url}", &self.target_url))
            .collect()
    }

    pub fn sdp_dir(&self) -> PathBuf {
        self.sdp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Upper bounds on waiting for engines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bound on each engine call during negotiation
    pub negotiation_step_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            negotiation_step_ms: 10_000,
        }
    }
}

/// Logging section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
    pub file_info: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
        }
    }
}

impl LogSettings {
    pub fn to_logging_config(&self) -> Result<LoggingConfig> {
        let mut config = LoggingConfig::new(parse_log_level(&self.level)?, "castbridge");
        if self.json {
            config = config.with_json();
        }
        if self.file_info {
            config = config.with_file_info();
        }
        Ok(config)
    }
}
