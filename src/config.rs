//! Project configuration.
//!
//! Loaded from `.orc/config.toml`. Every field has a serde default so a
//! partial file (or none at all, via [`OrcConfig::load_or_default`]) yields
//! a working configuration. The phase plan defaults to the standard
//! spec → tdd_write → implement → review workflow with the test-file-only
//! policy attached to the TDD-write phase.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{OrcError, OrcResult};
use crate::policy::PhasePolicy;

/// What drives a phase: the assistant, or a human decision gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    #[default]
    Assistant,
    Human,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseConfig {
    pub name: String,
    #[serde(default)]
    pub kind: PhaseKind,
    /// Iteration cap before the phase fails with MAX_RETRIES_EXCEEDED.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Wall-clock limit per phase before CLAUDE_TIMEOUT.
    #[serde(default = "default_phase_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub policy: PhasePolicy,
}

impl PhaseConfig {
    pub fn assistant(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: PhaseKind::Assistant,
            max_iterations: default_max_iterations(),
            timeout_secs: default_phase_timeout_secs(),
            policy: PhasePolicy::Unrestricted,
        }
    }

    pub fn with_policy(mut self, policy: PhasePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantConfig {
    #[serde(default = "default_assistant_command")]
    pub command: String,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub model: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            command: default_assistant_command(),
            flags: Vec::new(),
            model: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-subscriber fanout buffer capacity.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Buffered rows that trigger an immediate flush.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
    /// Background flush period.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_capacity: default_buffer_capacity(),
            flush_threshold: default_flush_threshold(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrcConfig {
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub events: EventsConfig,
    /// How many tasks may execute in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Minimum silence before a heartbeat event is emitted.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// How long a human gate waits for a decision. Absent means wait
    /// indefinitely.
    #[serde(default)]
    pub decision_timeout_secs: Option<u64>,
    #[serde(default = "default_phases")]
    pub phases: Vec<PhaseConfig>,
}

impl Default for OrcConfig {
    fn default() -> Self {
        Self {
            assistant: AssistantConfig::default(),
            events: EventsConfig::default(),
            concurrency: default_concurrency(),
            heartbeat_secs: default_heartbeat_secs(),
            decision_timeout_secs: None,
            phases: default_phases(),
        }
    }
}

impl OrcConfig {
    /// Load `.orc/config.toml` from a project directory.
    pub fn load(project_dir: &Path) -> OrcResult<Self> {
        let path = project_dir.join(".orc").join("config.toml");
        if !path.exists() {
            return Err(OrcError::config_missing(&path));
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| OrcError::wrap(e, format!("Failed to read {}", path.display())))?;
        let config: OrcConfig = toml::from_str(&content).map_err(|e| {
            OrcError::config_invalid(format!("Invalid config at {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the project config, falling back to defaults when the file
    /// does not exist. Parse errors still fail.
    pub fn load_or_default(project_dir: &Path) -> OrcResult<Self> {
        match Self::load(project_dir) {
            Ok(config) => Ok(config),
            Err(e) if e.is(crate::errors::ErrorCode::ConfigMissing) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    fn validate(&self) -> OrcResult<()> {
        if self.phases.is_empty() {
            return Err(OrcError::config_invalid("Phase plan is empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for phase in &self.phases {
            if !seen.insert(&phase.name) {
                return Err(OrcError::config_invalid(format!(
                    "Duplicate phase name: {}",
                    phase.name
                )));
            }
            if phase.max_iterations == 0 {
                return Err(OrcError::config_invalid(format!(
                    "Phase {} has a zero iteration cap",
                    phase.name
                )));
            }
        }
        Ok(())
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseConfig> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Phase names in plan order.
    pub fn plan(&self) -> Vec<String> {
        self.phases.iter().map(|p| p.name.clone()).collect()
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn decision_timeout(&self) -> Option<Duration> {
        self.decision_timeout_secs.map(Duration::from_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.events.flush_interval_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_iterations() -> u32 {
    3
}

fn default_phase_timeout_secs() -> u64 {
    1800
}

fn default_assistant_command() -> String {
    "claude".to_string()
}

fn default_buffer_capacity() -> usize {
    crate::fanout::DEFAULT_BUFFER_CAPACITY
}

fn default_flush_threshold() -> usize {
    crate::pipeline::DEFAULT_FLUSH_THRESHOLD
}

fn default_flush_interval_secs() -> u64 {
    5
}

fn default_concurrency() -> usize {
    1
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_phases() -> Vec<PhaseConfig> {
    vec![
        PhaseConfig::assistant("spec"),
        PhaseConfig::assistant("tdd_write").with_policy(PhasePolicy::TestsOnly),
        PhaseConfig::assistant("implement"),
        PhaseConfig::assistant("review"),
    ]
}
