//! The assistant seam.
//!
//! The executor drives an opaque external CLI through [`Assistant`]:
//! one invocation per phase iteration, records streamed back over a
//! channel. [`ProcessAssistant`] is the production implementation — it
//! spawns the CLI, writes the prompt to stdin, and parses the
//! stream-JSON lines the CLI emits on stdout. Tests substitute scripted
//! implementations.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::AssistantConfig;
use crate::errors::{OrcError, OrcResult};

/// One phase-iteration request.
#[derive(Debug, Clone)]
pub struct AssistantRequest {
    pub task_id: String,
    pub phase: String,
    pub iteration: u32,
    pub prompt: String,
    pub workdir: PathBuf,
}

/// Token usage reported by the assistant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_creation: u64,
    pub cache_read: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_creation + self.cache_read
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.cache_creation += other.cache_creation;
        self.cache_read += other.cache_read;
    }
}

/// One record produced while the assistant runs.
#[derive(Debug, Clone)]
pub enum AssistantRecord {
    /// A streamed chunk of response text.
    Chunk { text: String },
    /// A tool invocation the assistant is about to make.
    ToolUse { name: String, input: Value },
    /// Cumulative token usage for the invocation so far.
    Usage(TokenUsage),
    /// Something went wrong mid-stream; the invocation may still finish.
    Error { message: String },
    /// Terminal record: the invocation finished.
    Completed {
        result: Option<String>,
        is_error: bool,
        cost_usd: Option<f64>,
    },
}

#[async_trait]
pub trait Assistant: Send + Sync {
    /// Start one invocation. Records arrive on the returned channel; the
    /// channel closing means the invocation ended (a well-behaved
    /// implementation sends [`AssistantRecord::Completed`] first).
    /// Dropping the receiver cancels the invocation.
    async fn invoke(&self, request: AssistantRequest) -> OrcResult<mpsc::Receiver<AssistantRecord>>;
}

// ── Stream-JSON wire format ───────────────────────────────────────────

/// Events in the CLI's stream-json output.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        usage: Option<UsageBlock>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
    },

    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: String,
    },

    #[serde(rename = "user")]
    User {},
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<UsageBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        input: Value,
    },

    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Deserialize, Default)]
struct UsageBlock {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

impl From<UsageBlock> for TokenUsage {
    fn from(u: UsageBlock) -> Self {
        Self {
            input: u.input_tokens,
            output: u.output_tokens,
            cache_creation: u.cache_creation_input_tokens,
            cache_read: u.cache_read_input_tokens,
        }
    }
}

/// Parse one stdout line into records. Lines that are not valid stream
/// JSON are surfaced as chunks so nothing the process prints is lost.
fn parse_line(line: &str) -> Vec<AssistantRecord> {
    match serde_json::from_str::<StreamEvent>(line) {
        Ok(StreamEvent::Assistant { message }) => {
            let mut records = Vec::new();
            for content in message.content {
                match content {
                    ContentBlock::ToolUse { name, input } => {
                        records.push(AssistantRecord::ToolUse { name, input });
                    }
                    ContentBlock::Text { text } => {
                        records.push(AssistantRecord::Chunk { text });
                    }
                }
            }
            if let Some(usage) = message.usage {
                records.push(AssistantRecord::Usage(usage.into()));
            }
            records
        }
        Ok(StreamEvent::Result {
            result,
            is_error,
            usage,
            total_cost_usd,
        }) => {
            let mut records = Vec::new();
            if let Some(usage) = usage {
                records.push(AssistantRecord::Usage(usage.into()));
            }
            records.push(AssistantRecord::Completed {
                result,
                is_error,
                cost_usd: total_cost_usd,
            });
            records
        }
        Ok(StreamEvent::System { .. }) | Ok(StreamEvent::User {}) => Vec::new(),
        Err(_) => vec![AssistantRecord::Chunk {
            text: line.to_string(),
        }],
    }
}

/// Spawns the external CLI per invocation.
pub struct ProcessAssistant {
    config: AssistantConfig,
}

impl ProcessAssistant {
    pub fn new(config: AssistantConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Assistant for ProcessAssistant {
    async fn invoke(&self, request: AssistantRequest) -> OrcResult<mpsc::Receiver<AssistantRecord>> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.flags)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .current_dir(&request.workdir)
            .env("ORC_TASK_ID", &request.task_id)
            // The child dies with us; on cancellation the reader task
            // below kills it explicitly.
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| OrcError::claude_unavailable(&self.config.command).with_cause(e))?;
        debug!(
            task_id = %request.task_id,
            phase = %request.phase,
            iteration = request.iteration,
            pid = child.id().unwrap_or(0),
            "spawned assistant process"
        );

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| OrcError::claude_unavailable(&self.config.command))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OrcError::claude_unavailable(&self.config.command))?;

        let (tx, rx) = mpsc::channel(64);
        let prompt = request.prompt;

        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                warn!(error = %e, "failed to write prompt to assistant stdin");
            }
            drop(stdin);

            let mut lines = BufReader::new(stdout).lines();
            let mut completed = false;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.is_empty() {
                            continue;
                        }
                        for record in parse_line(&line) {
                            completed |= matches!(record, AssistantRecord::Completed { .. });
                            if tx.send(record).await.is_err() {
                                // Receiver dropped: the invocation was
                                // cancelled. Kill the child and stop.
                                let _ = child.start_kill();
                                let _ = child.wait().await;
                                return;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx
                            .send(AssistantRecord::Error {
                                message: format!("failed to read assistant output: {e}"),
                            })
                            .await;
                        break;
                    }
                }
            }

            let status = child.wait().await;
            if !completed {
                let is_error = !status.map(|s| s.success()).unwrap_or(false);
                let _ = tx
                    .send(AssistantRecord::Completed {
                        result: None,
                        is_error,
                        cost_usd: None,
                    })
                    .await;
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_use_blocks() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Write","input":{"file_path":"src/a.rs"}}]}}"#;
        let records = parse_line(line);
        assert_eq!(records.len(), 1);
        match &records[0] {
            AssistantRecord::ToolUse { name, input } => {
                assert_eq!(name, "Write");
                assert_eq!(input["file_path"], "src/a.rs");
            }
            other => panic!("expected ToolUse, got {other:?}"),
        }
    }

    #[test]
    fn parses_text_and_usage() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"thinking"}],"usage":{"input_tokens":10,"output_tokens":5}}}"#;
        let records = parse_line(line);
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[0], AssistantRecord::Chunk { text } if text == "thinking"));
        match &records[1] {
            AssistantRecord::Usage(usage) => {
                assert_eq!(usage.input, 10);
                assert_eq!(usage.output, 5);
                assert_eq!(usage.total(), 15);
            }
            other => panic!("expected Usage, got {other:?}"),
        }
    }

    #[test]
    fn parses_result_record() {
        let line = r#"{"type":"result","subtype":"success","result":"done","is_error":false,"usage":{"input_tokens":100,"output_tokens":50,"cache_read_input_tokens":25},"total_cost_usd":0.042}"#;
        let records = parse_line(line);
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[0], AssistantRecord::Usage(u) if u.cache_read == 25));
        match &records[1] {
            AssistantRecord::Completed {
                result,
                is_error,
                cost_usd,
            } => {
                assert_eq!(result.as_deref(), Some("done"));
                assert!(!is_error);
                assert_eq!(*cost_usd, Some(0.042));
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[test]
    fn system_and_user_events_are_silent() {
        assert!(parse_line(r#"{"type":"system","subtype":"init"}"#).is_empty());
        assert!(parse_line(r#"{"type":"user"}"#).is_empty());
    }

    #[test]
    fn non_json_lines_become_chunks() {
        let records = parse_line("plain stderr-ish noise");
        assert!(matches!(&records[0], AssistantRecord::Chunk { text } if text.contains("noise")));
    }

    #[test]
    fn usage_accumulates() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage {
            input: 10,
            output: 5,
            cache_creation: 1,
            cache_read: 2,
        });
        total.add(&TokenUsage {
            input: 3,
            output: 4,
            cache_creation: 0,
            cache_read: 0,
        });
        assert_eq!(total.input, 13);
        assert_eq!(total.output, 9);
        assert_eq!(total.total(), 25);
    }
}
