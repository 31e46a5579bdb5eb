//! Relevance scoring.
//!
//! The scorer is an opaque external capability: `score(text)` returns a
//! 0–100 priority and a boolean relevance flag. [`decide`] turns that into
//! an accept/deny decision with the two-tier threshold rule.
//!
//! [`BridgeScorer`] spawns an external scorer process and talks to it over a
//! JSON-lines protocol on stdin/stdout:
//!
//! ```text
//! <- {"type":"ready"}
//! -> {"type":"score","id":"req-1","task":{"text":"...","model":"..."}}
//! <- {"type":"result","id":"req-1","result":{"priority_score":82.0,"is_relevant":true}}
//! <- {"type":"error","id":"req-1","error":"rate limited"}
//! -> {"type":"shutdown"}
//! ```

use std::process::Stdio;

use async_trait::async_trait;
use refscout_shared::{PipelineConfig, RefScoutError, Result, ScorerConfig};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Score and decision rule
// ---------------------------------------------------------------------------

/// Scorer verdict for one page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelevanceScore {
    /// 0–100.
    pub priority_score: f64,
    pub is_relevant: bool,
}

impl RelevanceScore {
    pub fn new(priority_score: f64, is_relevant: bool) -> Self {
        Self {
            priority_score,
            is_relevant,
        }
    }

    /// Conservative verdict used when the scorer is unavailable.
    pub fn fallback(thresholds: &Thresholds) -> Self {
        Self::new(thresholds.min, false)
    }
}

/// Acceptance thresholds; `high_confidence > min`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub high_confidence: f64,
    pub min: f64,
}

impl From<&PipelineConfig> for Thresholds {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            high_confidence: config.high_confidence_threshold,
            min: config.min_threshold,
        }
    }
}

/// Accept a high score outright; accept a passing score only when the
/// relevance flag agrees.
pub fn decide(score: &RelevanceScore, thresholds: &Thresholds) -> bool {
    score.priority_score >= thresholds.high_confidence
        || (score.is_relevant && score.priority_score >= thresholds.min)
}

// ---------------------------------------------------------------------------
// Scorer trait
// ---------------------------------------------------------------------------

/// External relevance scorer.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Score extracted page text. Errors mean the scorer is unavailable.
    async fn score(&self, text: &str) -> Result<RelevanceScore>;

    /// Release any external resources.
    async fn shutdown(&self) {}
}

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ScoreTask<'a> {
    text: &'a str,
    model: &'a str,
}

/// Request message sent to the bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestMessage<'a> {
    Score { id: String, task: ScoreTask<'a> },
    Shutdown,
}

/// Response message received from the bridge.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseMessage {
    Ready,
    Result { id: String, result: RelevanceScore },
    Error {
        #[allow(dead_code)]
        id: String,
        error: String,
    },
}

// ---------------------------------------------------------------------------
// Bridge handle
// ---------------------------------------------------------------------------

/// Handle to the spawned scorer subprocess.
struct BridgeHandle {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    request_counter: u64,
}

impl BridgeHandle {
    async fn spawn(config: &ScorerConfig) -> Result<Self> {
        info!(cmd = %config.bridge_cmd, args = ?config.bridge_args, "spawning scorer bridge");

        let mut child = Command::new(&config.bridge_cmd)
            .args(&config.bridge_args)
            .current_dir(&config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RefScoutError::Scorer(format!(
                    "failed to spawn bridge: {e}. Is `{}` installed?",
                    config.bridge_cmd
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RefScoutError::Scorer("failed to capture bridge stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RefScoutError::Scorer("failed to capture bridge stdout".into()))?;

        let mut handle = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            request_counter: 0,
        };

        tokio::time::timeout(config.timeout(), handle.wait_for_ready())
            .await
            .map_err(|_| RefScoutError::Scorer("bridge did not become ready".into()))??;
        Ok(handle)
    }

    async fn read_message(&mut self) -> Result<ResponseMessage> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| RefScoutError::Scorer(format!("bridge read error: {e}")))?;
        if n == 0 {
            return Err(RefScoutError::Scorer("bridge closed stdout unexpectedly".into()));
        }
        serde_json::from_str(line.trim()).map_err(|e| {
            let end = line.char_indices().nth(200).map_or(line.len(), |(i, _)| i);
            RefScoutError::Scorer(format!("invalid bridge message: {e} (got: {})", &line[..end]))
        })
    }

    async fn write_message(&mut self, msg: &RequestMessage<'_>) -> Result<()> {
        let mut json = serde_json::to_string(msg)
            .map_err(|e| RefScoutError::Scorer(format!("failed to serialize request: {e}")))?;
        json.push('\n');
        self.stdin
            .write_all(json.as_bytes())
            .await
            .map_err(|e| RefScoutError::Scorer(format!("failed to write to bridge stdin: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| RefScoutError::Scorer(format!("failed to flush bridge stdin: {e}")))
    }

    async fn wait_for_ready(&mut self) -> Result<()> {
        match self.read_message().await? {
            ResponseMessage::Ready => {
                info!("scorer bridge is ready");
                Ok(())
            }
            other => Err(RefScoutError::Scorer(format!(
                "expected ready message, got: {other:?}"
            ))),
        }
    }

    /// Send one score request. The outer error is a broken transport, the
    /// inner one a refusal reported by the bridge itself.
    async fn score(&mut self, text: &str, model: &str) -> Result<std::result::Result<RelevanceScore, String>> {
        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);
        self.write_message(&RequestMessage::Score {
            id: id.clone(),
            task: ScoreTask { text, model },
        })
        .await?;

        match self.read_message().await? {
            ResponseMessage::Result { id: resp_id, result } => {
                if resp_id != id {
                    return Err(RefScoutError::Scorer(format!(
                        "response id {resp_id} does not match request {id}"
                    )));
                }
                if !result.priority_score.is_finite() || !(0.0..=100.0).contains(&result.priority_score) {
                    return Err(RefScoutError::Scorer(format!(
                        "priority score {} out of range",
                        result.priority_score
                    )));
                }
                Ok(Ok(result))
            }
            ResponseMessage::Error { id: _, error } => Ok(Err(error)),
            ResponseMessage::Ready => Err(RefScoutError::Scorer(
                "unexpected ready message during scoring".into(),
            )),
        }
    }

    async fn shutdown(mut self) {
        let _ = self.write_message(&RequestMessage::Shutdown).await;
        match tokio::time::timeout(std::time::Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "scorer bridge exited"),
            Ok(Err(e)) => warn!("scorer bridge wait error: {e}"),
            Err(_) => warn!("scorer bridge did not exit, killing it"),
        }
    }
}

// ---------------------------------------------------------------------------
// BridgeScorer
// ---------------------------------------------------------------------------

/// Scorer backed by an external bridge process, spawned on first use and
/// respawned after any transport failure.
pub struct BridgeScorer {
    config: ScorerConfig,
    handle: Mutex<Option<BridgeHandle>>,
}

impl BridgeScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            config,
            handle: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RelevanceScorer for BridgeScorer {
    async fn score(&self, text: &str) -> Result<RelevanceScore> {
        let text = truncate_content(text, self.config.max_chars);
        // The timeout covers waiting for the bridge as well as the reply.
        let deadline = tokio::time::Instant::now() + self.config.timeout();
        let Ok(mut slot) = tokio::time::timeout_at(deadline, self.handle.lock()).await else {
            return Err(RefScoutError::Scorer(format!(
                "bridge busy for {}s",
                self.config.timeout_secs
            )));
        };
        if slot.is_none() {
            *slot = Some(BridgeHandle::spawn(&self.config).await?);
        }
        let handle = slot
            .as_mut()
            .ok_or_else(|| RefScoutError::Scorer("bridge not running".into()))?;

        let reply = tokio::time::timeout_at(deadline, handle.score(&text, &self.config.model)).await;
        match reply {
            Ok(Ok(Ok(score))) => {
                debug!(score = score.priority_score, relevant = score.is_relevant, "scored");
                Ok(score)
            }
            Ok(Ok(Err(refusal))) => Err(RefScoutError::Scorer(refusal)),
            Ok(Err(e)) => {
                *slot = None;
                Err(e)
            }
            Err(_) => {
                *slot = None;
                Err(RefScoutError::Scorer(format!(
                    "no verdict within {}s",
                    self.config.timeout_secs
                )))
            }
        }
    }

    async fn shutdown(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.shutdown().await;
        }
    }
}

/// Truncate text to at most `max_chars` characters.
fn truncate_content(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        None => content.to_string(),
        Some((end, _)) => {
            format!("{}\n\n[... content truncated for scoring ...]", &content[..end])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> Thresholds {
        Thresholds::from(&PipelineConfig::default())
    }

    /// A shell stand-in for the bridge that answers every request with `reply`.
    fn fake_bridge(reply: &str) -> BridgeScorer {
        let script = format!(
            r#"printf '%s\n' '{{"type":"ready"}}'
while IFS= read -r line; do
  case "$line" in
    *'"type":"shutdown"'*) exit 0 ;;
    *) printf '%s\n' '{reply}' ;;
  esac
done"#
        );
        BridgeScorer::new(ScorerConfig {
            bridge_cmd: "sh".into(),
            bridge_args: vec!["-c".into(), script],
            working_dir: ".".into(),
            timeout_secs: 5,
            ..ScorerConfig::default()
        })
    }

    #[test]
    fn decision_table() {
        let t = thresholds();
        assert!(decide(&RelevanceScore::new(85.0, false), &t));
        assert!(decide(&RelevanceScore::new(55.0, true), &t));
        assert!(!decide(&RelevanceScore::new(55.0, false), &t));
        assert!(!decide(&RelevanceScore::new(30.0, true), &t));
    }

    #[test]
    fn decision_boundaries_are_inclusive() {
        let t = thresholds();
        assert!(decide(&RelevanceScore::new(70.0, false), &t));
        assert!(decide(&RelevanceScore::new(50.0, true), &t));
        assert!(!decide(&RelevanceScore::new(69.9, false), &t));
    }

    #[test]
    fn fallback_is_denied() {
        let t = thresholds();
        let fallback = RelevanceScore::fallback(&t);
        assert_eq!(fallback.priority_score, t.min);
        assert!(!fallback.is_relevant);
        assert!(!decide(&fallback, &t));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_content("short text", 100), "short text");
        let long = "é".repeat(200);
        let result = truncate_content(&long, 100);
        assert!(result.starts_with(&"é".repeat(100)));
        assert!(result.contains("truncated"));
    }

    #[test]
    fn request_message_serializes_correctly() {
        let msg = RequestMessage::Score {
            id: "req-1".into(),
            task: ScoreTask {
                text: "tides",
                model: "m",
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"score","id":"req-1","task":{"text":"tides","model":"m"}}"#
        );
        assert_eq!(
            serde_json::to_string(&RequestMessage::Shutdown).unwrap(),
            r#"{"type":"shutdown"}"#
        );
    }

    #[test]
    fn response_message_deserializes() {
        let msg: ResponseMessage = serde_json::from_str(
            r#"{"type":"result","id":"req-1","result":{"priority_score":72.5,"is_relevant":false}}"#,
        )
        .unwrap();
        match msg {
            ResponseMessage::Result { id, result } => {
                assert_eq!(id, "req-1");
                assert_eq!(result, RelevanceScore::new(72.5, false));
            }
            other => panic!("expected Result, got {other:?}"),
        }
        let msg: ResponseMessage =
            serde_json::from_str(r#"{"type":"error","id":"req-2","error":"rate limited"}"#).unwrap();
        assert!(matches!(msg, ResponseMessage::Error { error, .. } if error == "rate limited"));
    }

    #[tokio::test]
    async fn bridge_returns_score() {
        let scorer = fake_bridge(
            r#"{"type":"result","id":"req-1","result":{"priority_score":82.5,"is_relevant":true}}"#,
        );
        let score = scorer.score("Tides are long-period waves.").await.unwrap();
        assert_eq!(score, RelevanceScore::new(82.5, true));
        scorer.shutdown().await;
    }

    #[tokio::test]
    async fn bridge_refusal_is_scorer_error() {
        let scorer = fake_bridge(r#"{"type":"error","id":"req-1","error":"quota exceeded for key"}"#);
        let err = scorer.score("text").await.unwrap_err();
        assert!(matches!(err, RefScoutError::Scorer(ref m) if m.contains("quota")));
    }

    #[tokio::test]
    async fn malformed_reply_is_scorer_error() {
        let scorer = fake_bridge("this is not json at all, not even close");
        let err = scorer.score("text").await.unwrap_err();
        assert!(err.to_string().contains("invalid bridge message"));
    }

    #[tokio::test]
    async fn waiting_for_a_busy_bridge_counts_against_the_timeout() {
        let scorer = BridgeScorer::new(ScorerConfig {
            bridge_cmd: "sh".into(),
            timeout_secs: 1,
            ..ScorerConfig::default()
        });
        let _busy = scorer.handle.lock().await;

        let started = std::time::Instant::now();
        let err = scorer.score("text").await.unwrap_err();
        assert!(matches!(err, RefScoutError::Scorer(ref m) if m.contains("busy")), "{err}");
        assert!(started.elapsed() < std::time::Duration::from_secs(3));
    }

    #[tokio::test]
    async fn missing_bridge_command_is_scorer_error() {
        let scorer = BridgeScorer::new(ScorerConfig {
            bridge_cmd: "refscout-no-such-scorer".into(),
            ..ScorerConfig::default()
        });
        let err = scorer.score("text").await.unwrap_err();
        assert!(matches!(err, RefScoutError::Scorer(_)));
    }
}
