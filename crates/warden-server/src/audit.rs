use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use warden_contracts::Message;
use warden_kernel::jcs_sha256_hex;

/// Append-only JSONL journal of terminal request outcomes, hash chained so
/// edits and deletions are detectable.
pub struct AuditJournal {
    state: Mutex<JournalState>,
}

struct JournalState {
    file: tokio::fs::File,
    last_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    RejectedBusy,
    RejectedFull,
    PromptTooLong,
    CompletedSuccess,
    CompletedFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Direct,
    Queued,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: String,
    pub ts: String,
    pub peer_id: i64,
    pub author_id: i64,
    pub command: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    pub record_hash: String,
}

impl AuditRecord {
    pub fn new(msg: &Message, command: &str, outcome: Outcome) -> Self {
        Self {
            audit_id: format!("audit_{}", uuid::Uuid::new_v4().as_simple()),
            ts: Utc::now().to_rfc3339(),
            peer_id: msg.peer_id,
            author_id: msg.from_id,
            command: command.to_string(),
            outcome,
            route: None,
            detail: None,
            prev_hash: None,
            record_hash: String::new(),
        }
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.route = Some(route);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    fn seal_hash(&self) -> Result<String, String> {
        let mut seed = self.clone();
        seed.record_hash.clear();
        let value = serde_json::to_value(&seed).map_err(|e| e.to_string())?;
        jcs_sha256_hex(&value)
    }
}

impl AuditJournal {
    pub async fn open(path: &str) -> Result<Self, String> {
        let last_hash = tokio::fs::read_to_string(path)
            .await
            .ok()
            .and_then(|text| {
                text.lines().rev().find_map(|line| {
                    serde_json::from_str::<AuditRecord>(line)
                        .ok()
                        .map(|rec| rec.record_hash)
                })
            });

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| e.to_string())?;

        Ok(Self {
            state: Mutex::new(JournalState { file, last_hash }),
        })
    }

    /// Appends one record. Failures are logged and swallowed; the journal never
    /// changes the outcome it describes.
    pub async fn append(&self, mut rec: AuditRecord) {
        let mut state = self.state.lock().await;
        rec.prev_hash = state.last_hash.clone();
        rec.record_hash = match rec.seal_hash() {
            Ok(v) => v,
            Err(error) => {
                warn!(%error, "audit record hashing failed");
                return;
            }
        };
        let line = match serde_json::to_string(&rec) {
            Ok(v) => v,
            Err(error) => {
                warn!(%error, "audit record serialization failed");
                return;
            }
        };

        let written = async {
            state.file.write_all(line.as_bytes()).await?;
            state.file.write_all(b"\n").await?;
            state.file.flush().await
        }
        .await;
        match written {
            Ok(()) => state.last_hash = Some(rec.record_hash),
            Err(error) => warn!(%error, "audit append failed"),
        }
    }
}

/// Checks every record's hash and its link to the previous one. Returns the
/// number of verified records.
pub fn verify_audit_chain(path: &str) -> Result<usize, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let mut prev: Option<String> = None;
    let mut count = 0usize;

    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let rec: AuditRecord = serde_json::from_str(line)
            .map_err(|e| format!("line {} parse failed: {e}", idx + 1))?;
        if count > 0 && rec.prev_hash != prev {
            return Err(format!(
                "line {} prev_hash mismatch: expected {:?}, got {:?}",
                idx + 1,
                prev,
                rec.prev_hash
            ));
        }
        let expected_hash = rec
            .seal_hash()
            .map_err(|e| format!("line {} hash seed failed: {e}", idx + 1))?;
        if rec.record_hash != expected_hash {
            return Err(format!(
                "line {} record_hash mismatch: expected {}, got {}",
                idx + 1,
                expected_hash,
                rec.record_hash
            ));
        }
        prev = Some(rec.record_hash);
        count += 1;
    }

    Ok(count)
}
