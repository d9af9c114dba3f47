use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;

use chrono::Utc;
use crucible_types::{SessionRecord, ToolInvocation};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::classify::ClassifiedResult;

/// Process-wide registry of remote execution sessions. Entries are
/// created on the first recorded execution and never evicted.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionRecord>,
    // Creation order, so reuse always picks the newest session.
    order: Vec<String>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the most recently created session id, or mints a fresh
    /// one when the store is empty. A minted id is not registered until
    /// an execution is recorded against it, so a failed first call
    /// leaves the store empty.
    pub async fn pick_or_create_session(&self) -> String {
        if let Some(latest) = self.inner.read().await.order.last() {
            return latest.clone();
        }
        mint_session_id()
    }

    pub async fn record_execution(&self, session_id: &str, result: &ClassifiedResult) {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        if !inner.sessions.contains_key(session_id) {
            inner.order.push(session_id.to_string());
            inner.sessions.insert(
                session_id.to_string(),
                SessionRecord {
                    created_at: now,
                    last_used: now,
                    execution_count: 0,
                    last_status: result.status,
                    last_return_code: None,
                    last_stdout: String::new(),
                    last_stderr: String::new(),
                },
            );
        }
        if let Some(record) = inner.sessions.get_mut(session_id) {
            record.execution_count += 1;
            record.last_used = now;
            record.last_status = result.status;
            record.last_return_code = result.return_code;
            record.last_stdout = result.stdout.clone();
            record.last_stderr = result.stderr.clone();
        }
    }

    /// Point-in-time copy of every record, safe to serialize into a
    /// response while executions continue.
    pub async fn snapshot(&self) -> HashMap<String, SessionRecord> {
        self.inner.read().await.sessions.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }
}

/// Session ids are 12 hex characters, enough to tell sessions apart in
/// reports without dominating them.
fn mint_session_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..12].to_string()
}

/// Per-request record of which tools ran, surfaced as `tools_used` in
/// chat responses. Execution entries are deduplicated by session id so
/// an agent that runs five snippets in one session reports it once.
#[derive(Default)]
pub struct RequestTracker {
    inner: Mutex<TrackerInner>,
}

#[derive(Default)]
struct TrackerInner {
    tools_used: Vec<ToolInvocation>,
    seen_sessions: HashSet<String>,
}

impl RequestTracker {
    pub fn record(&self, invocation: ToolInvocation) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = &invocation.session_id {
            if !inner.seen_sessions.insert(session.clone()) {
                return;
            }
        }
        inner.tools_used.push(invocation);
    }

    pub fn tools_used(&self) -> Vec<ToolInvocation> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .tools_used
            .clone()
    }
}
