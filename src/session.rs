//! Exam sessions and their registry.
//!
//! A session is `in_progress` until it is completed; completion is terminal.

use crate::error::{LifecycleError, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(SessionStatus::InProgress),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// One candidate sitting one exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub exam_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(exam_id: impl Into<String>, user_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            exam_id: exam_id.into(),
            user_id: user_id.into(),
            started_at,
            status: SessionStatus::InProgress,
            ended_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Move to `completed`. There is no way back.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), LifecycleError> {
        if self.is_completed() {
            return Err(LifecycleError::AlreadyCompleted(self.id.clone()));
        }
        self.status = SessionStatus::Completed;
        self.ended_at = Some(at);
        Ok(())
    }
}

/// Session listing filter. `None` fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionFilter {
    pub exam_id: Option<String>,
    pub status: Option<SessionStatus>,
}

impl SessionFilter {
    pub fn matches(&self, session: &Session) -> bool {
        self.exam_id
            .as_deref()
            .map_or(true, |exam_id| session.exam_id == exam_id)
            && self.status.map_or(true, |status| session.status == status)
    }
}

/// Where a finished session's completion is recorded.
pub trait SessionSubmitter: Send + Sync {
    /// Record that `session_id` ended at `ended_at`. Submitting an already
    /// completed session succeeds, so a retry after a lost response is safe.
    fn submit_completion(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Current status of `session_id`, or `None` if no such session exists.
    fn session_status(&self, session_id: &str) -> Result<Option<SessionStatus>, StoreError>;
}

/// All known sessions, optionally persisted to a JSON file.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    persist_path: Option<PathBuf>,
}

impl SessionRegistry {
    /// An in-memory registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry backed by `path`. Existing sessions are loaded.
    pub fn with_persistence(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut sessions = HashMap::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let stored: Vec<Session> = serde_json::from_str(&content)?;
            sessions.extend(stored.into_iter().map(|s| (s.id.clone(), s)));
            tracing::info!(count = sessions.len(), path = %path.display(), "loaded sessions");
        }
        Ok(Self {
            sessions: RwLock::new(sessions),
            persist_path: Some(path),
        })
    }

    /// Start a new session.
    pub fn create(
        &self,
        exam_id: impl Into<String>,
        user_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        let session = Session::new(exam_id, user_id, now);
        self.insert(session.clone())?;
        tracing::info!(session_id = %session.id, exam_id = %session.exam_id, "session started");
        Ok(session)
    }

    /// Register a session created elsewhere.
    pub fn insert(&self, session: Session) -> Result<(), StoreError> {
        let mut sessions = self.write()?;
        let id = session.id.clone();
        let previous = sessions.insert(id.clone(), session);
        if let Err(e) = self.persist(&sessions) {
            match previous {
                Some(previous) => sessions.insert(id, previous),
                None => sessions.remove(&id),
            };
            return Err(e);
        }
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .ok()
            .and_then(|sessions| sessions.get(session_id).cloned())
    }

    /// Run `f` on a session that is known to be in progress. Completing the
    /// session waits until `f` returns, so work done in `f` never lands on a
    /// completed session.
    pub fn while_in_progress<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&Session) -> R,
    ) -> Result<R, LifecycleError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| LifecycleError::LookupFailed {
                session_id: session_id.to_string(),
                source: StoreError::Unavailable("session registry lock poisoned".to_string()),
            })?;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| LifecycleError::UnknownSession(session_id.to_string()))?;
        if session.is_completed() {
            return Err(LifecycleError::AlreadyCompleted(session_id.to_string()));
        }
        Ok(f(session))
    }

    /// Complete a session. The change is rolled back if it cannot be persisted.
    pub fn complete(&self, session_id: &str, at: DateTime<Utc>) -> Result<Session, LifecycleError> {
        let mut sessions = self.write().map_err(|source| LifecycleError::SubmitFailed {
            session_id: session_id.to_string(),
            source,
        })?;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| LifecycleError::UnknownSession(session_id.to_string()))?;
        let before = session.clone();
        session.complete(at)?;
        let completed = session.clone();

        if let Err(source) = self.persist(&sessions) {
            sessions.insert(session_id.to_string(), before);
            return Err(LifecycleError::SubmitFailed {
                session_id: session_id.to_string(),
                source,
            });
        }
        tracing::info!(session_id, "session completed");
        Ok(completed)
    }

    /// Sessions matching `filter`, newest first.
    pub fn list(&self, filter: &SessionFilter) -> Vec<Session> {
        let Ok(sessions) = self.sessions.read() else {
            return Vec::new();
        };
        let mut list: Vec<Session> = sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        list
    }

    /// Completed sessions of one user, most recently finished first.
    pub fn history(&self, user_id: &str) -> Vec<Session> {
        let Ok(sessions) = self.sessions.read() else {
            return Vec::new();
        };
        let mut list: Vec<Session> = sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_completed())
            .cloned()
            .collect();
        list.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));
        list
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Session>>, StoreError> {
        self.sessions
            .write()
            .map_err(|_| StoreError::Unavailable("session registry lock poisoned".to_string()))
    }

    fn persist(&self, sessions: &HashMap<String, Session>) -> Result<(), StoreError> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut list: Vec<&Session> = sessions.values().collect();
        list.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        let json = serde_json::to_string_pretty(&list)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl SessionSubmitter for SessionRegistry {
    fn submit_completion(&self, session_id: &str, ended_at: DateTime<Utc>) -> Result<(), StoreError> {
        match self.complete(session_id, ended_at) {
            Ok(_) | Err(LifecycleError::AlreadyCompleted(_)) => Ok(()),
            Err(LifecycleError::SubmitFailed { source, .. }) => Err(source),
            Err(other) => Err(StoreError::Unavailable(other.to_string())),
        }
    }

    fn session_status(&self, session_id: &str) -> Result<Option<SessionStatus>, StoreError> {
        Ok(self.get(session_id).map(|session| session.status))
    }
}
