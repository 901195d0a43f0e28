//! Session store - one JSON file per session id under the state dir.
//!
//! Files are written through a temp file and renamed, so a crash never
//! leaves a half-written session behind.

use chrono::{DateTime, Utc};
use netpilot_shared::{NetpilotError, Result, SessionState};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Listing entry for `status`
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub id: String,
    pub updated_at: DateTime<Utc>,
    pub turns: usize,
    pub pending: Option<String>,
}

pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id.len() <= 64
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(NetpilotError::Validation(format!("invalid session id '{}'", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    pub fn new_id() -> String {
        format!("s-{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
    }

    pub async fn exists(&self, id: &str) -> bool {
        match self.path_for(id) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Load a session; `None` if it was never saved
    pub async fn load(&self, id: &str) -> Result<Option<SessionState>> {
        let path = self.path_for(id)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let state: SessionState = serde_json::from_str(&content)
            .map_err(|e| NetpilotError::Session(format!("corrupt session file {}: {}", path.display(), e)))?;
        if state.id != id {
            return Err(NetpilotError::Session(format!(
                "session file {} belongs to '{}'",
                path.display(),
                state.id
            )));
        }
        debug!("Loaded session {} ({} turns)", id, state.history.len());
        Ok(Some(state))
    }

    pub async fn load_or_create(&self, id: &str) -> Result<SessionState> {
        match self.load(id).await? {
            Some(state) => Ok(state),
            None => {
                info!("Starting session {}", id);
                Ok(SessionState::new(id))
            }
        }
    }

    pub async fn save(&self, state: &SessionState) -> Result<()> {
        let path = self.path_for(&state.id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let content = serde_json::to_string_pretty(state)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// All readable sessions, most recently updated first. Corrupt files are skipped.
    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut summaries = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(summaries),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            match self.load(&id).await {
                Ok(Some(state)) => summaries.push(SessionSummary {
                    id: state.id,
                    updated_at: state.updated_at,
                    turns: state.history.len(),
                    pending: state.pending.map(|p| p.id),
                }),
                Ok(None) => {}
                Err(e) => debug!("Skipping {}: {}", path.display(), e),
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpilot_shared::Speaker;

    #[tokio::test]
    async fn test_round_trip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));
        assert!(store.list().await.unwrap().is_empty());

        let mut state = store.load_or_create("s-1").await.unwrap();
        state.push(Speaker::Operator, "show bgp peers on R1");
        store.save(&state).await.unwrap();

        let loaded = store.load("s-1").await.unwrap().unwrap();
        assert_eq!(loaded, state);
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].turns, 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_session_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        assert!(matches!(store.load("broken").await, Err(NetpilotError::Session(_))));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let store = SessionStore::new(PathBuf::from("/tmp/x"));
        assert!(store.path_for("../etc/passwd").is_err());
        assert!(store.path_for("").is_err());
        assert!(store.path_for(&SessionStore::new_id()).is_ok());
    }
}
