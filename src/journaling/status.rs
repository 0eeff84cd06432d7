use time::{Duration, OffsetDateTime};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum SaveState {
    NotSaved,
    Saving,
    Saved,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("a save is already in flight")]
    AlreadySaving,
    #[error("no save is in flight")]
    NotSaving,
}

/// Save state of one document.
///
/// `not_saved → saving → {saved | error}`; `saved` and `error` go back to
/// `saving` on the next attempt. Only one save may be in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveStatus {
    state: SaveState,
    last_saved_at: Option<OffsetDateTime>,
    last_error: Option<String>,
    backup_error: Option<String>,
}

impl SaveStatus {
    pub fn initial(last_saved_at: Option<OffsetDateTime>) -> Self {
        let state = if last_saved_at.is_some() {
            SaveState::Saved
        } else {
            SaveState::NotSaved
        };
        Self {
            state,
            last_saved_at,
            last_error: None,
            backup_error: None,
        }
    }

    pub fn state(&self) -> SaveState {
        self.state
    }

    pub fn last_saved_at(&self) -> Option<OffsetDateTime> {
        self.last_saved_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Set when even the local backup of a failed save could not be written.
    pub fn backup_error(&self) -> Option<&str> {
        self.backup_error.as_deref()
    }

    pub fn is_saving(&self) -> bool {
        self.state == SaveState::Saving
    }

    pub fn begin_save(&mut self) -> Result<(), TransitionError> {
        if self.state == SaveState::Saving {
            return Err(TransitionError::AlreadySaving);
        }
        self.state = SaveState::Saving;
        Ok(())
    }

    pub fn mark_saved(&mut self, at: OffsetDateTime) -> Result<(), TransitionError> {
        if self.state != SaveState::Saving {
            return Err(TransitionError::NotSaving);
        }
        self.state = SaveState::Saved;
        self.last_saved_at = Some(at);
        self.last_error = None;
        self.backup_error = None;
        Ok(())
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        if self.state != SaveState::Saving {
            return Err(TransitionError::NotSaving);
        }
        self.state = SaveState::Error;
        self.last_error = Some(message.into());
        self.backup_error = None;
        Ok(())
    }

    pub(crate) fn set_backup_error(&mut self, message: Option<String>) {
        self.backup_error = message;
    }

    pub fn severity(&self) -> Severity {
        match self.state {
            SaveState::Error if self.backup_error.is_some() => Severity::Critical,
            SaveState::Error => Severity::Warning,
            _ => Severity::Info,
        }
    }

    pub fn describe(&self, now: OffsetDateTime) -> String {
        match self.state {
            SaveState::NotSaved => "Not saved yet".to_string(),
            SaveState::Saving => "Saving…".to_string(),
            SaveState::Saved => match self.last_saved_at {
                Some(at) => format!("Saved {}", relative_age(now - at)),
                None => "Saved".to_string(),
            },
            SaveState::Error => {
                let reason = self.last_error.as_deref().unwrap_or("unknown error");
                match &self.backup_error {
                    Some(backup) => format!(
                        "Save failed ({reason}) and the local backup failed too ({backup}). Do not close this window."
                    ),
                    None => format!(
                        "Save failed ({reason}). Your changes are backed up locally; edit or press Ctrl-s to retry."
                    ),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

pub fn relative_age(elapsed: Duration) -> String {
    if elapsed.is_negative() || elapsed < Duration::seconds(45) {
        return "just now".to_string();
    }
    if elapsed < Duration::minutes(90) {
        return format!("{}m ago", elapsed.whole_minutes().max(1));
    }
    if elapsed < Duration::hours(36) {
        return format!("{}h ago", elapsed.whole_hours().max(1));
    }
    format!("{}d ago", elapsed.whole_days().max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use time::macros::datetime;

    #[test]
    fn initial_state_depends_on_known_save() {
        assert_eq!(SaveStatus::initial(None).state(), SaveState::NotSaved);
        let at = datetime!(2024-02-01 10:00 UTC);
        let status = SaveStatus::initial(Some(at));
        assert_eq!(status.state(), SaveState::Saved);
        assert_eq!(status.last_saved_at(), Some(at));
    }

    #[test]
    fn second_begin_is_rejected_while_saving() {
        let mut status = SaveStatus::initial(None);
        status.begin_save().unwrap();
        assert_matches!(status.begin_save(), Err(TransitionError::AlreadySaving));
        assert_eq!(status.state(), SaveState::Saving);
    }

    #[test]
    fn completion_requires_saving_state() {
        let mut status = SaveStatus::initial(None);
        assert_matches!(
            status.mark_saved(datetime!(2024-02-01 10:00 UTC)),
            Err(TransitionError::NotSaving)
        );
        assert_matches!(status.mark_failed("boom"), Err(TransitionError::NotSaving));
    }

    #[test]
    fn error_then_retry_then_saved_clears_error() {
        let mut status = SaveStatus::initial(None);
        status.begin_save().unwrap();
        status.mark_failed("offline").unwrap();
        status.set_backup_error(Some("quota".into()));
        assert_eq!(status.severity(), Severity::Critical);
        status.begin_save().unwrap();
        status.mark_saved(datetime!(2024-02-01 10:00 UTC)).unwrap();
        assert_eq!(status.last_error(), None);
        assert_eq!(status.backup_error(), None);
        assert_eq!(status.severity(), Severity::Info);
    }

    #[test]
    fn describe_mentions_backup_state() {
        let now = datetime!(2024-02-01 10:05 UTC);
        let mut status = SaveStatus::initial(Some(datetime!(2024-02-01 10:00 UTC)));
        insta::assert_snapshot!(status.describe(now), @"Saved 5m ago");
        status.begin_save().unwrap();
        status.mark_failed("offline").unwrap();
        assert!(status.describe(now).contains("backed up locally"));
        status.set_backup_error(Some("local storage is full".into()));
        assert!(status.describe(now).contains("Do not close this window"));
    }

    #[test]
    fn state_names_are_snake_case() {
        assert_eq!(SaveState::NotSaved.to_string(), "not_saved");
        assert_eq!(SaveState::Error.as_ref(), "error");
    }
}
