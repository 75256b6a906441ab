use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::util::sanitize_username;

/// Reference to the identity a job adds to the destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdentityRef {
    Id(i64),
    Username(String),
}

impl IdentityRef {
    /// Parse a caller-supplied reference.
    ///
    /// Purely numeric input is a numeric id; anything else is a username with
    /// a leading `@` stripped.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AppError::InvalidJob("empty identity reference".into()));
        }
        if let Ok(id) = raw.parse::<i64>() {
            return Ok(IdentityRef::Id(id));
        }
        let username = sanitize_username(raw);
        if username.is_empty() {
            return Err(AppError::InvalidJob(format!("invalid username: {raw}")));
        }
        Ok(IdentityRef::Username(username.to_string()))
    }
}

impl fmt::Display for IdentityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityRef::Id(id) => write!(f, "{id}"),
            IdentityRef::Username(name) => write!(f, "@{name}"),
        }
    }
}

/// One unit of work: add a single identity to the run's destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub identity: IdentityRef,
    pub display_name: String,
}

impl Job {
    pub fn new(identity: IdentityRef, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let display_name = if display_name.trim().is_empty() {
            identity.to_string()
        } else {
            display_name.trim().to_string()
        };
        Self {
            identity,
            display_name,
        }
    }

    pub fn username(name: impl AsRef<str>) -> Self {
        let name = sanitize_username(name.as_ref()).to_string();
        Self::new(IdentityRef::Username(name), "")
    }

    pub fn id(id: i64) -> Self {
        Self::new(IdentityRef::Id(id), "")
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.display_name = name.trim().to_string();
        }
        self
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name)
    }
}

/// Loosely-typed member record as produced by an enumeration step or an
/// uploaded list.
///
/// A username is preferred over the numeric id when both are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl TryFrom<MemberRecord> for Job {
    type Error = AppError;

    fn try_from(record: MemberRecord) -> Result<Self, Self::Error> {
        let username = record
            .username
            .as_deref()
            .map(sanitize_username)
            .filter(|u| !u.is_empty());

        let identity = match (username, record.id) {
            (Some(username), _) => IdentityRef::Username(username.to_string()),
            (None, Some(id)) => IdentityRef::Id(id),
            (None, None) => {
                return Err(AppError::InvalidJob(
                    "member record has neither username nor id".into(),
                ));
            }
        };

        Ok(Job::new(identity, record.name.unwrap_or_default()))
    }
}

/// Lifecycle of a run as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Processing,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
        }
    }

    /// A new run may be admitted from this state.
    pub fn accepts_new_run(&self) -> bool {
        !matches!(self, RunStatus::Processing)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(RunStatus::Idle),
            "processing" => Ok(RunStatus::Processing),
            "completed" => Ok(RunStatus::Completed),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Per-worker loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    ResolvingTarget,
    Draining,
    CoolingDown,
    Done,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::ResolvingTarget => "resolving_target",
            WorkerState::Draining => "draining",
            WorkerState::CoolingDown => "cooling_down",
            WorkerState::Done => "done",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_parse() {
        assert_eq!(IdentityRef::parse("12345").unwrap(), IdentityRef::Id(12345));
        assert_eq!(
            IdentityRef::parse("@alice").unwrap(),
            IdentityRef::Username("alice".into())
        );
        assert_eq!(
            IdentityRef::parse("  bob ").unwrap(),
            IdentityRef::Username("bob".into())
        );
        assert!(IdentityRef::parse("").is_err());
        assert!(IdentityRef::parse("@").is_err());
    }

    #[test]
    fn test_display_name_falls_back_to_identity() {
        assert_eq!(Job::username("@alice").display_name, "@alice");
        assert_eq!(Job::id(7).display_name, "7");
        assert_eq!(
            Job::id(7).with_display_name("Seven Smith").display_name,
            "Seven Smith"
        );
    }

    #[test]
    fn test_member_record_prefers_username() {
        let job = Job::try_from(MemberRecord {
            id: Some(42),
            username: Some("@carol".into()),
            name: Some("Carol".into()),
        })
        .unwrap();
        assert_eq!(job.identity, IdentityRef::Username("carol".into()));
        assert_eq!(job.display_name, "Carol");

        let job = Job::try_from(MemberRecord {
            id: Some(42),
            username: Some(String::new()),
            name: None,
        })
        .unwrap();
        assert_eq!(job.identity, IdentityRef::Id(42));
    }

    #[test]
    fn test_member_record_without_identity_is_rejected() {
        let err = Job::try_from(MemberRecord::default()).unwrap_err();
        assert!(matches!(err, AppError::InvalidJob(_)));
    }

    #[test]
    fn test_run_status_roundtrip() {
        for status in [RunStatus::Idle, RunStatus::Processing, RunStatus::Completed] {
            let parsed: RunStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!(RunStatus::Idle.accepts_new_run());
        assert!(RunStatus::Completed.accepts_new_run());
        assert!(!RunStatus::Processing.accepts_new_run());
    }
}
