use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Relationship of an issue author to the repository, as reported by GitHub.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorAssociation {
    Owner,
    Member,
    Collaborator,
    Contributor,
    FirstTimeContributor,
    FirstTimer,
    Mannequin,
    None,
    #[serde(other)]
    Unknown,
}

impl AuthorAssociation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorAssociation::Owner => "OWNER",
            AuthorAssociation::Member => "MEMBER",
            AuthorAssociation::Collaborator => "COLLABORATOR",
            AuthorAssociation::Contributor => "CONTRIBUTOR",
            AuthorAssociation::FirstTimeContributor => "FIRST_TIME_CONTRIBUTOR",
            AuthorAssociation::FirstTimer => "FIRST_TIMER",
            AuthorAssociation::Mannequin => "MANNEQUIN",
            AuthorAssociation::None => "NONE",
            AuthorAssociation::Unknown => "UNKNOWN",
        }
    }

    /// Owners, members and collaborators count as maintainers.
    pub fn is_privileged(&self) -> bool {
        matches!(
            self,
            AuthorAssociation::Owner | AuthorAssociation::Member | AuthorAssociation::Collaborator
        )
    }
}

/// An issue returned by a search, reduced to what filtering and formatting need.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssueCandidate {
    pub title: String,
    pub html_url: String,
    pub labels: Vec<String>,
    pub assignee: Option<String>,
    pub assignees: Vec<String>,
    pub author: String,
    pub author_association: AuthorAssociation,
    /// Owner login of the repository the issue lives in.
    pub organization: String,
}

impl IssueCandidate {
    pub fn is_assigned(&self) -> bool {
        self.assignee.is_some() || !self.assignees.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub since: DateTime<Utc>,
}

impl SearchWindow {
    pub fn ending_at(now: DateTime<Utc>, lookback: Duration) -> Self {
        Self {
            since: now - lookback,
        }
    }

    /// Lower bound in the form the search grammar accepts, e.g. `2024-05-01T10:15:00Z`.
    pub fn since_predicate(&self) -> String {
        self.since.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterDecision {
    pub forward: bool,
    pub is_privileged: bool,
}

impl FilterDecision {
    pub fn skip(is_privileged: bool) -> Self {
        Self {
            forward: false,
            is_privileged,
        }
    }

    pub fn forward(is_privileged: bool) -> Self {
        Self {
            forward: true,
            is_privileged,
        }
    }
}
