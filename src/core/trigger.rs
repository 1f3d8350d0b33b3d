//! Why the matrix is running

use serde::{Deserialize, Serialize};
use std::fmt;

/// The reason for a matrix run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    /// Ordinary commit on a branch
    Commit { branch: Option<String> },
    /// Tagged release commit
    Tag { tag: String },
}

impl Trigger {
    pub fn commit(branch: impl Into<String>) -> Self {
        Trigger::Commit {
            branch: Some(branch.into()),
        }
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Trigger::Tag { tag: tag.into() }
    }

    pub fn is_tag(&self) -> bool {
        matches!(self, Trigger::Tag { .. })
    }

    pub fn tag_name(&self) -> Option<&str> {
        match self {
            Trigger::Tag { tag } => Some(tag),
            Trigger::Commit { .. } => None,
        }
    }

    /// Tag pushes never run the test phase
    pub fn skip_tests(&self) -> bool {
        self.is_tag()
    }

    /// Name checked against the branch filter: the tag for tag pushes
    pub fn ref_name(&self) -> Option<&str> {
        match self {
            Trigger::Commit { branch } => branch.as_deref(),
            Trigger::Tag { tag } => Some(tag),
        }
    }

    /// Build a trigger from explicit overrides, falling back to the CI environment
    pub fn detect(tag: Option<String>, branch: Option<String>) -> Self {
        Self::detect_with(tag, branch, |key| std::env::var(key).ok())
    }

    /// Same as [`Trigger::detect`] with an injectable variable lookup
    pub fn detect_with<F>(tag: Option<String>, branch: Option<String>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let tag = tag.filter(|t| !t.is_empty()).or_else(|| {
            non_empty("TRAVIS_TAG")
                .or_else(|| non_empty("CI_COMMIT_TAG"))
                .or_else(|| {
                    if non_empty("GITHUB_REF_TYPE").as_deref() == Some("tag") {
                        non_empty("GITHUB_REF_NAME")
                    } else {
                        None
                    }
                })
        });

        if let Some(tag) = tag {
            return Trigger::Tag { tag };
        }

        let branch = branch.filter(|b| !b.is_empty()).or_else(|| {
            non_empty("TRAVIS_BRANCH")
                .or_else(|| non_empty("CI_COMMIT_BRANCH"))
                .or_else(|| non_empty("GITHUB_REF_NAME"))
        });

        Trigger::Commit { branch }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Commit { branch: Some(branch) } => write!(f, "commit on {}", branch),
            Trigger::Commit { branch: None } => write!(f, "commit"),
            Trigger::Tag { tag } => write!(f, "tag {}", tag),
        }
    }
}
