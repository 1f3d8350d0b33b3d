//! Release gate - decides which jobs may publish

use crate::core::{ConfigError, Job, Trigger};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Why a job is or is not release-eligible
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReleaseReason {
    Eligible { tag: String },
    NotTagPush,
    NotReleaseChannel {
        channel: String,
        release_channel: String,
    },
    DeployDisabled,
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseReason::Eligible { tag } => write!(f, "eligible for release {}", tag),
            ReleaseReason::NotTagPush => write!(f, "not a tag push"),
            ReleaseReason::NotReleaseChannel {
                channel,
                release_channel,
            } => write!(
                f,
                "channel '{}' is not the release channel '{}'",
                channel, release_channel
            ),
            ReleaseReason::DeployDisabled => write!(f, "deploy disabled for this row"),
        }
    }
}

/// Outcome of the release gate for one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDecision {
    pub eligible: bool,
    pub reason: ReleaseReason,
}

impl ReleaseDecision {
    fn eligible(tag: &str) -> Self {
        Self {
            eligible: true,
            reason: ReleaseReason::Eligible {
                tag: tag.to_string(),
            },
        }
    }

    fn skipped(reason: ReleaseReason) -> Self {
        Self {
            eligible: false,
            reason,
        }
    }

    /// The tag to publish under, if eligible
    pub fn tag(&self) -> Option<&str> {
        match &self.reason {
            ReleaseReason::Eligible { tag } => Some(tag),
            _ => None,
        }
    }
}

/// Decides release eligibility against a single release channel
#[derive(Debug, Clone)]
pub struct ReleaseGate {
    release_channel: String,
}

impl ReleaseGate {
    pub fn new(release_channel: impl Into<String>) -> Self {
        Self {
            release_channel: release_channel.into().trim().to_string(),
        }
    }

    pub fn release_channel(&self) -> &str {
        &self.release_channel
    }

    /// Eligible iff the trigger is a tag push, the job is on the release
    /// channel and the job has not opted out of deploying.
    pub fn decide(&self, job: &Job, trigger: &Trigger) -> ReleaseDecision {
        let Some(tag) = trigger.tag_name() else {
            return ReleaseDecision::skipped(ReleaseReason::NotTagPush);
        };

        if job.channel() != self.release_channel {
            return ReleaseDecision::skipped(ReleaseReason::NotReleaseChannel {
                channel: job.channel().to_string(),
                release_channel: self.release_channel.clone(),
            });
        }

        if !job.deploy {
            return ReleaseDecision::skipped(ReleaseReason::DeployDisabled);
        }

        ReleaseDecision::eligible(tag)
    }

    /// At most one deploying release-channel job per target
    pub fn validate(&self, jobs: &[Job]) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for job in jobs.iter().filter(|j| self.publishes(j)) {
            if !seen.insert(job.target()) {
                return Err(ConfigError::AmbiguousRelease {
                    target: job.target().to_string(),
                });
            }
        }
        Ok(())
    }

    /// One warning per target that would never produce a release artifact
    pub fn coverage_warnings(&self, jobs: &[Job]) -> Vec<String> {
        let mut covered: BTreeMap<&str, bool> = BTreeMap::new();
        for job in jobs {
            let entry = covered.entry(job.target()).or_insert(false);
            *entry |= self.publishes(job);
        }

        covered
            .into_iter()
            .filter(|(_, has_release)| !has_release)
            .map(|(target, _)| {
                format!(
                    "target {} has no deploying job on release channel '{}'",
                    target, self.release_channel
                )
            })
            .collect()
    }

    fn publishes(&self, job: &Job) -> bool {
        job.deploy && job.channel() == self.release_channel
    }
}
