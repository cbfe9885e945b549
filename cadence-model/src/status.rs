use std::{fmt, str::FromStr};

use crate::error::ModelError;

/// Campaign status as stored in the `campaign.status` column.
///
/// `Warmup` and `Terminate` are claim markers: a worker has committed to
/// running the start or end transition but has not finished it yet. `Pause`,
/// `Resume` and `Stop` are operator commands written by the admin tooling;
/// `Paused` and `Stopped` are the states this service applies in response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Status {
    Configured,
    Warmup,
    Started,
    Pause,
    Paused,
    Resume,
    Stop,
    Stopped,
    Terminate,
    Ended,
    Suspend,
}

impl Status {
    pub const ALL: [Status; 11] = [
        Status::Configured,
        Status::Warmup,
        Status::Started,
        Status::Pause,
        Status::Paused,
        Status::Resume,
        Status::Stop,
        Status::Stopped,
        Status::Terminate,
        Status::Ended,
        Status::Suspend,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Configured => "configured",
            Status::Warmup => "warmup",
            Status::Started => "started",
            Status::Pause => "pause",
            Status::Paused => "paused",
            Status::Resume => "resume",
            Status::Stop => "stop",
            Status::Stopped => "stopped",
            Status::Terminate => "terminate",
            Status::Ended => "ended",
            Status::Suspend => "suspend",
        }
    }

    /// Statuses whose materialized records are live in the delivery store.
    pub fn is_delivering(self) -> bool {
        matches!(self, Status::Started | Status::Resume)
    }

    /// Transient markers written by the claim passes.
    pub fn is_claim_marker(self) -> bool {
        matches!(self, Status::Warmup | Status::Terminate)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Ended | Status::Stopped)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ModelError::UnknownStatus(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_column_value() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>(), Ok(status));
        }
    }

    #[test]
    fn rejects_unknown_values() {
        assert_eq!(
            "STARTED".parse::<Status>(),
            Err(ModelError::UnknownStatus("STARTED".into()))
        );
    }

    #[test]
    fn only_started_and_resume_deliver() {
        let delivering: Vec<_> = Status::ALL.into_iter().filter(|s| s.is_delivering()).collect();
        assert_eq!(delivering, vec![Status::Started, Status::Resume]);
    }
}
