//! Inbound queue payloads.

use std::{fmt, str::FromStr};

use crate::{
    error::ModelError,
    ids::{CampaignId, CreativeId},
};

/// Operator intent carried by a mutation notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum MutationEvent {
    Insert,
    Update,
    Delete,
    Pause,
    Stop,
    Resume,
}

impl MutationEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationEvent::Insert => "insert",
            MutationEvent::Update => "update",
            MutationEvent::Delete => "delete",
            MutationEvent::Pause => "pause",
            MutationEvent::Stop => "stop",
            MutationEvent::Resume => "resume",
        }
    }
}

impl fmt::Display for MutationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationEvent {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(MutationEvent::Insert),
            "update" => Ok(MutationEvent::Update),
            "delete" => Ok(MutationEvent::Delete),
            "pause" => Ok(MutationEvent::Pause),
            "stop" => Ok(MutationEvent::Stop),
            "resume" => Ok(MutationEvent::Resume),
            other => Err(ModelError::UnknownEvent(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CreativeMutation {
    pub id: CreativeId,
    pub org_code: String,
    pub event: MutationEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CampaignMutation {
    pub id: CampaignId,
    pub org_code: String,
    pub event: MutationEvent,
    #[cfg_attr(feature = "serde", serde(default))]
    pub creatives: Vec<CreativeMutation>,
}

/// One message from the mutation queue.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MutationBatch {
    pub time: String,
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub request_id: Option<String>,
    pub campaigns: Vec<CampaignMutation>,
}

/// Externally computed budget verdict for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum BudgetSignal {
    /// Budget fully consumed; the campaign ends.
    Expended,
    /// Budget temporarily short; the campaign pauses.
    Shortage,
}

impl BudgetSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            BudgetSignal::Expended => "expended",
            BudgetSignal::Shortage => "shortage",
        }
    }
}

impl fmt::Display for BudgetSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BudgetControlMessage {
    pub trace_id: String,
    pub time: String,
    pub campaign_id: CampaignId,
    pub event: BudgetSignal,
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;

    #[test]
    fn decodes_mutation_batch_wire_format() {
        let body = r#"{
            "time": "2026-10-19T10:00:00Z",
            "type": "campaign",
            "campaigns": [
                {"id": 7, "org_code": "acme", "event": "pause",
                 "creatives": [{"id": 3, "org_code": "acme", "event": "delete"}]},
                {"id": 8, "org_code": "acme", "event": "update"}
            ]
        }"#;

        let batch: MutationBatch = serde_json::from_str(body).expect("decode");
        assert_eq!(batch.kind, "campaign");
        assert_eq!(batch.campaigns.len(), 2);
        assert_eq!(batch.campaigns[0].event, MutationEvent::Pause);
        assert_eq!(batch.campaigns[0].creatives[0].id, CreativeId(3));
        assert!(batch.campaigns[1].creatives.is_empty());
    }

    #[test]
    fn rejects_unknown_mutation_event() {
        let body = r#"{"time":"t","type":"campaign","campaigns":[{"id":1,"org_code":"o","event":"explode"}]}"#;
        assert!(serde_json::from_str::<MutationBatch>(body).is_err());
    }
}
