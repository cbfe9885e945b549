use std::fmt;

use chrono::{DateTime, Utc};

use cadence_model::{Campaign, Status};

/// The two scheduled boundaries of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEdge {
    Start,
    End,
}

impl LifecycleEdge {
    pub const ALL: [LifecycleEdge; 2] = [LifecycleEdge::Start, LifecycleEdge::End];

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleEdge::Start => "start",
            LifecycleEdge::End => "end",
        }
    }

    /// The timestamp this edge fires on. Campaigns without an end never end.
    pub fn boundary(self, campaign: &Campaign) -> Option<DateTime<Utc>> {
        match self {
            LifecycleEdge::Start => Some(campaign.start_at),
            LifecycleEdge::End => campaign.end_at,
        }
    }

    /// Statuses a claim flips into the marker.
    pub fn claimable(self) -> &'static [Status] {
        match self {
            LifecycleEdge::Start => &[Status::Configured],
            LifecycleEdge::End => &[Status::Started, Status::Paused],
        }
    }

    /// Transient status written at claim time and required by the
    /// transition itself.
    pub fn marker(self) -> Status {
        match self {
            LifecycleEdge::Start => Status::Warmup,
            LifecycleEdge::End => Status::Terminate,
        }
    }

    /// Status a successful transition leaves behind.
    pub fn target(self) -> Status {
        match self {
            LifecycleEdge::Start => Status::Started,
            LifecycleEdge::End => Status::Ended,
        }
    }

    /// Statuses the imminent pass fetches: claimable rows plus marker rows
    /// whose reservation may need re-arming.
    pub fn imminent_statuses(self) -> Vec<Status> {
        let mut statuses = self.claimable().to_vec();
        statuses.push(self.marker());
        statuses
    }
}

impl fmt::Display for LifecycleEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of the two per-tick passes produced a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimPass {
    /// Boundary inside the coming interval plus margin; rows get reserved.
    Imminent,
    /// Marker rows whose boundary already passed; rows run immediately.
    Recovery,
}

impl ClaimPass {
    pub fn as_str(self) -> &'static str {
        match self {
            ClaimPass::Imminent => "imminent",
            ClaimPass::Recovery => "recovery",
        }
    }
}

impl fmt::Display for ClaimPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
