use serde::{Deserialize, Serialize};

/// Lifecycle of a background fine-tuning job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Training,
    Registering,
    Done,
    Failed,
}

impl JobState {
    pub fn can_transition_to(self, next: Self) -> bool {
        use JobState::{Done, Failed, Queued, Registering, Training};

        matches!(
            (self, next),
            (Queued, Training)
                | (Queued, Failed)
                | (Training, Registering)
                | (Training, Failed)
                | (Registering, Done)
                | (Registering, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Training => "training",
            Self::Registering => "registering",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}
