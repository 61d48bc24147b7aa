//! Append-only challenge event ledger.
//!
//! Every state-changing operation writes one row here. Rows are never
//! edited or deleted; they are the record of what happened independent of
//! the mutable entity state, and the read surface reconstructs history
//! from them instead of re-deriving it.
use crate::challenge::TimeStamp;
use crate::error::Error;
use crate::utils;
use chrono::Utc;

/// The fact a ledger row records, one variant per event kind.
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub enum EventPayload {
    /// Classification refused to fund the challenge, or failed outright.
    #[n(0)]
    Rejected {
        #[n(0)]
        reason: String,
    },
    /// The challenge was anchored on-chain and went live.
    #[n(1)]
    ChallengeCreated {
        #[n(0)]
        chain_challenge_id: u64,
    },
    /// A participant's stake was confirmed on-chain.
    #[n(2)]
    ParticipantFunded {
        #[n(0)]
        participant: String,
        #[n(1)]
        amount: u64,
    },
    /// An answer was judged against the commitment.
    #[n(3)]
    AnswerSubmitted {
        #[n(0)]
        participant: String,
        #[n(1)]
        correct: bool,
    },
    /// The chain reported its verification verdict.
    #[n(4)]
    ChallengeVerified {
        #[n(0)]
        correct: bool,
    },
    /// The challenge completed and the reward was released.
    #[n(5)]
    ChallengeCompleted {
        #[n(0)]
        reward: u64,
        #[n(1)]
        winner_count: u64,
    },
    /// One winner's share, one row per winner.
    #[n(6)]
    WinnerFound {
        #[n(0)]
        winner: String,
        #[n(1)]
        reward_share: u64,
    },
}

/// Fieldless mirror of [`EventPayload`], used for filtering and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Rejected,
    ChallengeCreated,
    ParticipantFunded,
    AnswerSubmitted,
    ChallengeVerified,
    ChallengeCompleted,
    WinnerFound,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rejected => "REJECTED",
            Self::ChallengeCreated => "CHALLENGE_CREATED",
            Self::ParticipantFunded => "PARTICIPANT_FUNDED",
            Self::AnswerSubmitted => "ANSWER_SUBMITTED",
            Self::ChallengeVerified => "CHALLENGE_VERIFIED",
            Self::ChallengeCompleted => "CHALLENGE_COMPLETED",
            Self::WinnerFound => "WINNER_FOUND",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REJECTED" => Ok(Self::Rejected),
            "CHALLENGE_CREATED" => Ok(Self::ChallengeCreated),
            "PARTICIPANT_FUNDED" => Ok(Self::ParticipantFunded),
            "ANSWER_SUBMITTED" => Ok(Self::AnswerSubmitted),
            "CHALLENGE_VERIFIED" => Ok(Self::ChallengeVerified),
            "CHALLENGE_COMPLETED" => Ok(Self::ChallengeCompleted),
            "WINNER_FOUND" => Ok(Self::WinnerFound),
            other => Err(Error::Validation(format!("unknown event type {other:?}"))),
        }
    }
}

/// One ledger row. The id is a uuid7 string, so sorting rows by id sorts
/// them by creation time and a prefix scan comes back chronological.
#[derive(Debug, PartialEq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct ChallengeEvent {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub challenge_id: String,
    #[n(2)]
    pub payload: EventPayload,
    /// Provenance of a chain-observed fact.
    #[n(3)]
    pub tx_hash: Option<String>,
    #[n(4)]
    pub block_number: Option<u64>,
    #[n(5)]
    pub recorded_at: TimeStamp<Utc>,
}

impl ChallengeEvent {
    pub fn new(challenge_id: &str, payload: EventPayload) -> Self {
        Self {
            id: utils::new_event_id(),
            challenge_id: challenge_id.to_owned(),
            payload,
            tx_hash: None,
            block_number: None,
            recorded_at: TimeStamp::new(),
        }
    }
    pub fn with_provenance(mut self, tx_hash: &str, block_number: u64) -> Self {
        self.tx_hash = Some(tx_hash.to_owned());
        self.block_number = Some(block_number);
        self
    }
    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::Rejected { .. } => EventKind::Rejected,
            EventPayload::ChallengeCreated { .. } => EventKind::ChallengeCreated,
            EventPayload::ParticipantFunded { .. } => EventKind::ParticipantFunded,
            EventPayload::AnswerSubmitted { .. } => EventKind::AnswerSubmitted,
            EventPayload::ChallengeVerified { .. } => EventKind::ChallengeVerified,
            EventPayload::ChallengeCompleted { .. } => EventKind::ChallengeCompleted,
            EventPayload::WinnerFound { .. } => EventKind::WinnerFound,
        }
    }
    /// Render the payload for polling clients. Consumers treat this as
    /// opaque structured data keyed by the event type.
    pub fn payload_json(&self) -> serde_json::Value {
        match &self.payload {
            EventPayload::Rejected { reason } => serde_json::json!({ "reason": reason }),
            EventPayload::ChallengeCreated { chain_challenge_id } => {
                serde_json::json!({ "chainChallengeId": chain_challenge_id })
            }
            EventPayload::ParticipantFunded {
                participant,
                amount,
            } => serde_json::json!({ "participant": participant, "amount": amount }),
            EventPayload::AnswerSubmitted {
                participant,
                correct,
            } => serde_json::json!({ "participant": participant, "correct": correct }),
            EventPayload::ChallengeVerified { correct } => {
                serde_json::json!({ "correct": correct })
            }
            EventPayload::ChallengeCompleted {
                reward,
                winner_count,
            } => serde_json::json!({ "reward": reward, "winnerCount": winner_count }),
            EventPayload::WinnerFound {
                winner,
                reward_share,
            } => serde_json::json!({ "winner": winner, "rewardShare": reward_share }),
        }
    }
}
