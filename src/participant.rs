//! Participant stakes and answer submissions.
use crate::challenge::TimeStamp;
use crate::error::Error;
use crate::utils;
use chrono::Utc;

/// Outcome states of a participant's stake. Forward-only: a participant
/// is `Pending` on join, `Staked` once the chain confirms the stake, and
/// ends as `Winner` or `Loser` when the challenge completes.
#[derive(
    minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParticipantStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Staked,
    #[n(2)]
    Winner,
    #[n(3)]
    Loser,
}

impl ParticipantStatus {
    /// Completion may settle a participant whose stake confirmation never
    /// arrived, so `Pending` can settle directly.
    pub fn can_transition(from: Self, to: Self) -> bool {
        use ParticipantStatus::*;
        matches!(
            (from, to),
            (Pending, Staked)
                | (Pending, Winner)
                | (Pending, Loser)
                | (Staked, Winner)
                | (Staked, Loser)
        )
    }
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Winner | Self::Loser)
    }
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Staked => "STAKED",
            Self::Winner => "WINNER",
            Self::Loser => "LOSER",
        }
    }
}

impl std::fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single user's stake on one challenge. Never deleted; at most one per
/// (challenge, identity), enforced by the store's uniqueness reservation.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Participant {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub challenge_id: String,
    /// Normalized identity, the dedup key.
    #[n(2)]
    pub identity: String,
    #[n(3)]
    pub wallet: String,
    #[n(4)]
    pub stake: u64,
    #[n(5)]
    pub joined_at: TimeStamp<Utc>,
    #[n(6)]
    pub status: ParticipantStatus,
    #[n(7)]
    pub stake_tx_hash: Option<String>,
    #[n(8)]
    pub reward_tx_hash: Option<String>,
    /// Share of the reward paid out to a winner.
    #[n(9)]
    pub reward_share: Option<u64>,
}

impl Participant {
    pub fn new(
        challenge_id: &str,
        identity: &str,
        wallet: &str,
        stake: u64,
    ) -> Result<Self, Error> {
        Ok(Self {
            id: utils::new_bech32_id("part_")?,
            challenge_id: challenge_id.to_owned(),
            identity: identity.to_owned(),
            wallet: wallet.to_owned(),
            stake,
            joined_at: TimeStamp::new(),
            status: ParticipantStatus::Pending,
            stake_tx_hash: None,
            reward_tx_hash: None,
            reward_share: None,
        })
    }
    fn transition(&mut self, to: ParticipantStatus) -> Result<(), Error> {
        if !ParticipantStatus::can_transition(self.status, to) {
            return Err(Error::InvalidTransition {
                from: self.status.name(),
                to: to.name(),
            });
        }
        self.status = to;
        Ok(())
    }
    pub fn mark_staked(&mut self, stake_tx_hash: String) -> Result<(), Error> {
        self.transition(ParticipantStatus::Staked)?;
        self.stake_tx_hash = Some(stake_tx_hash);
        Ok(())
    }
    pub fn mark_winner(&mut self, reward_share: u64, reward_tx_hash: String) -> Result<(), Error> {
        self.transition(ParticipantStatus::Winner)?;
        self.reward_share = Some(reward_share);
        self.reward_tx_hash = Some(reward_tx_hash);
        Ok(())
    }
    pub fn mark_loser(&mut self) -> Result<(), Error> {
        self.transition(ParticipantStatus::Loser)
    }
}

/// Verification states of a submission. Created as `Submitted`, judged
/// once, immutable afterwards except for transaction-hash backfill.
#[derive(
    minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubmissionStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Submitted,
    #[n(2)]
    Verified,
    #[n(3)]
    Rejected,
}

impl SubmissionStatus {
    pub fn can_transition(from: Self, to: Self) -> bool {
        use SubmissionStatus::*;
        matches!(
            (from, to),
            (Pending, Submitted) | (Submitted, Verified) | (Submitted, Rejected)
        )
    }
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Submitted => "SUBMITTED",
            Self::Verified => "VERIFIED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One participant's answer attempt. Carries only the commitment of the
/// submitted answer; the plaintext is hashed on arrival and dropped.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Submission {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub challenge_id: String,
    #[n(2)]
    pub participant_id: String,
    #[n(3)]
    pub answer_hash: String,
    #[n(4)]
    pub proof_uri: Option<String>,
    #[n(5)]
    pub status: SubmissionStatus,
    #[n(6)]
    pub submitted_at: TimeStamp<Utc>,
    #[n(7)]
    pub verification_tx_hash: Option<String>,
}

impl Submission {
    pub fn new(
        challenge_id: &str,
        participant_id: &str,
        answer_hash: String,
        proof_uri: Option<String>,
    ) -> Result<Self, Error> {
        Ok(Self {
            id: utils::new_bech32_id("sub_")?,
            challenge_id: challenge_id.to_owned(),
            participant_id: participant_id.to_owned(),
            answer_hash,
            proof_uri,
            status: SubmissionStatus::Submitted,
            submitted_at: TimeStamp::new(),
            verification_tx_hash: None,
        })
    }
    /// Settle the verification verdict. Legal exactly once.
    pub fn verify(&mut self, correct: bool) -> Result<(), Error> {
        let to = if correct {
            SubmissionStatus::Verified
        } else {
            SubmissionStatus::Rejected
        };
        if !SubmissionStatus::can_transition(self.status, to) {
            return Err(Error::InvalidTransition {
                from: self.status.name(),
                to: to.name(),
            });
        }
        self.status = to;
        Ok(())
    }
    /// Transaction-hash backfill from a chain verification fact.
    pub fn set_verification_tx(&mut self, tx_hash: String) {
        self.verification_tx_hash = Some(tx_hash);
    }
}

/// Raw join request as it arrives from the outer surface.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct JoinRequest {
    pub identity: String,
    /// Wallet address; falls back to the identity when absent.
    #[serde(default)]
    pub wallet: Option<String>,
    pub stake: u64,
}
