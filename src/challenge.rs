//! Challenge entity, lifecycle status machine and draft builder.
use crate::commitment;
use crate::error::Error;
use crate::utils;
use chrono::{DateTime, TimeZone, Utc};

/// Lifecycle states of a challenge.
///
/// Transitions only ever move forward: `Pending` resolves to `Funded` or
/// `Rejected` through classification, `Funded` goes `Live` once anchored
/// on-chain, and a verified winning submission completes the challenge
/// from either `Funded` or `Live`. `Rejected` and `Completed` are terminal.
#[derive(
    minicbor::Encode,
    minicbor::Decode,
    serde::Serialize,
    serde::Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Funded,
    #[n(2)]
    Live,
    #[n(3)]
    Completed,
    #[n(4)]
    Rejected,
}

impl ChallengeStatus {
    /// Single source of truth for the forward-only transition table.
    /// Every write guard in the service consults this before mutating.
    pub fn can_transition(from: Self, to: Self) -> bool {
        use ChallengeStatus::*;
        matches!(
            (from, to),
            (Pending, Funded)
                | (Pending, Rejected)
                | (Funded, Live)
                | (Funded, Completed)
                | (Live, Completed)
        )
    }
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }
    /// Joining is open while the challenge is anywhere on the happy path,
    /// including `Pending` (classification may still be in flight).
    pub fn accepts_joins(&self) -> bool {
        matches!(self, Self::Pending | Self::Funded | Self::Live)
    }
    /// Answers are only judged once the reward is committed.
    pub fn accepts_submissions(&self) -> bool {
        matches!(self, Self::Funded | Self::Live)
    }
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Funded => "funded",
            Self::Live => "live",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

// Read-surface DTOs render timestamps as RFC 3339 strings.
impl serde::Serialize for TimeStamp<Utc> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_rfc3339())
    }
}

/// A posted problem with a reward commitment.
///
/// The correct answer is stored only as its one-way commitment, set at
/// creation and never cleared. The reward is fixed at creation. The chain
/// challenge id is written once, when funding is confirmed.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Challenge {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub title: String,
    #[n(2)]
    pub description: String,
    /// Reward in integer base units.
    #[n(3)]
    pub reward: u64,
    /// Assigned by the classifier; fixed once the challenge is funded.
    #[n(4)]
    pub domain: Option<String>,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
    /// Normalized creator identity.
    #[n(6)]
    pub creator: String,
    #[n(7)]
    pub correct_answer_hash: String,
    /// Advisory text only, never mechanically enforced.
    #[n(8)]
    pub judging_criteria: Option<String>,
    #[n(9)]
    pub status: ChallengeStatus,
    #[n(10)]
    pub fundible: bool,
    #[n(11)]
    pub chain_challenge_id: Option<u64>,
    #[n(12)]
    pub funding_tx_hash: Option<String>,
    #[n(13)]
    pub verification_tx_hash: Option<String>,
    #[n(14)]
    pub reward_released: bool,
}

impl Challenge {
    /// Move to `to`, refusing every edge outside the forward-only table.
    pub fn transition(&mut self, to: ChallengeStatus) -> Result<(), Error> {
        if !ChallengeStatus::can_transition(self.status, to) {
            return Err(Error::InvalidTransition {
                from: self.status.name(),
                to: to.name(),
            });
        }
        self.status = to;
        Ok(())
    }
    /// Record the on-chain identity of this challenge. Write-once.
    pub fn anchor(&mut self, chain_challenge_id: u64, funding_tx_hash: String) -> Result<(), Error> {
        if self.chain_challenge_id.is_some() {
            return Err(Error::Validation(
                "chain challenge id is already set and immutable".into(),
            ));
        }
        self.chain_challenge_id = Some(chain_challenge_id);
        self.funding_tx_hash = Some(funding_tx_hash);
        Ok(())
    }
}

/// Builder for a new challenge. Collects the raw creation request and
/// turns it into a persisted-shape [`Challenge`] via [`finalise`].
///
/// [`finalise`]: ChallengeDraft::finalise
#[derive(Debug, Default, Clone)]
pub struct ChallengeDraft {
    title: String,
    description: String,
    // Plaintext answer. Consumed for the commitment, never persisted.
    answer: String,
    reward: u64,
    creator: String,
    judging_criteria: Option<String>,
    urgency: crate::classifier::Urgency,
}

impl ChallengeDraft {
    /// Construct a new builder object, this becomes the basis for a draft
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_title(mut self, title: &str) -> Self {
        self.title = title.trim().to_owned();
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = description.trim().to_owned();
        self
    }
    pub fn set_answer(mut self, answer: &str) -> Self {
        self.answer = answer.to_owned();
        self
    }
    pub fn set_reward(mut self, reward: u64) -> Self {
        self.reward = reward;
        self
    }
    pub fn set_creator(mut self, creator: &str) -> Self {
        self.creator = utils::normalize_identity(creator);
        self
    }
    pub fn set_judging_criteria(mut self, criteria: &str) -> Self {
        self.judging_criteria = Some(criteria.to_owned());
        self
    }
    pub fn set_urgency(mut self, urgency: crate::classifier::Urgency) -> Self {
        self.urgency = urgency;
        self
    }
    /// Urgency hint passed along to the classification request.
    pub fn urgency(&self) -> crate::classifier::Urgency {
        self.urgency
    }
    /// Checks fields, computes the answer commitment and assigns a fresh
    /// id. Returns the `Pending` challenge ready to persist.
    pub fn finalise(&self) -> Result<Challenge, Error> {
        if self.title.is_empty() {
            return Err(Error::Validation("title must not be empty".into()));
        }
        if self.description.is_empty() {
            return Err(Error::Validation("description must not be empty".into()));
        }
        if self.answer.trim().is_empty() {
            return Err(Error::Validation("correct answer must not be empty".into()));
        }
        if self.reward == 0 {
            return Err(Error::Validation("reward must be greater than zero".into()));
        }
        if !utils::valid_identity(&self.creator) {
            return Err(Error::Validation(format!(
                "creator identity {:?} is not usable",
                self.creator
            )));
        }

        Ok(Challenge {
            id: utils::new_bech32_id("chal_")?,
            title: self.title.clone(),
            description: self.description.clone(),
            reward: self.reward,
            domain: None,
            created_at: TimeStamp::new(),
            creator: self.creator.clone(),
            correct_answer_hash: commitment::answer_commitment(&self.answer),
            judging_criteria: self.judging_criteria.clone(),
            status: ChallengeStatus::Pending,
            fundible: false,
            chain_challenge_id: None,
            funding_tx_hash: None,
            verification_tx_hash: None,
            reward_released: false,
        })
    }
}
