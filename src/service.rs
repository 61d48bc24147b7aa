//! Service layer API for challenge lifecycle operations.
//!
//! Every operation follows the same shape: load the row, guard on the
//! current status, mutate, persist, append the ledger row the transition
//! calls for. Status guards go through the forward-only transition
//! tables, so replays and out-of-order deliveries degrade to explicit
//! no-op outcomes instead of double-applying.
use crate::chain::{ChainEvent, ChainFact};
use crate::challenge::{Challenge, ChallengeDraft, ChallengeStatus};
use crate::classifier::{
    ClassificationJob, ClassificationOutcome, ClassificationRequest, UNCLASSIFIED_DOMAIN,
};
use crate::commitment;
use crate::config::GauntletConfig;
use crate::error::{Error, Result};
use crate::events::{ChallengeEvent, EventPayload};
use crate::participant::{JoinRequest, Participant, ParticipantStatus, Submission, SubmissionStatus};
use crate::store::Store;
use crate::utils;
use crate::worker::JobQueue;
use std::collections::HashSet;

/// Outcome of an idempotent classification completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The challenge had already left `Pending`; nothing was written.
    Skipped,
}

/// Outcome of applying one observed chain fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainApplyOutcome {
    Applied,
    /// This transaction hash was applied before, or the transition it
    /// carries already happened.
    AlreadyApplied,
    /// Unknown subject or a state that cannot accept the fact. Logged,
    /// nothing written.
    Ignored,
}

pub struct LifecycleService {
    store: Store,
    jobs: JobQueue,
    config: GauntletConfig,
}

impl LifecycleService {
    pub fn new(store: Store, jobs: JobQueue, config: GauntletConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            jobs,
            config,
        })
    }

    pub fn config(&self) -> &GauntletConfig {
        &self.config
    }

    /// Create a challenge and queue it for classification. The caller
    /// gets the `Pending` row back immediately; the classifier runs in
    /// the background and never blocks creation.
    pub fn create_challenge(&self, draft: ChallengeDraft) -> Result<Challenge> {
        let urgency = draft.urgency();
        let challenge = draft.finalise()?;
        let request = ClassificationRequest::for_challenge(&challenge, urgency);

        self.store.put_challenge(&challenge)?;
        self.store.enqueue_job(&ClassificationJob::new(request))?;
        self.jobs.nudge(&challenge.id);

        tracing::info!(
            challenge = %challenge.id,
            creator = %challenge.creator,
            reward = challenge.reward,
            "challenge created, classification queued"
        );
        Ok(challenge)
    }

    /// Land a finished classification attempt. Idempotent: only a
    /// challenge still in `Pending` is touched, replays are skipped. The
    /// durable job row is cleared once the outcome has been applied.
    pub fn apply_classification(
        &self,
        challenge_id: &str,
        outcome: ClassificationOutcome,
    ) -> Result<ApplyOutcome> {
        let mut challenge = match self.store.get_challenge(challenge_id) {
            Ok(challenge) => challenge,
            Err(Error::NotFound { .. }) => {
                tracing::warn!(
                    challenge = %challenge_id,
                    "classification outcome for unknown challenge, dropping job"
                );
                self.store.finish_job(challenge_id)?;
                return Ok(ApplyOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        if challenge.status != ChallengeStatus::Pending {
            tracing::info!(
                challenge = %challenge_id,
                status = %challenge.status,
                "classification replay ignored"
            );
            self.store.finish_job(challenge_id)?;
            return Ok(ApplyOutcome::Skipped);
        }

        match outcome {
            ClassificationOutcome::Fundible { domain } => {
                challenge.domain = Some(domain.clone());
                challenge.fundible = true;
                challenge.transition(ChallengeStatus::Funded)?;
                self.store.put_challenge(&challenge)?;
                tracing::info!(challenge = %challenge_id, domain = %domain, "challenge funded");
            }
            ClassificationOutcome::NotFundible { domain } => {
                challenge.domain = Some(domain.clone());
                challenge.fundible = false;
                challenge.transition(ChallengeStatus::Rejected)?;
                self.store.put_challenge(&challenge)?;
                self.store.append_event(&ChallengeEvent::new(
                    challenge_id,
                    EventPayload::Rejected {
                        reason: format!("classified as not fundible (domain {domain})"),
                    },
                ))?;
                tracing::info!(
                    challenge = %challenge_id,
                    domain = %domain,
                    "challenge rejected by classification"
                );
            }
            ClassificationOutcome::Failed { reason } => {
                challenge.domain = Some(UNCLASSIFIED_DOMAIN.to_owned());
                challenge.transition(ChallengeStatus::Rejected)?;
                self.store.put_challenge(&challenge)?;
                self.store.append_event(&ChallengeEvent::new(
                    challenge_id,
                    EventPayload::Rejected {
                        reason: reason.clone(),
                    },
                ))?;
                tracing::warn!(
                    challenge = %challenge_id,
                    reason = %reason,
                    "classification failed, challenge rejected"
                );
            }
        }

        self.store.finish_job(challenge_id)?;
        Ok(ApplyOutcome::Applied)
    }

    /// Stake on a challenge. Open while the challenge is `Pending`,
    /// `Funded` or `Live`; one participant per identity, enforced by the
    /// store's reservation rather than a read-then-write check.
    pub fn join_challenge(&self, challenge_id: &str, request: JoinRequest) -> Result<Participant> {
        let identity = utils::normalize_identity(&request.identity);
        if !utils::valid_identity(&identity) {
            return Err(Error::validation(format!(
                "identity {:?} is not usable",
                request.identity
            )));
        }
        if request.stake == 0 {
            return Err(Error::validation("stake must be greater than zero"));
        }

        let challenge = self.store.get_challenge(challenge_id)?;
        if !challenge.status.accepts_joins() {
            return Err(Error::validation(format!(
                "challenge is {} and not accepting joins",
                challenge.status
            )));
        }

        let wallet = request
            .wallet
            .as_deref()
            .map(utils::normalize_identity)
            .filter(|w| !w.is_empty())
            .unwrap_or_else(|| identity.clone());

        let participant = Participant::new(challenge_id, &identity, &wallet, request.stake)?;
        self.store
            .reserve_participant(challenge_id, &identity, &participant.id)?;
        self.store.put_participant(&participant)?;

        tracing::info!(
            challenge = %challenge_id,
            participant = %participant.id,
            identity = %identity,
            stake = request.stake,
            "participant joined"
        );
        Ok(participant)
    }

    /// Submit an answer. The plaintext is hashed and compared against
    /// the stored commitment, then dropped; only the digest is kept. A
    /// correct answer completes the challenge in the same call.
    pub fn submit_answer(
        &self,
        challenge_id: &str,
        participant_id: &str,
        answer: &str,
        proof_uri: Option<String>,
    ) -> Result<Submission> {
        if answer.trim().is_empty() {
            return Err(Error::validation("answer must not be empty"));
        }

        let challenge = self.store.get_challenge(challenge_id)?;
        if !challenge.status.accepts_submissions() {
            return Err(Error::validation(format!(
                "challenge is {} and not accepting submissions",
                challenge.status
            )));
        }
        let mut participant = self.store.get_participant(challenge_id, participant_id)?;

        let mut submission = Submission::new(
            challenge_id,
            participant_id,
            commitment::answer_commitment(answer),
            proof_uri,
        )?;
        self.store
            .reserve_submission(challenge_id, participant_id, &submission.id)?;

        let correct = commitment::verify_answer(answer, &challenge.correct_answer_hash);
        submission.verify(correct)?;
        self.store.put_submission(&submission)?;
        self.store.append_event(&ChallengeEvent::new(
            challenge_id,
            EventPayload::AnswerSubmitted {
                participant: participant.identity.clone(),
                correct,
            },
        ))?;

        tracing::info!(
            challenge = %challenge_id,
            participant = %participant_id,
            submission = %submission.id,
            correct,
            "answer judged"
        );

        if correct {
            self.complete_challenge(challenge_id)?;
        } else {
            // their one submission is spent, so the outcome is settled
            participant.mark_loser()?;
            self.store.put_participant(&participant)?;
        }

        Ok(submission)
    }

    /// Settle a challenge that has at least one verified submission.
    /// Every holder of a verified submission at this moment is a winner;
    /// the reward splits evenly between them and the integer remainder
    /// stays in escrow. Already-completed challenges are left untouched.
    fn complete_challenge(&self, challenge_id: &str) -> Result<()> {
        let mut challenge = self.store.get_challenge(challenge_id)?;
        if challenge.status == ChallengeStatus::Completed {
            return Ok(());
        }

        let submissions = self.store.submissions_of(challenge_id)?;
        let winner_ids: HashSet<&str> = submissions
            .iter()
            .filter(|s| s.status == SubmissionStatus::Verified)
            .map(|s| s.participant_id.as_str())
            .collect();
        if winner_ids.is_empty() {
            return Ok(());
        }

        let winner_count = winner_ids.len() as u64;
        let share = challenge.reward / winner_count;
        let payout_tx = utils::mock_tx_hash();

        let mut events = vec![ChallengeEvent::new(
            challenge_id,
            EventPayload::ChallengeCompleted {
                reward: challenge.reward,
                winner_count,
            },
        )];

        for mut participant in self.store.participants_of(challenge_id)? {
            if participant.status.is_settled() {
                continue;
            }
            if winner_ids.contains(participant.id.as_str()) {
                participant.mark_winner(share, payout_tx.clone())?;
                events.push(ChallengeEvent::new(
                    challenge_id,
                    EventPayload::WinnerFound {
                        winner: participant.identity.clone(),
                        reward_share: share,
                    },
                ));
            } else {
                participant.mark_loser()?;
            }
            self.store.put_participant(&participant)?;
        }

        challenge.transition(ChallengeStatus::Completed)?;
        challenge.reward_released = true;
        self.store.put_challenge(&challenge)?;
        self.store.append_events(&events)?;

        tracing::info!(
            challenge = %challenge_id,
            winners = winner_count,
            share,
            "challenge completed, reward released"
        );
        Ok(())
    }

    /// Explicit chain-id update: anchor a funded challenge to its
    /// on-chain registration and take it live.
    pub fn anchor_challenge(
        &self,
        challenge_id: &str,
        chain_challenge_id: u64,
        tx_hash: &str,
        block_number: Option<u64>,
    ) -> Result<ChainApplyOutcome> {
        let challenge = self.store.get_challenge(challenge_id)?;
        self.apply_anchor(challenge, chain_challenge_id, tx_hash, block_number)
    }

    /// Apply one observed chain fact. Replays of an already-claimed
    /// transaction hash come back `AlreadyApplied`; facts about unknown
    /// subjects or inapplicable states come back `Ignored` with nothing
    /// written.
    pub fn apply_chain_event(&self, fact: &ChainFact) -> Result<ChainApplyOutcome> {
        match &fact.event {
            ChainEvent::ChallengeCreated {
                chain_challenge_id,
                metadata_uri,
                ..
            } => self.chain_created(fact, *chain_challenge_id, metadata_uri),
            ChainEvent::ChallengeFunded {
                chain_challenge_id,
                participant,
                amount,
            } => self.chain_funded(fact, *chain_challenge_id, participant, *amount),
            ChainEvent::ChallengeVerified {
                chain_challenge_id,
                correct,
            } => self.chain_verified(fact, *chain_challenge_id, *correct),
            ChainEvent::ChallengeCompleted {
                chain_challenge_id,
                winner,
                reward,
            } => self.chain_completed(fact, *chain_challenge_id, winner, *reward),
            ChainEvent::AnswerSubmitted {
                chain_challenge_id,
                participant,
                correct,
            } => self.chain_answer(fact, *chain_challenge_id, participant, *correct),
            ChainEvent::WinnerFound {
                chain_challenge_id,
                winner,
            } => self.chain_winner(fact, *chain_challenge_id, winner),
        }
    }

    // ---- chain fact handlers ----

    /// Look up the local challenge a chain id refers to.
    fn resolve_chain_subject(&self, chain_challenge_id: u64) -> Result<Option<Challenge>> {
        match self.store.challenge_for_chain_id(chain_challenge_id)? {
            Some(id) => match self.store.get_challenge(&id) {
                Ok(challenge) => Ok(Some(challenge)),
                Err(Error::NotFound { .. }) => Ok(None),
                Err(e) => Err(e),
            },
            None => Ok(None),
        }
    }

    /// Find the participant a chain-side address refers to.
    fn participant_for_address(
        &self,
        challenge_id: &str,
        address: &str,
    ) -> Result<Option<Participant>> {
        let needle = utils::normalize_identity(address);
        Ok(self
            .store
            .participants_of(challenge_id)?
            .into_iter()
            .find(|p| p.identity == needle || utils::normalize_identity(&p.wallet) == needle))
    }

    fn chain_created(
        &self,
        fact: &ChainFact,
        chain_challenge_id: u64,
        metadata_uri: &str,
    ) -> Result<ChainApplyOutcome> {
        // First contact maps the chain id via the metadata URI; afterwards
        // the chain index resolves it directly.
        let challenge = match self.resolve_chain_subject(chain_challenge_id)? {
            Some(challenge) => challenge,
            None => {
                let Some(subject) = anchor_subject(metadata_uri) else {
                    tracing::warn!(
                        chain_id = chain_challenge_id,
                        uri = %metadata_uri,
                        "challenge-created fact without a resolvable subject, ignored"
                    );
                    return Ok(ChainApplyOutcome::Ignored);
                };
                match self.store.get_challenge(subject) {
                    Ok(challenge) => challenge,
                    Err(Error::NotFound { .. }) => {
                        tracing::warn!(
                            chain_id = chain_challenge_id,
                            subject = %subject,
                            "challenge-created fact for unknown challenge, ignored"
                        );
                        return Ok(ChainApplyOutcome::Ignored);
                    }
                    Err(e) => return Err(e),
                }
            }
        };
        self.apply_anchor(challenge, chain_challenge_id, &fact.tx_hash, Some(fact.block_number))
    }

    /// Shared funding-confirmation path for the chain fact and the
    /// explicit update. Funded goes Live; anything else is a replay or a
    /// mismatch.
    fn apply_anchor(
        &self,
        mut challenge: Challenge,
        chain_challenge_id: u64,
        tx_hash: &str,
        block_number: Option<u64>,
    ) -> Result<ChainApplyOutcome> {
        match challenge.chain_challenge_id {
            Some(existing) if existing == chain_challenge_id => {
                return Ok(ChainApplyOutcome::AlreadyApplied);
            }
            Some(existing) => {
                tracing::warn!(
                    challenge = %challenge.id,
                    anchored = existing,
                    offered = chain_challenge_id,
                    "funding confirmation under a different chain id, ignored"
                );
                return Ok(ChainApplyOutcome::Ignored);
            }
            None => {}
        }
        if challenge.status != ChallengeStatus::Funded {
            tracing::warn!(
                challenge = %challenge.id,
                status = %challenge.status,
                "funding confirmation for a challenge that is not funded, ignored"
            );
            return Ok(ChainApplyOutcome::Ignored);
        }

        let mut event = ChallengeEvent::new(
            &challenge.id,
            EventPayload::ChallengeCreated { chain_challenge_id },
        );
        event.tx_hash = Some(tx_hash.to_owned());
        event.block_number = block_number;
        if !self.store.claim_tx(tx_hash, &event.id)? {
            return Ok(ChainApplyOutcome::AlreadyApplied);
        }

        challenge.anchor(chain_challenge_id, tx_hash.to_owned())?;
        challenge.transition(ChallengeStatus::Live)?;
        self.store.index_chain_id(chain_challenge_id, &challenge.id)?;
        self.store.put_challenge(&challenge)?;
        self.store.append_event(&event)?;

        tracing::info!(
            challenge = %challenge.id,
            chain_id = chain_challenge_id,
            tx = %tx_hash,
            "challenge anchored on-chain and live"
        );
        Ok(ChainApplyOutcome::Applied)
    }

    fn chain_funded(
        &self,
        fact: &ChainFact,
        chain_challenge_id: u64,
        address: &str,
        amount: u64,
    ) -> Result<ChainApplyOutcome> {
        let Some(challenge) = self.resolve_chain_subject(chain_challenge_id)? else {
            tracing::warn!(chain_id = chain_challenge_id, "stake fact for unknown chain id, ignored");
            return Ok(ChainApplyOutcome::Ignored);
        };
        let Some(mut participant) = self.participant_for_address(&challenge.id, address)? else {
            tracing::warn!(
                challenge = %challenge.id,
                address = %address,
                "stake fact for unknown participant, ignored"
            );
            return Ok(ChainApplyOutcome::Ignored);
        };
        if participant.status != ParticipantStatus::Pending {
            return Ok(ChainApplyOutcome::AlreadyApplied);
        }

        let event = ChallengeEvent::new(
            &challenge.id,
            EventPayload::ParticipantFunded {
                participant: participant.identity.clone(),
                amount,
            },
        )
        .with_provenance(&fact.tx_hash, fact.block_number);
        if !self.store.claim_tx(&fact.tx_hash, &event.id)? {
            return Ok(ChainApplyOutcome::AlreadyApplied);
        }

        participant.mark_staked(fact.tx_hash.clone())?;
        self.store.put_participant(&participant)?;
        self.store.append_event(&event)?;

        tracing::info!(
            challenge = %challenge.id,
            participant = %participant.id,
            amount,
            "stake confirmed on-chain"
        );
        Ok(ChainApplyOutcome::Applied)
    }

    fn chain_verified(
        &self,
        fact: &ChainFact,
        chain_challenge_id: u64,
        correct: bool,
    ) -> Result<ChainApplyOutcome> {
        let Some(mut challenge) = self.resolve_chain_subject(chain_challenge_id)? else {
            return Ok(self.ignored(fact, chain_challenge_id));
        };
        if !accepts_chain_settlement(challenge.status) {
            return Ok(self.ignored(fact, chain_challenge_id));
        }

        let event = ChallengeEvent::new(&challenge.id, EventPayload::ChallengeVerified { correct })
            .with_provenance(&fact.tx_hash, fact.block_number);
        if !self.store.claim_tx(&fact.tx_hash, &event.id)? {
            return Ok(ChainApplyOutcome::AlreadyApplied);
        }

        if challenge.verification_tx_hash.is_none() {
            challenge.verification_tx_hash = Some(fact.tx_hash.clone());
            self.store.put_challenge(&challenge)?;
        }
        // backfill the submissions this verdict covers
        let verdict_status = if correct {
            SubmissionStatus::Verified
        } else {
            SubmissionStatus::Rejected
        };
        for mut submission in self.store.submissions_of(&challenge.id)? {
            if submission.status == verdict_status && submission.verification_tx_hash.is_none() {
                submission.set_verification_tx(fact.tx_hash.clone());
                self.store.put_submission(&submission)?;
            }
        }
        self.store.append_event(&event)?;
        Ok(ChainApplyOutcome::Applied)
    }

    fn chain_completed(
        &self,
        fact: &ChainFact,
        chain_challenge_id: u64,
        winner: &str,
        reward: u64,
    ) -> Result<ChainApplyOutcome> {
        let Some(challenge) = self.resolve_chain_subject(chain_challenge_id)? else {
            return Ok(self.ignored(fact, chain_challenge_id));
        };
        if !accepts_chain_settlement(challenge.status) {
            return Ok(self.ignored(fact, chain_challenge_id));
        }

        let winner_count = self
            .store
            .participants_of(&challenge.id)?
            .iter()
            .filter(|p| p.status == ParticipantStatus::Winner)
            .count() as u64;
        let event = ChallengeEvent::new(
            &challenge.id,
            EventPayload::ChallengeCompleted {
                reward,
                winner_count,
            },
        )
        .with_provenance(&fact.tx_hash, fact.block_number);
        if !self.store.claim_tx(&fact.tx_hash, &event.id)? {
            return Ok(ChainApplyOutcome::AlreadyApplied);
        }

        if let Some(mut participant) = self.participant_for_address(&challenge.id, winner)? {
            if participant.status == ParticipantStatus::Winner
                && participant.reward_tx_hash.is_none()
            {
                participant.reward_tx_hash = Some(fact.tx_hash.clone());
                self.store.put_participant(&participant)?;
            }
        }
        self.store.append_event(&event)?;
        Ok(ChainApplyOutcome::Applied)
    }

    fn chain_answer(
        &self,
        fact: &ChainFact,
        chain_challenge_id: u64,
        address: &str,
        correct: bool,
    ) -> Result<ChainApplyOutcome> {
        let Some(challenge) = self.resolve_chain_subject(chain_challenge_id)? else {
            return Ok(self.ignored(fact, chain_challenge_id));
        };
        if !accepts_chain_settlement(challenge.status) {
            return Ok(self.ignored(fact, chain_challenge_id));
        }
        let Some(participant) = self.participant_for_address(&challenge.id, address)? else {
            return Ok(self.ignored(fact, chain_challenge_id));
        };

        let event = ChallengeEvent::new(
            &challenge.id,
            EventPayload::AnswerSubmitted {
                participant: participant.identity.clone(),
                correct,
            },
        )
        .with_provenance(&fact.tx_hash, fact.block_number);
        if !self.store.claim_tx(&fact.tx_hash, &event.id)? {
            return Ok(ChainApplyOutcome::AlreadyApplied);
        }

        let verdict_status = if correct {
            SubmissionStatus::Verified
        } else {
            SubmissionStatus::Rejected
        };
        for mut submission in self.store.submissions_of(&challenge.id)? {
            if submission.participant_id == participant.id
                && submission.status == verdict_status
                && submission.verification_tx_hash.is_none()
            {
                submission.set_verification_tx(fact.tx_hash.clone());
                self.store.put_submission(&submission)?;
            }
        }
        self.store.append_event(&event)?;
        Ok(ChainApplyOutcome::Applied)
    }

    fn chain_winner(
        &self,
        fact: &ChainFact,
        chain_challenge_id: u64,
        winner: &str,
    ) -> Result<ChainApplyOutcome> {
        let Some(challenge) = self.resolve_chain_subject(chain_challenge_id)? else {
            return Ok(self.ignored(fact, chain_challenge_id));
        };
        if !accepts_chain_settlement(challenge.status) {
            return Ok(self.ignored(fact, chain_challenge_id));
        }
        let Some(mut participant) = self.participant_for_address(&challenge.id, winner)? else {
            return Ok(self.ignored(fact, chain_challenge_id));
        };

        let event = ChallengeEvent::new(
            &challenge.id,
            EventPayload::WinnerFound {
                winner: participant.identity.clone(),
                reward_share: participant.reward_share.unwrap_or(0),
            },
        )
        .with_provenance(&fact.tx_hash, fact.block_number);
        if !self.store.claim_tx(&fact.tx_hash, &event.id)? {
            return Ok(ChainApplyOutcome::AlreadyApplied);
        }

        if participant.status == ParticipantStatus::Winner && participant.reward_tx_hash.is_none() {
            participant.reward_tx_hash = Some(fact.tx_hash.clone());
            self.store.put_participant(&participant)?;
        }
        self.store.append_event(&event)?;
        Ok(ChainApplyOutcome::Applied)
    }

    fn ignored(&self, fact: &ChainFact, chain_challenge_id: u64) -> ChainApplyOutcome {
        tracing::warn!(
            event = fact.event.name(),
            chain_id = chain_challenge_id,
            tx = %fact.tx_hash,
            "chain fact not applicable, ignored"
        );
        ChainApplyOutcome::Ignored
    }

    // ---- worker support ----

    /// Unfinished classification jobs, for startup recovery.
    pub fn pending_classifications(&self) -> Result<Vec<ClassificationJob>> {
        self.store.pending_jobs()
    }

    /// The durable job for one challenge, if it has not completed yet.
    pub fn classification_job(&self, challenge_id: &str) -> Result<Option<ClassificationJob>> {
        Ok(self
            .store
            .pending_jobs()?
            .into_iter()
            .find(|job| job.request.challenge_id == challenge_id))
    }
}

/// Settlement facts only make sense once a reward is committed.
fn accepts_chain_settlement(status: ChallengeStatus) -> bool {
    matches!(
        status,
        ChallengeStatus::Funded | ChallengeStatus::Live | ChallengeStatus::Completed
    )
}

/// The metadata URI of a registration points back at the off-chain
/// record; its last path segment is the challenge id.
fn anchor_subject(metadata_uri: &str) -> Option<&str> {
    metadata_uri
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
}
