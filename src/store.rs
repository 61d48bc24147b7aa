//! sled persistence layout.
//!
//! One injected `sled::Db` handle, one named tree per entity group. Rows
//! are minicbor. Child rows are keyed `"{challenge_id}/{row_id}"` so a
//! prefix scan yields exactly one challenge's rows, and uuid7 row ids
//! make that scan chronological.
//!
//! Uniqueness ("one participant per identity", "one submission per
//! participant", "one applied event per transaction hash") is enforced
//! here with compare-and-swap reservations instead of read-then-write
//! checks, so two racing writers cannot both pass the guard.
use crate::challenge::Challenge;
use crate::classifier::ClassificationJob;
use crate::error::{Error, Result};
use crate::events::ChallengeEvent;
use crate::participant::{Participant, Submission};
use sled::Batch;
use std::sync::Arc;

fn decode_row<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

fn child_key(challenge_id: &str, row_id: &str) -> String {
    format!("{challenge_id}/{row_id}")
}

fn child_prefix(challenge_id: &str) -> String {
    format!("{challenge_id}/")
}

#[derive(Clone)]
pub struct Store {
    db: Arc<sled::Db>,
    challenges: sled::Tree,
    participants: sled::Tree,
    submissions: sled::Tree,
    events: sled::Tree,
    // (challenge, identity) -> participant id, written with CAS
    participant_idx: sled::Tree,
    // (challenge, participant) -> submission id, written with CAS
    submission_idx: sled::Tree,
    // tx hash -> event id, the replay guard
    seen_tx: sled::Tree,
    // challenge id -> unfinished classification job
    pending_jobs: sled::Tree,
    // chain challenge id (big-endian u64) -> challenge id
    chain_idx: sled::Tree,
}

impl Store {
    pub fn open(db: Arc<sled::Db>) -> Result<Self> {
        Ok(Self {
            challenges: db.open_tree("challenges")?,
            participants: db.open_tree("participants")?,
            submissions: db.open_tree("submissions")?,
            events: db.open_tree("events")?,
            participant_idx: db.open_tree("participant_idx")?,
            submission_idx: db.open_tree("submission_idx")?,
            seen_tx: db.open_tree("seen_tx")?,
            pending_jobs: db.open_tree("pending_jobs")?,
            chain_idx: db.open_tree("chain_idx")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // ---- challenges ----

    pub fn put_challenge(&self, challenge: &Challenge) -> Result<()> {
        self.challenges
            .insert(challenge.id.as_bytes(), minicbor::to_vec(challenge)?)?;
        Ok(())
    }

    pub fn get_challenge(&self, id: &str) -> Result<Challenge> {
        match self.challenges.get(id.as_bytes())? {
            Some(bytes) => decode_row(&bytes),
            None => Err(Error::not_found("challenge", id)),
        }
    }

    pub fn all_challenges(&self) -> Result<Vec<Challenge>> {
        let mut out = Vec::new();
        for row in self.challenges.iter() {
            let (_, bytes) = row?;
            out.push(decode_row(&bytes)?);
        }
        Ok(out)
    }

    // ---- participants ----

    /// Reserve the (challenge, identity) slot for `participant_id`.
    /// Exactly one caller wins; everyone else gets the conflict error.
    pub fn reserve_participant(
        &self,
        challenge_id: &str,
        identity: &str,
        participant_id: &str,
    ) -> Result<()> {
        let key = child_key(challenge_id, identity);
        self.participant_idx
            .compare_and_swap(
                key.as_bytes(),
                None as Option<&[u8]>,
                Some(participant_id.as_bytes()),
            )?
            .map_err(|_| Error::AlreadyJoined)
    }

    pub fn participant_id_for(&self, challenge_id: &str, identity: &str) -> Result<Option<String>> {
        let key = child_key(challenge_id, identity);
        match self.participant_idx.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(
                String::from_utf8(bytes.to_vec()).map_err(|e| Error::Codec(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn put_participant(&self, participant: &Participant) -> Result<()> {
        let key = child_key(&participant.challenge_id, &participant.id);
        self.participants
            .insert(key.as_bytes(), minicbor::to_vec(participant)?)?;
        Ok(())
    }

    pub fn get_participant(&self, challenge_id: &str, participant_id: &str) -> Result<Participant> {
        let key = child_key(challenge_id, participant_id);
        match self.participants.get(key.as_bytes())? {
            Some(bytes) => decode_row(&bytes),
            None => Err(Error::not_found("participant", participant_id)),
        }
    }

    /// One challenge's participants, in join order.
    pub fn participants_of(&self, challenge_id: &str) -> Result<Vec<Participant>> {
        let mut out = Vec::new();
        for row in self.participants.scan_prefix(child_prefix(challenge_id)) {
            let (_, bytes) = row?;
            out.push(decode_row(&bytes)?);
        }
        Ok(out)
    }

    pub fn all_participants(&self) -> Result<Vec<Participant>> {
        let mut out = Vec::new();
        for row in self.participants.iter() {
            let (_, bytes) = row?;
            out.push(decode_row(&bytes)?);
        }
        Ok(out)
    }

    // ---- submissions ----

    /// Reserve the one submission slot a participant gets per challenge.
    pub fn reserve_submission(
        &self,
        challenge_id: &str,
        participant_id: &str,
        submission_id: &str,
    ) -> Result<()> {
        let key = child_key(challenge_id, participant_id);
        self.submission_idx
            .compare_and_swap(
                key.as_bytes(),
                None as Option<&[u8]>,
                Some(submission_id.as_bytes()),
            )?
            .map_err(|_| Error::AlreadySubmitted)
    }

    pub fn put_submission(&self, submission: &Submission) -> Result<()> {
        let key = child_key(&submission.challenge_id, &submission.id);
        self.submissions
            .insert(key.as_bytes(), minicbor::to_vec(submission)?)?;
        Ok(())
    }

    pub fn get_submission(&self, challenge_id: &str, submission_id: &str) -> Result<Submission> {
        let key = child_key(challenge_id, submission_id);
        match self.submissions.get(key.as_bytes())? {
            Some(bytes) => decode_row(&bytes),
            None => Err(Error::not_found("submission", submission_id)),
        }
    }

    pub fn submissions_of(&self, challenge_id: &str) -> Result<Vec<Submission>> {
        let mut out = Vec::new();
        for row in self.submissions.scan_prefix(child_prefix(challenge_id)) {
            let (_, bytes) = row?;
            out.push(decode_row(&bytes)?);
        }
        Ok(out)
    }

    pub fn all_submissions(&self) -> Result<Vec<Submission>> {
        let mut out = Vec::new();
        for row in self.submissions.iter() {
            let (_, bytes) = row?;
            out.push(decode_row(&bytes)?);
        }
        Ok(out)
    }

    // ---- event ledger ----

    pub fn append_event(&self, event: &ChallengeEvent) -> Result<()> {
        let key = child_key(&event.challenge_id, &event.id);
        self.events
            .insert(key.as_bytes(), minicbor::to_vec(event)?)?;
        Ok(())
    }

    /// Append several rows in one atomic batch. Completion writes the
    /// completed event and every winner announcement together.
    pub fn append_events(&self, events: &[ChallengeEvent]) -> Result<()> {
        let mut batch = Batch::default();
        for event in events {
            let key = child_key(&event.challenge_id, &event.id);
            batch.insert(key.as_bytes(), minicbor::to_vec(event)?);
        }
        self.events.apply_batch(batch)?;
        Ok(())
    }

    /// One challenge's ledger, newest first.
    pub fn events_of(&self, challenge_id: &str) -> Result<Vec<ChallengeEvent>> {
        let mut out = Vec::new();
        for row in self.events.scan_prefix(child_prefix(challenge_id)).rev() {
            let (_, bytes) = row?;
            out.push(decode_row(&bytes)?);
        }
        Ok(out)
    }

    pub fn all_events(&self) -> Result<Vec<ChallengeEvent>> {
        let mut out = Vec::new();
        for row in self.events.iter() {
            let (_, bytes) = row?;
            out.push(decode_row(&bytes)?);
        }
        Ok(out)
    }

    // ---- replay guard ----

    /// Claim a transaction hash for `event_id`. Returns false when some
    /// earlier delivery already claimed it.
    pub fn claim_tx(&self, tx_hash: &str, event_id: &str) -> Result<bool> {
        let outcome = self.seen_tx.compare_and_swap(
            tx_hash.as_bytes(),
            None as Option<&[u8]>,
            Some(event_id.as_bytes()),
        )?;
        Ok(outcome.is_ok())
    }

    // ---- classification job queue ----

    pub fn enqueue_job(&self, job: &ClassificationJob) -> Result<()> {
        self.pending_jobs.insert(
            job.request.challenge_id.as_bytes(),
            minicbor::to_vec(job)?,
        )?;
        Ok(())
    }

    /// Unfinished jobs, oldest challenge id first. Startup recovery
    /// re-enqueues everything this returns.
    pub fn pending_jobs(&self) -> Result<Vec<ClassificationJob>> {
        let mut out = Vec::new();
        for row in self.pending_jobs.iter() {
            let (_, bytes) = row?;
            out.push(decode_row(&bytes)?);
        }
        Ok(out)
    }

    pub fn finish_job(&self, challenge_id: &str) -> Result<()> {
        self.pending_jobs.remove(challenge_id.as_bytes())?;
        Ok(())
    }

    // ---- chain id index ----

    pub fn index_chain_id(&self, chain_challenge_id: u64, challenge_id: &str) -> Result<()> {
        self.chain_idx
            .insert(chain_challenge_id.to_be_bytes(), challenge_id.as_bytes())?;
        Ok(())
    }

    pub fn challenge_for_chain_id(&self, chain_challenge_id: u64) -> Result<Option<String>> {
        match self.chain_idx.get(chain_challenge_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(
                String::from_utf8(bytes.to_vec()).map_err(|e| Error::Codec(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }
}
