use anyhow::Context;
use async_trait::async_trait;
use gauntlet::chain::{ChainEvent, ChainFact, MockChain, run_chain_listener};
use gauntlet::challenge::{ChallengeDraft, ChallengeStatus, TimeStamp};
use gauntlet::classifier::{
    ClassificationOutcome, ClassificationRequest, ClassificationVerdict, Classifier,
    KeywordClassifier,
};
use gauntlet::config::GauntletConfig;
use gauntlet::error::Error;
use gauntlet::events::EventKind;
use gauntlet::participant::{JoinRequest, ParticipantStatus, SubmissionStatus};
use gauntlet::query::Queries;
use gauntlet::service::{ApplyOutcome, ChainApplyOutcome, LifecycleService};
use gauntlet::store::Store;
use gauntlet::worker::{JobQueue, run_classifier_worker};
use sled::open;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Poll until the store reflects an asynchronous transition.
async fn wait_for<F>(what: &str, check: F) -> anyhow::Result<()>
where
    F: Fn() -> anyhow::Result<bool>,
{
    for _ in 0..200 {
        if check()? {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("timed out waiting for {what}")
}

fn capital_of_france(reward: u64) -> ChallengeDraft {
    ChallengeDraft::new()
        .set_title("Name the capital of France")
        .set_description("First correct answer takes the full USDC reward")
        .set_answer("Paris")
        .set_reward(reward)
        .set_creator("Alice")
        .set_judging_criteria("exact match after normalisation")
}

fn join(identity: &str, stake: u64) -> JoinRequest {
    JoinRequest {
        identity: identity.to_owned(),
        wallet: None,
        stake,
    }
}

/// A classifier that never answers within any reasonable deadline.
struct StallingClassifier;

#[async_trait]
impl Classifier for StallingClassifier {
    async fn classify(
        &self,
        _request: &ClassificationRequest,
    ) -> anyhow::Result<ClassificationVerdict> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        anyhow::bail!("never reached")
    }
}

#[tokio::test]
async fn create_classify_fund_join_and_win() -> anyhow::Result<()> {
    // Sled uses file-based locking to prevent concurrent access, so only one test
    // can hold the lock at a time. As is good practice in testing create separate
    // databases for each test. The db is created on temp for simplified cleanup.
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("happy_path.db"))?);
    db.clear()?;

    let store = Store::open(db)?;
    let (queue, jobs) = JobQueue::bounded(8);
    let service = Arc::new(LifecycleService::new(
        store.clone(),
        queue,
        GauntletConfig::default(),
    )?);
    let _worker = run_classifier_worker(service.clone(), Arc::new(KeywordClassifier), jobs);

    let challenge = service
        .create_challenge(capital_of_france(100))
        .context("Challenge failed on create: ")?;
    assert_eq!(challenge.status, ChallengeStatus::Pending);

    // the keyword classifier runs in the background
    wait_for("classification", || {
        Ok(store.get_challenge(&challenge.id)?.status == ChallengeStatus::Funded)
    })
    .await?;
    let funded = store.get_challenge(&challenge.id)?;
    assert!(funded.fundible);
    assert_eq!(funded.domain.as_deref(), Some("General"));

    // the sponsor contract confirms the escrow
    let (chain, facts) = MockChain::channel(8);
    let _listener = run_chain_listener(service.clone(), facts);
    let chain_id = chain.allocate_chain_id();
    chain
        .emit(ChainEvent::ChallengeCreated {
            chain_challenge_id: chain_id,
            creator: "0xa11ce".to_owned(),
            stake_amount: 100,
            domain: "General".to_owned(),
            metadata_uri: format!("https://gauntlet.example/challenges/{}", challenge.id),
            deadline: TimeStamp::new(),
        })
        .await?;
    wait_for("anchoring", || {
        Ok(store.get_challenge(&challenge.id)?.status == ChallengeStatus::Live)
    })
    .await?;
    let live = store.get_challenge(&challenge.id)?;
    assert_eq!(live.chain_challenge_id, Some(chain_id));
    assert!(live.funding_tx_hash.is_some());

    let participant = service
        .join_challenge(
            &challenge.id,
            JoinRequest {
                identity: "Carol".to_owned(),
                wallet: Some("0xCAFE".to_owned()),
                stake: 10,
            },
        )
        .context("Challenge failed on join: ")?;
    assert_eq!(participant.status, ParticipantStatus::Pending);

    chain
        .emit(ChainEvent::ChallengeFunded {
            chain_challenge_id: chain_id,
            participant: "0xCAFE".to_owned(),
            amount: 10,
        })
        .await?;
    wait_for("stake confirmation", || {
        Ok(store.get_participant(&challenge.id, &participant.id)?.status
            == ParticipantStatus::Staked)
    })
    .await?;

    // normalisation makes the padded upper-case answer match
    let submission = service.submit_answer(&challenge.id, &participant.id, "  PARIS  ", None)?;
    assert_eq!(submission.status, SubmissionStatus::Verified);

    let done = store.get_challenge(&challenge.id)?;
    assert_eq!(done.status, ChallengeStatus::Completed);
    assert!(done.reward_released);

    let winner = store.get_participant(&challenge.id, &participant.id)?;
    assert_eq!(winner.status, ParticipantStatus::Winner);
    assert_eq!(winner.reward_share, Some(100));
    assert!(winner.reward_tx_hash.is_some());

    let queries = Queries::new(store.clone(), GauntletConfig::default())?;
    let events = queries.events_for(&challenge.id, None)?;
    let kinds: Vec<&str> = events.iter().map(|e| e.kind.as_str()).collect();
    assert!(kinds.contains(&"CHALLENGE_CREATED"));
    assert!(kinds.contains(&"PARTICIPANT_FUNDED"));
    assert!(kinds.contains(&"ANSWER_SUBMITTED"));
    assert!(kinds.contains(&"CHALLENGE_COMPLETED"));
    assert!(kinds.contains(&"WINNER_FOUND"));
    // the ledger reads newest first
    assert_eq!(events.first().map(|e| e.kind.as_str()), Some("WINNER_FOUND"));

    let rollup = queries.user_rollup("carol")?;
    assert_eq!(rollup.wins, 1);
    assert_eq!(rollup.total_won, 100);

    Ok(())
}

#[test]
fn wrong_answer_settles_only_the_submitter() -> anyhow::Result<()> {
    // Sled uses file-based locking to prevent concurrent access, so only one test
    // can hold the lock at a time. As is good practice in testing create separate
    // databases for each test. The db is created on temp for simplified cleanup.
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("wrong_answer.db"))?);
    db.clear()?;

    let store = Store::open(db)?;
    let (queue, _jobs) = JobQueue::bounded(8);
    let service = LifecycleService::new(store.clone(), queue, GauntletConfig::default())?;

    let challenge = service.create_challenge(capital_of_france(90))?;
    let applied = service.apply_classification(
        &challenge.id,
        ClassificationOutcome::Fundible {
            domain: "General".to_owned(),
        },
    )?;
    assert_eq!(applied, ApplyOutcome::Applied);

    let first = service.join_challenge(&challenge.id, join("dave", 5))?;
    let second = service.join_challenge(&challenge.id, join("erin", 5))?;

    let miss = service.submit_answer(&challenge.id, &first.id, "London", None)?;
    assert_eq!(miss.status, SubmissionStatus::Rejected);
    assert_eq!(
        store.get_participant(&challenge.id, &first.id)?.status,
        ParticipantStatus::Loser
    );
    // a miss leaves the challenge open
    assert_eq!(
        store.get_challenge(&challenge.id)?.status,
        ChallengeStatus::Funded
    );

    // one submission per participant, even after a miss
    let again = service.submit_answer(&challenge.id, &first.id, "Paris", None);
    assert!(matches!(again, Err(Error::AlreadySubmitted)));

    let hit = service.submit_answer(&challenge.id, &second.id, "paris", None)?;
    assert_eq!(hit.status, SubmissionStatus::Verified);

    let done = store.get_challenge(&challenge.id)?;
    assert_eq!(done.status, ChallengeStatus::Completed);
    let winner = store.get_participant(&challenge.id, &second.id)?;
    assert_eq!(winner.status, ParticipantStatus::Winner);
    assert_eq!(winner.reward_share, Some(90));
    assert_eq!(
        store.get_participant(&challenge.id, &first.id)?.status,
        ParticipantStatus::Loser
    );

    // completed challenges accept nothing further
    assert!(service.join_challenge(&challenge.id, join("frank", 5)).is_err());
    assert!(
        service
            .submit_answer(&challenge.id, &second.id, "paris", None)
            .is_err()
    );

    Ok(())
}

#[tokio::test]
async fn classifier_timeout_rejects_the_challenge() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("timeout.db"))?);
    db.clear()?;

    let store = Store::open(db)?;
    let (queue, jobs) = JobQueue::bounded(8);
    let config = GauntletConfig {
        classification_timeout_ms: 50,
        ..GauntletConfig::default()
    };
    let service = Arc::new(LifecycleService::new(store.clone(), queue, config)?);
    let _worker = run_classifier_worker(service.clone(), Arc::new(StallingClassifier), jobs);

    let challenge = service.create_challenge(capital_of_france(100))?;
    wait_for("rejection", || {
        Ok(store.get_challenge(&challenge.id)?.status == ChallengeStatus::Rejected)
    })
    .await?;

    let rejected = store.get_challenge(&challenge.id)?;
    assert!(!rejected.fundible);
    assert_eq!(rejected.domain.as_deref(), Some("Unclassified"));

    let queries = Queries::new(store.clone(), GauntletConfig::default())?;
    let events = queries.events_for(&challenge.id, Some(EventKind::Rejected))?;
    assert_eq!(events.len(), 1);
    let reason = events[0].payload["reason"].as_str().unwrap_or_default();
    assert!(reason.contains("timed out"), "unexpected reason: {reason}");

    // the durable job is gone once the outcome landed
    assert!(service.pending_classifications()?.is_empty());

    Ok(())
}

#[test]
fn duplicate_join_is_refused() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("duplicate_join.db"))?);
    db.clear()?;

    let store = Store::open(db)?;
    let (queue, _jobs) = JobQueue::bounded(8);
    let service = LifecycleService::new(store.clone(), queue, GauntletConfig::default())?;

    let challenge = service.create_challenge(capital_of_france(100))?;
    service.apply_classification(
        &challenge.id,
        ClassificationOutcome::Fundible {
            domain: "General".to_owned(),
        },
    )?;

    service.join_challenge(&challenge.id, join("carol", 10))?;

    // identities normalise before the uniqueness check
    let dup = service
        .join_challenge(&challenge.id, join("  CAROL ", 3))
        .unwrap_err();
    assert!(matches!(&dup, Error::AlreadyJoined));
    assert!(dup.is_conflict());
    assert_eq!(store.participants_of(&challenge.id)?.len(), 1);

    let broke = service.join_challenge(&challenge.id, join("gina", 0));
    assert!(matches!(broke, Err(Error::Validation(_))));

    Ok(())
}

#[test]
fn chain_facts_apply_once() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("chain_replay.db"))?);
    db.clear()?;

    let store = Store::open(db)?;
    let (queue, _jobs) = JobQueue::bounded(8);
    let service = LifecycleService::new(store.clone(), queue, GauntletConfig::default())?;

    let challenge = service.create_challenge(capital_of_france(100))?;
    service.apply_classification(
        &challenge.id,
        ClassificationOutcome::Fundible {
            domain: "DeFi".to_owned(),
        },
    )?;

    let created = ChainFact {
        event: ChainEvent::ChallengeCreated {
            chain_challenge_id: 7,
            creator: "0xa11ce".to_owned(),
            stake_amount: 100,
            domain: "DeFi".to_owned(),
            metadata_uri: format!("https://gauntlet.example/challenges/{}", challenge.id),
            deadline: TimeStamp::new(),
        },
        tx_hash: "0x01".to_owned(),
        block_number: 1,
        observed_at: TimeStamp::new(),
    };
    assert_eq!(
        service.apply_chain_event(&created)?,
        ChainApplyOutcome::Applied
    );
    assert_eq!(
        service.apply_chain_event(&created)?,
        ChainApplyOutcome::AlreadyApplied
    );

    let anchored = store.get_challenge(&challenge.id)?;
    assert_eq!(anchored.status, ChallengeStatus::Live);
    assert_eq!(anchored.chain_challenge_id, Some(7));
    assert_eq!(anchored.funding_tx_hash.as_deref(), Some("0x01"));

    let queries = Queries::new(store.clone(), GauntletConfig::default())?;
    assert_eq!(
        queries
            .events_for(&challenge.id, Some(EventKind::ChallengeCreated))?
            .len(),
        1
    );

    // facts about unknown chain ids are ignored without writes
    let stray = ChainFact {
        event: ChainEvent::ChallengeFunded {
            chain_challenge_id: 99,
            participant: "0xcafe".to_owned(),
            amount: 5,
        },
        tx_hash: "0x02".to_owned(),
        block_number: 2,
        observed_at: TimeStamp::new(),
    };
    assert_eq!(
        service.apply_chain_event(&stray)?,
        ChainApplyOutcome::Ignored
    );

    let participant = service.join_challenge(
        &challenge.id,
        JoinRequest {
            identity: "carol".to_owned(),
            wallet: Some("0xCAFE".to_owned()),
            stake: 10,
        },
    )?;
    let staked = ChainFact {
        event: ChainEvent::ChallengeFunded {
            chain_challenge_id: 7,
            participant: "0xcafe".to_owned(),
            amount: 10,
        },
        tx_hash: "0x03".to_owned(),
        block_number: 3,
        observed_at: TimeStamp::new(),
    };
    assert_eq!(
        service.apply_chain_event(&staked)?,
        ChainApplyOutcome::Applied
    );
    assert_eq!(
        service.apply_chain_event(&staked)?,
        ChainApplyOutcome::AlreadyApplied
    );
    let row = store.get_participant(&challenge.id, &participant.id)?;
    assert_eq!(row.status, ParticipantStatus::Staked);
    assert_eq!(row.stake_tx_hash.as_deref(), Some("0x03"));
    assert_eq!(
        queries
            .events_for(&challenge.id, Some(EventKind::ParticipantFunded))?
            .len(),
        1
    );

    Ok(())
}

#[tokio::test]
async fn worker_recovers_jobs_left_behind() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("recovery.db");

    // first run: the challenge is created but nothing classifies it
    let challenge_id = {
        let db = Arc::new(open(&db_path)?);
        let store = Store::open(db)?;
        let (queue, _jobs) = JobQueue::bounded(8);
        let service = LifecycleService::new(store, queue, GauntletConfig::default())?;
        let challenge = service.create_challenge(capital_of_france(100))?;
        assert_eq!(service.pending_classifications()?.len(), 1);
        challenge.id
    };

    // second run: the recovery scan picks the job up without a nudge
    let db = Arc::new(open(&db_path)?);
    let store = Store::open(db)?;
    let (queue, jobs) = JobQueue::bounded(8);
    let service = Arc::new(LifecycleService::new(
        store.clone(),
        queue,
        GauntletConfig::default(),
    )?);
    let _worker = run_classifier_worker(service.clone(), Arc::new(KeywordClassifier), jobs);

    wait_for("recovered classification", || {
        Ok(store.get_challenge(&challenge_id)?.status == ChallengeStatus::Funded)
    })
    .await?;
    assert!(service.pending_classifications()?.is_empty());

    Ok(())
}
