//! End-to-end walkthrough: create, classify, anchor, join, stake,
//! answer, settle. Run with `cargo run --example lifecycle`.

use gauntlet::chain::{ChainEvent, MockChain, run_chain_listener};
use gauntlet::challenge::{ChallengeDraft, TimeStamp};
use gauntlet::classifier::KeywordClassifier;
use gauntlet::config::GauntletConfig;
use gauntlet::participant::JoinRequest;
use gauntlet::query::Queries;
use gauntlet::service::LifecycleService;
use gauntlet::store::Store;
use gauntlet::worker::{JobQueue, run_classifier_worker};
use std::sync::Arc;
use std::time::Duration;

// the worker and listener run on their own tasks, give them a beat
async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let dir = tempfile::tempdir()?;
    let db = Arc::new(sled::open(dir.path().join("gauntlet-demo.db"))?);
    let store = Store::open(db)?;

    let (queue, jobs) = JobQueue::bounded(16);
    let service = Arc::new(LifecycleService::new(
        store.clone(),
        queue,
        GauntletConfig::default(),
    )?);
    let _worker = run_classifier_worker(service.clone(), Arc::new(KeywordClassifier), jobs);

    let (chain, facts) = MockChain::channel(16);
    let _listener = run_chain_listener(service.clone(), facts);

    // a sponsor posts a paid challenge
    let challenge = service.create_challenge(
        ChallengeDraft::new()
            .set_title("Name the capital of France")
            .set_description("First correct answer takes the 100 USDC prize")
            .set_answer("Paris")
            .set_reward(100)
            .set_creator("alice")
            .set_judging_criteria("exact match after normalisation"),
    )?;
    settle().await;

    // the sponsor contract registers the escrow on-chain
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
    settle().await;

    // two challengers stake their way in
    let carol = service.join_challenge(
        &challenge.id,
        JoinRequest {
            identity: "carol".to_owned(),
            wallet: Some("0xcafe".to_owned()),
            stake: 10,
        },
    )?;
    let dave = service.join_challenge(
        &challenge.id,
        JoinRequest {
            identity: "dave".to_owned(),
            wallet: Some("0xd00d".to_owned()),
            stake: 10,
        },
    )?;
    for wallet in ["0xcafe", "0xd00d"] {
        chain
            .emit(ChainEvent::ChallengeFunded {
                chain_challenge_id: chain_id,
                participant: wallet.to_owned(),
                amount: 10,
            })
            .await?;
    }
    settle().await;

    // dave misses, carol takes the pot
    let miss = service.submit_answer(&challenge.id, &dave.id, "London", None)?;
    let hit = service.submit_answer(&challenge.id, &carol.id, "  PARIS  ", None)?;
    println!("dave's submission:  {:?}", miss.status);
    println!("carol's submission: {:?}", hit.status);

    let queries = Queries::new(store, GauntletConfig::default())?;
    println!(
        "\nledger (newest first):\n{}",
        serde_json::to_string_pretty(&queries.events_for(&challenge.id, None)?)?
    );
    println!(
        "\ncreator dashboard:\n{}",
        serde_json::to_string_pretty(&queries.challenge_dashboard(&challenge.id, "alice")?)?
    );
    println!(
        "\nplatform stats:\n{}",
        serde_json::to_string_pretty(&queries.platform_stats()?)?
    );

    Ok(())
}
