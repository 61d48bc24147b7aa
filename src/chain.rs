//! Chain event collaborator contract and the in-process mock chain.
//!
//! The real deployment watches a sponsor/validator contract pair and turns
//! their logs into typed facts. This crate consumes those facts through
//! [`ChainEventSource`]; [`MockChain`] is the bundled stand-in that
//! fabricates transaction hashes and block numbers the way the hosted
//! backend mocked its signing.
use crate::challenge::TimeStamp;
use crate::service::LifecycleService;
use crate::utils;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A typed fact observed on-chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    /// The sponsor contract registered a challenge and escrowed its reward.
    ChallengeCreated {
        chain_challenge_id: u64,
        creator: String,
        stake_amount: u64,
        domain: String,
        /// Points back at the off-chain record; the last path segment is
        /// the challenge id.
        metadata_uri: String,
        deadline: TimeStamp<Utc>,
    },
    /// A participant's stake landed in the escrow.
    ChallengeFunded {
        chain_challenge_id: u64,
        participant: String,
        amount: u64,
    },
    /// The validator contract recorded a verification verdict.
    ChallengeVerified {
        chain_challenge_id: u64,
        correct: bool,
    },
    /// The escrow paid out and closed the challenge.
    ChallengeCompleted {
        chain_challenge_id: u64,
        winner: String,
        reward: u64,
    },
    /// An answer commitment was posted on-chain.
    AnswerSubmitted {
        chain_challenge_id: u64,
        participant: String,
        correct: bool,
    },
    /// The validator contract announced a winner.
    WinnerFound {
        chain_challenge_id: u64,
        winner: String,
    },
}

impl ChainEvent {
    /// Chain-side id of the challenge this fact is about.
    pub fn subject_chain_id(&self) -> u64 {
        match self {
            Self::ChallengeCreated {
                chain_challenge_id, ..
            }
            | Self::ChallengeFunded {
                chain_challenge_id, ..
            }
            | Self::ChallengeVerified {
                chain_challenge_id, ..
            }
            | Self::ChallengeCompleted {
                chain_challenge_id, ..
            }
            | Self::AnswerSubmitted {
                chain_challenge_id, ..
            }
            | Self::WinnerFound {
                chain_challenge_id, ..
            } => *chain_challenge_id,
        }
    }
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChallengeCreated { .. } => "challenge-created",
            Self::ChallengeFunded { .. } => "challenge-funded",
            Self::ChallengeVerified { .. } => "challenge-verified",
            Self::ChallengeCompleted { .. } => "challenge-completed",
            Self::AnswerSubmitted { .. } => "answer-submitted",
            Self::WinnerFound { .. } => "winner-found",
        }
    }
}

/// One delivered fact with its provenance. The transaction hash doubles
/// as the replay-suppression key on the consuming side.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainFact {
    pub event: ChainEvent,
    pub tx_hash: String,
    pub block_number: u64,
    pub observed_at: TimeStamp<Utc>,
}

/// Anything that can deliver observed chain facts, one at a time.
/// Returning `None` means the source is closed and the listener may stop.
#[async_trait]
pub trait ChainEventSource: Send {
    async fn next_fact(&mut self) -> Option<ChainFact>;
}

#[async_trait]
impl ChainEventSource for mpsc::Receiver<ChainFact> {
    async fn next_fact(&mut self) -> Option<ChainFact> {
        self.recv().await
    }
}

/// In-process chain double. Clone freely; all clones share the same id
/// counters and feed the same subscription.
#[derive(Clone)]
pub struct MockChain {
    facts: mpsc::Sender<ChainFact>,
    next_chain_id: Arc<AtomicU64>,
    next_block: Arc<AtomicU64>,
}

impl MockChain {
    /// Build a chain double plus the receiving end of its fact stream.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ChainFact>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                facts: tx,
                next_chain_id: Arc::new(AtomicU64::new(1)),
                next_block: Arc::new(AtomicU64::new(1)),
            },
            rx,
        )
    }
    /// Sequential chain-side challenge ids, the way the sponsor contract
    /// numbers its registrations.
    pub fn allocate_chain_id(&self) -> u64 {
        self.next_chain_id.fetch_add(1, Ordering::Relaxed)
    }
    /// Mint provenance for `event` and deliver it to the subscription.
    /// Returns the delivered fact so callers know the transaction hash.
    pub async fn emit(&self, event: ChainEvent) -> anyhow::Result<ChainFact> {
        let fact = ChainFact {
            event,
            tx_hash: utils::mock_tx_hash(),
            block_number: self.next_block.fetch_add(1, Ordering::Relaxed),
            observed_at: TimeStamp::new(),
        };
        self.facts.send(fact.clone()).await?;
        Ok(fact)
    }
    /// Redeliver an already-emitted fact verbatim, provenance included.
    /// Chain log replays look exactly like this.
    pub async fn replay(&self, fact: &ChainFact) -> anyhow::Result<()> {
        self.facts.send(fact.clone()).await?;
        Ok(())
    }
}

/// Drain `source` and apply every fact to the lifecycle service. Bad
/// facts are logged and skipped, never fatal to the listener.
pub fn run_chain_listener<S>(service: Arc<LifecycleService>, mut source: S) -> JoinHandle<()>
where
    S: ChainEventSource + 'static,
{
    tokio::spawn(async move {
        while let Some(fact) = source.next_fact().await {
            let event_name = fact.event.name();
            match service.apply_chain_event(&fact) {
                Ok(outcome) => {
                    tracing::debug!(
                        event = event_name,
                        tx = %fact.tx_hash,
                        ?outcome,
                        "chain fact processed"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        event = event_name,
                        tx = %fact.tx_hash,
                        error = %e,
                        "failed to apply chain fact"
                    );
                }
            }
        }
        tracing::info!("chain event source closed, listener stopping");
    })
}
