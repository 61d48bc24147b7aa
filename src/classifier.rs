//! Classification collaborator contract.
//!
//! An external service decides whether a challenge is fundible and which
//! domain it belongs to. The crate only speaks the trait below; the
//! bundled [`KeywordClassifier`] is a local implementation sufficient for
//! tests, demos and offline operation.
use crate::challenge::{Challenge, TimeStamp};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

/// Domain label stamped on a challenge when classification fails.
pub const UNCLASSIFIED_DOMAIN: &str = "Unclassified";

/// Proposer-supplied urgency hint, forwarded verbatim to the classifier.
#[derive(
    minicbor::Encode,
    minicbor::Decode,
    serde::Deserialize,
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    #[n(0)]
    Low,
    #[n(1)]
    #[default]
    Medium,
    #[n(2)]
    High,
}

/// Everything the classifier is told about a challenge.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct ClassificationRequest {
    #[n(0)]
    pub challenge_id: String,
    #[n(1)]
    pub challenge_text: String,
    #[n(2)]
    pub requested_reward: u64,
    #[n(3)]
    pub proposer: String,
    #[n(4)]
    pub urgency: Urgency,
}

impl ClassificationRequest {
    pub fn for_challenge(challenge: &Challenge, urgency: Urgency) -> Self {
        Self {
            challenge_id: challenge.id.clone(),
            challenge_text: format!("{} {}", challenge.title, challenge.description),
            requested_reward: challenge.reward,
            proposer: challenge.creator.clone(),
            urgency,
        }
    }
}

/// A classifier's answer. The wire form of `fundible` is either a JSON
/// boolean or the strings `"yes"`/`"no"`; both deserialize to the flag.
#[derive(serde::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClassificationVerdict {
    #[serde(deserialize_with = "fundible_flag")]
    pub fundible: bool,
    pub domain: String,
}

fn fundible_flag<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Flag(bool),
        Text(String),
    }

    match Wire::deserialize(deserializer)? {
        Wire::Flag(flag) => Ok(flag),
        Wire::Text(text) => Ok(text.eq_ignore_ascii_case("yes")),
    }
}

/// How a finished classification attempt lands on the lifecycle service.
/// `Failed` covers collaborator errors and timeouts alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationOutcome {
    Fundible { domain: String },
    NotFundible { domain: String },
    Failed { reason: String },
}

impl From<ClassificationVerdict> for ClassificationOutcome {
    fn from(verdict: ClassificationVerdict) -> Self {
        if verdict.fundible {
            Self::Fundible {
                domain: verdict.domain,
            }
        } else {
            Self::NotFundible {
                domain: verdict.domain,
            }
        }
    }
}

/// Durable row for a classification that has not completed yet. Survives
/// restarts so a crash between creation and classification loses nothing.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct ClassificationJob {
    #[n(0)]
    pub request: ClassificationRequest,
    #[n(1)]
    pub enqueued_at: TimeStamp<Utc>,
}

impl ClassificationJob {
    pub fn new(request: ClassificationRequest) -> Self {
        Self {
            request,
            enqueued_at: TimeStamp::new(),
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> anyhow::Result<ClassificationVerdict>;
}

/// Keyword classifier matching the hosted model's fast path: monetary
/// keywords or a positive requested reward decide fundibility, and the
/// first matching keyword bucket decides the domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

const MONEY_KEYWORDS: [&str; 11] = [
    "$", "usd", "pyusd", "usdc", "fund", "reward", "payment", "prize", "money", "pay", "dollar",
];

// Order matters, first bucket with a hit wins.
const DOMAIN_BUCKETS: [(&str, &[&str]); 6] = [
    (
        "DeFi",
        &["defi", "lending", "protocol", "swap", "liquidity", "yield"],
    ),
    ("NFT", &["nft", "token", "mint", "collectible", "art"]),
    ("Gaming", &["game", "gaming", "play", "metaverse"]),
    ("DAO", &["dao", "governance", "voting", "proposal"]),
    ("FinTech", &["finance", "fintech", "banking", "payment"]),
    (
        "Blockchain",
        &["smart contract", "blockchain", "web3", "dapp"],
    ),
];

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> anyhow::Result<ClassificationVerdict> {
        let text = request.challenge_text.to_lowercase();

        let fundible = MONEY_KEYWORDS.iter().any(|keyword| text.contains(keyword))
            || request.requested_reward > 0;

        let domain = DOMAIN_BUCKETS
            .iter()
            .find(|(_, words)| words.iter().any(|word| text.contains(word)))
            .map(|(name, _)| (*name).to_owned())
            .unwrap_or_else(|| "General".to_owned());

        Ok(ClassificationVerdict { fundible, domain })
    }
}
