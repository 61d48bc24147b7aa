//! Read surface over the challenge store.
//!
//! Everything here is derived from the persisted rows at call time.
//! Views never carry the stored answer commitment: a correct
//! submission's digest equals it, so the digests stay server-side and
//! callers only see statuses and provenance.
use crate::challenge::{Challenge, ChallengeStatus, TimeStamp};
use crate::config::GauntletConfig;
use crate::error::{Error, Result};
use crate::events::{ChallengeEvent, EventKind, EventPayload};
use crate::participant::{Participant, ParticipantStatus, Submission, SubmissionStatus};
use crate::store::Store;
use crate::utils;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

/// Optional narrowing for challenge listings. Empty filter lists
/// everything.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChallengeFilter {
    pub status: Option<ChallengeStatus>,
    pub domain: Option<String>,
    pub creator: Option<String>,
}

impl ChallengeFilter {
    fn admits(&self, challenge: &Challenge) -> bool {
        if let Some(status) = self.status {
            if challenge.status != status {
                return false;
            }
        }
        if let Some(domain) = &self.domain {
            match &challenge.domain {
                Some(assigned) if assigned.eq_ignore_ascii_case(domain) => {}
                _ => return false,
            }
        }
        if let Some(creator) = &self.creator {
            if challenge.creator != utils::normalize_identity(creator) {
                return false;
            }
        }
        true
    }
}

/// Public shape of a challenge. Same row minus the answer commitment,
/// plus row counts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub reward: u64,
    pub domain: Option<String>,
    pub created_at: TimeStamp<Utc>,
    pub creator: String,
    pub judging_criteria: Option<String>,
    pub status: ChallengeStatus,
    pub fundible: bool,
    pub chain_challenge_id: Option<u64>,
    pub funding_tx_hash: Option<String>,
    pub verification_tx_hash: Option<String>,
    pub reward_released: bool,
    pub participant_count: u64,
    pub submission_count: u64,
}

impl ChallengeView {
    fn from_row(challenge: Challenge, participant_count: u64, submission_count: u64) -> Self {
        Self {
            id: challenge.id,
            title: challenge.title,
            description: challenge.description,
            reward: challenge.reward,
            domain: challenge.domain,
            created_at: challenge.created_at,
            creator: challenge.creator,
            judging_criteria: challenge.judging_criteria,
            status: challenge.status,
            fundible: challenge.fundible,
            chain_challenge_id: challenge.chain_challenge_id,
            funding_tx_hash: challenge.funding_tx_hash,
            verification_tx_hash: challenge.verification_tx_hash,
            reward_released: challenge.reward_released,
            participant_count,
            submission_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: String,
    pub identity: String,
    pub wallet: String,
    pub stake: u64,
    pub status: ParticipantStatus,
    pub joined_at: TimeStamp<Utc>,
    pub stake_tx_hash: Option<String>,
    pub reward_tx_hash: Option<String>,
    pub reward_share: Option<u64>,
}

impl From<Participant> for ParticipantView {
    fn from(p: Participant) -> Self {
        Self {
            id: p.id,
            identity: p.identity,
            wallet: p.wallet,
            stake: p.stake,
            status: p.status,
            joined_at: p.joined_at,
            stake_tx_hash: p.stake_tx_hash,
            reward_tx_hash: p.reward_tx_hash,
            reward_share: p.reward_share,
        }
    }
}

/// A submission without its digest. Exposing the digest of a verified
/// submission would hand out the challenge commitment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionView {
    pub id: String,
    pub participant_id: String,
    pub status: SubmissionStatus,
    pub submitted_at: TimeStamp<Utc>,
    pub proof_uri: Option<String>,
    pub verification_tx_hash: Option<String>,
}

impl From<Submission> for SubmissionView {
    fn from(s: Submission) -> Self {
        Self {
            id: s.id,
            participant_id: s.participant_id,
            status: s.status,
            submitted_at: s.submitted_at,
            proof_uri: s.proof_uri,
            verification_tx_hash: s.verification_tx_hash,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    pub recorded_at: TimeStamp<Utc>,
}

impl From<ChallengeEvent> for EventView {
    fn from(event: ChallengeEvent) -> Self {
        Self {
            kind: event.kind().name().to_owned(),
            payload: event.payload_json(),
            id: event.id,
            tx_hash: event.tx_hash,
            block_number: event.block_number,
            recorded_at: event.recorded_at,
        }
    }
}

/// Creator-only drill-down into one challenge.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeDashboard {
    pub challenge: ChallengeView,
    pub participants: Vec<ParticipantView>,
    pub submissions: Vec<SubmissionView>,
    pub events: Vec<EventView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorDashboard {
    pub creator: String,
    pub total_challenges: u64,
    pub by_status: BTreeMap<String, u64>,
    /// Reward escrowed across funded, live and completed challenges.
    pub committed_reward: u64,
    pub challenges: Vec<ChallengeView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRollup {
    pub identity: String,
    pub challenges_joined: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_staked: u64,
    pub total_won: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainShare {
    pub domain: String,
    pub challenges: u64,
    /// Integer percentage of classified challenges, rounded half up.
    pub percent: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub at: TimeStamp<Utc>,
    pub challenge_id: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub total_challenges: u64,
    pub by_status: BTreeMap<String, u64>,
    pub unique_users: u64,
    pub committed_reward: u64,
    pub domains: Vec<DomainShare>,
    pub recent_activity: Vec<ActivityItem>,
}

pub struct Queries {
    store: Store,
    config: GauntletConfig,
}

impl Queries {
    pub fn new(store: Store, config: GauntletConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// Challenges matching the filter, newest first.
    pub fn list_challenges(&self, filter: &ChallengeFilter) -> Result<Vec<ChallengeView>> {
        let mut rows: Vec<Challenge> = self
            .store
            .all_challenges()?
            .into_iter()
            .filter(|c| filter.admits(c))
            .collect();
        rows.sort_by_key(|c| Reverse(c.created_at.to_datetime_utc()));
        rows.into_iter().map(|c| self.view_of(c)).collect()
    }

    pub fn challenge_view(&self, challenge_id: &str) -> Result<ChallengeView> {
        let challenge = self.store.get_challenge(challenge_id)?;
        self.view_of(challenge)
    }

    /// Full per-challenge drill-down, restricted to the creator.
    pub fn challenge_dashboard(
        &self,
        challenge_id: &str,
        requester: &str,
    ) -> Result<ChallengeDashboard> {
        let challenge = self.store.get_challenge(challenge_id)?;
        if challenge.creator != utils::normalize_identity(requester) {
            return Err(Error::Unauthorized(format!(
                "only the creator may view the dashboard of {challenge_id}"
            )));
        }
        let participants = self
            .store
            .participants_of(challenge_id)?
            .into_iter()
            .map(ParticipantView::from)
            .collect();
        let submissions = self
            .store
            .submissions_of(challenge_id)?
            .into_iter()
            .map(SubmissionView::from)
            .collect();
        let events = self
            .store
            .events_of(challenge_id)?
            .into_iter()
            .map(EventView::from)
            .collect();
        Ok(ChallengeDashboard {
            challenge: self.view_of(challenge)?,
            participants,
            submissions,
            events,
        })
    }

    pub fn creator_dashboard(&self, creator: &str) -> Result<CreatorDashboard> {
        let creator = utils::normalize_identity(creator);
        let filter = ChallengeFilter {
            creator: Some(creator.clone()),
            ..ChallengeFilter::default()
        };
        let challenges = self.list_challenges(&filter)?;

        let mut by_status: BTreeMap<String, u64> = BTreeMap::new();
        let mut committed_reward = 0u64;
        for view in &challenges {
            *by_status.entry(view.status.name().to_owned()).or_insert(0) += 1;
            if escrow_committed(view.status) {
                committed_reward += view.reward;
            }
        }
        Ok(CreatorDashboard {
            creator,
            total_challenges: challenges.len() as u64,
            by_status,
            committed_reward,
            challenges,
        })
    }

    /// Cross-challenge rollup for one participant identity.
    pub fn user_rollup(&self, identity: &str) -> Result<UserRollup> {
        let identity = utils::normalize_identity(identity);
        let mut rollup = UserRollup {
            identity: identity.clone(),
            challenges_joined: 0,
            wins: 0,
            losses: 0,
            total_staked: 0,
            total_won: 0,
        };
        for participant in self.store.all_participants()? {
            if participant.identity != identity {
                continue;
            }
            rollup.challenges_joined += 1;
            rollup.total_staked += participant.stake;
            match participant.status {
                ParticipantStatus::Winner => {
                    rollup.wins += 1;
                    rollup.total_won += participant.reward_share.unwrap_or(0);
                }
                ParticipantStatus::Loser => rollup.losses += 1,
                ParticipantStatus::Pending | ParticipantStatus::Staked => {}
            }
        }
        Ok(rollup)
    }

    pub fn platform_stats(&self) -> Result<PlatformStats> {
        let challenges = self.store.all_challenges()?;
        let participants = self.store.all_participants()?;

        let mut by_status: BTreeMap<String, u64> = BTreeMap::new();
        let mut committed_reward = 0u64;
        let mut domain_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut users: HashSet<String> = HashSet::new();
        for challenge in &challenges {
            *by_status
                .entry(challenge.status.name().to_owned())
                .or_insert(0) += 1;
            if escrow_committed(challenge.status) {
                committed_reward += challenge.reward;
            }
            if let Some(domain) = &challenge.domain {
                *domain_counts.entry(domain.clone()).or_insert(0) += 1;
            }
            users.insert(challenge.creator.clone());
        }
        for participant in &participants {
            users.insert(participant.identity.clone());
        }

        let classified: u64 = domain_counts.values().sum();
        let mut domains: Vec<DomainShare> = domain_counts
            .into_iter()
            .map(|(domain, count)| DomainShare {
                domain,
                challenges: count,
                percent: percent_half_up(count, classified),
            })
            .collect();
        domains.sort_by(|a, b| b.challenges.cmp(&a.challenges).then(a.domain.cmp(&b.domain)));

        Ok(PlatformStats {
            total_challenges: challenges.len() as u64,
            by_status,
            unique_users: users.len() as u64,
            committed_reward,
            domains,
            recent_activity: self.recent_activity(&challenges, &participants)?,
        })
    }

    /// Ledger rows for one challenge, newest first, optionally narrowed
    /// to one kind.
    pub fn events_for(
        &self,
        challenge_id: &str,
        kind: Option<EventKind>,
    ) -> Result<Vec<EventView>> {
        Ok(self
            .store
            .events_of(challenge_id)?
            .into_iter()
            .filter(|event| kind.map_or(true, |k| event.kind() == k))
            .map(EventView::from)
            .collect())
    }

    fn view_of(&self, challenge: Challenge) -> Result<ChallengeView> {
        let participant_count = self.store.participants_of(&challenge.id)?.len() as u64;
        let submission_count = self.store.submissions_of(&challenge.id)?.len() as u64;
        Ok(ChallengeView::from_row(
            challenge,
            participant_count,
            submission_count,
        ))
    }

    /// The platform feed: funded challenges, joins and wins, newest
    /// first, bounded by the configured limit. Challenges whose escrow
    /// never committed stay out of the feed.
    fn recent_activity(
        &self,
        challenges: &[Challenge],
        participants: &[Participant],
    ) -> Result<Vec<ActivityItem>> {
        let mut items: Vec<ActivityItem> = Vec::new();
        for challenge in challenges {
            if !escrow_committed(challenge.status) {
                continue;
            }
            items.push(ActivityItem {
                at: challenge.created_at.clone(),
                challenge_id: challenge.id.clone(),
                description: format!("challenge created by {}", challenge.creator),
            });
        }
        for participant in participants {
            items.push(ActivityItem {
                at: participant.joined_at.clone(),
                challenge_id: participant.challenge_id.clone(),
                description: format!("{} joined", participant.identity),
            });
        }
        for event in self.store.all_events()? {
            if let EventPayload::WinnerFound {
                winner,
                reward_share,
            } = &event.payload
            {
                items.push(ActivityItem {
                    at: event.recorded_at.clone(),
                    challenge_id: event.challenge_id.clone(),
                    description: format!("{winner} won {reward_share}"),
                });
            }
        }
        items.sort_by_key(|item| Reverse(item.at.to_datetime_utc()));
        items.truncate(self.config.activity_feed_limit);
        Ok(items)
    }
}

fn escrow_committed(status: ChallengeStatus) -> bool {
    matches!(
        status,
        ChallengeStatus::Funded | ChallengeStatus::Live | ChallengeStatus::Completed
    )
}

fn percent_half_up(count: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    (count * 200 + total) / (total * 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeDraft;
    use crate::classifier::Urgency;
    use crate::events::ChallengeEvent;
    use tempfile::TempDir;

    fn queries() -> (Queries, Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = std::sync::Arc::new(sled::open(dir.path()).unwrap());
        let store = Store::open(db).unwrap();
        (
            Queries::new(store.clone(), GauntletConfig::default()).unwrap(),
            store,
            dir,
        )
    }

    fn seeded_challenge(
        store: &Store,
        creator: &str,
        status: ChallengeStatus,
        domain: Option<&str>,
        reward: u64,
    ) -> Challenge {
        let mut challenge = ChallengeDraft::new()
            .set_title("Capture the digest")
            .set_description("first correct answer wins")
            .set_answer("paris")
            .set_reward(reward)
            .set_creator(creator)
            .set_urgency(Urgency::Medium)
            .finalise()
            .unwrap();
        challenge.status = status;
        challenge.domain = domain.map(str::to_owned);
        store.put_challenge(&challenge).unwrap();
        challenge
    }

    fn seeded_participant(store: &Store, challenge_id: &str, identity: &str, stake: u64) -> Participant {
        let participant = Participant::new(challenge_id, identity, "0xabc", stake).unwrap();
        store
            .reserve_participant(challenge_id, identity, &participant.id)
            .unwrap();
        store.put_participant(&participant).unwrap();
        participant
    }

    #[test]
    fn construction_rejects_an_invalid_config() {
        let dir = TempDir::new().unwrap();
        let db = std::sync::Arc::new(sled::open(dir.path()).unwrap());
        let store = Store::open(db).unwrap();

        let bad = GauntletConfig {
            activity_feed_limit: 0,
            ..GauntletConfig::default()
        };
        assert!(matches!(Queries::new(store, bad), Err(Error::Validation(_))));
    }

    #[test]
    fn filter_narrows_by_status_domain_and_creator() {
        let (queries, store, _dir) = queries();
        seeded_challenge(&store, "alice", ChallengeStatus::Live, Some("DeFi"), 100);
        seeded_challenge(&store, "alice", ChallengeStatus::Rejected, Some("NFT"), 50);
        seeded_challenge(&store, "bob", ChallengeStatus::Live, Some("DeFi"), 70);

        let all = queries.list_challenges(&ChallengeFilter::default()).unwrap();
        assert_eq!(all.len(), 3);

        let live = queries
            .list_challenges(&ChallengeFilter {
                status: Some(ChallengeStatus::Live),
                ..ChallengeFilter::default()
            })
            .unwrap();
        assert_eq!(live.len(), 2);

        let alices_defi = queries
            .list_challenges(&ChallengeFilter {
                creator: Some("Alice".to_owned()),
                domain: Some("defi".to_owned()),
                ..ChallengeFilter::default()
            })
            .unwrap();
        assert_eq!(alices_defi.len(), 1);
        assert_eq!(alices_defi[0].creator, "alice");
    }

    #[test]
    fn views_never_leak_the_commitment() {
        let (queries, store, _dir) = queries();
        let challenge = seeded_challenge(&store, "alice", ChallengeStatus::Live, None, 100);

        let view = queries.challenge_view(&challenge.id).unwrap();
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains(&challenge.correct_answer_hash));
        assert!(!json.contains("correctAnswerHash"));
    }

    #[test]
    fn dashboard_is_creator_only() {
        let (queries, store, _dir) = queries();
        let challenge = seeded_challenge(&store, "alice", ChallengeStatus::Live, None, 100);
        seeded_participant(&store, &challenge.id, "carol", 10);

        let dashboard = queries.challenge_dashboard(&challenge.id, "Alice").unwrap();
        assert_eq!(dashboard.participants.len(), 1);

        let denied = queries.challenge_dashboard(&challenge.id, "mallory");
        assert!(matches!(denied, Err(Error::Unauthorized(_))));
    }

    #[test]
    fn user_rollup_counts_wins_and_stakes() {
        let (queries, store, _dir) = queries();
        let first = seeded_challenge(&store, "alice", ChallengeStatus::Completed, None, 100);
        let second = seeded_challenge(&store, "alice", ChallengeStatus::Completed, None, 60);

        let mut winner = seeded_participant(&store, &first.id, "carol", 10);
        winner.mark_winner(100, "0xdead".to_owned()).unwrap();
        store.put_participant(&winner).unwrap();

        let mut loser = seeded_participant(&store, &second.id, "carol", 5);
        loser.mark_loser().unwrap();
        store.put_participant(&loser).unwrap();

        let rollup = queries.user_rollup("Carol").unwrap();
        assert_eq!(rollup.challenges_joined, 2);
        assert_eq!(rollup.wins, 1);
        assert_eq!(rollup.losses, 1);
        assert_eq!(rollup.total_staked, 15);
        assert_eq!(rollup.total_won, 100);
    }

    #[test]
    fn platform_stats_round_domain_percents_half_up() {
        let (queries, store, _dir) = queries();
        seeded_challenge(&store, "alice", ChallengeStatus::Live, Some("DeFi"), 100);
        seeded_challenge(&store, "bob", ChallengeStatus::Live, Some("DeFi"), 100);
        seeded_challenge(&store, "carol", ChallengeStatus::Rejected, Some("NFT"), 100);

        let stats = queries.platform_stats().unwrap();
        assert_eq!(stats.total_challenges, 3);
        assert_eq!(stats.unique_users, 3);
        assert_eq!(stats.committed_reward, 200);
        assert_eq!(stats.domains[0].domain, "DeFi");
        assert_eq!(stats.domains[0].percent, 67);
        assert_eq!(stats.domains[1].domain, "NFT");
        assert_eq!(stats.domains[1].percent, 33);
    }

    #[test]
    fn activity_feed_is_bounded_and_newest_first() {
        let (queries, store, _dir) = queries();
        let challenge = seeded_challenge(&store, "alice", ChallengeStatus::Live, None, 100);
        for i in 0..25 {
            seeded_participant(&store, &challenge.id, &format!("user{i}"), 1);
        }
        store
            .append_event(&ChallengeEvent::new(
                &challenge.id,
                EventPayload::WinnerFound {
                    winner: "user3".to_owned(),
                    reward_share: 100,
                },
            ))
            .unwrap();

        let stats = queries.platform_stats().unwrap();
        let limit = GauntletConfig::default().activity_feed_limit;
        assert_eq!(stats.recent_activity.len(), limit);
        assert!(stats.recent_activity[0].description.contains("won"));
    }

    #[test]
    fn activity_feed_skips_unfunded_challenges() {
        let (queries, store, _dir) = queries();
        seeded_challenge(&store, "alice", ChallengeStatus::Pending, None, 100);
        seeded_challenge(&store, "bob", ChallengeStatus::Rejected, None, 50);
        let live = seeded_challenge(&store, "carol", ChallengeStatus::Live, Some("DeFi"), 70);

        let stats = queries.platform_stats().unwrap();
        assert_eq!(stats.recent_activity.len(), 1);
        assert_eq!(stats.recent_activity[0].challenge_id, live.id);
        assert!(stats.recent_activity[0]
            .description
            .contains("created by carol"));
    }

    #[test]
    fn events_for_narrows_by_kind() {
        let (queries, store, _dir) = queries();
        let challenge = seeded_challenge(&store, "alice", ChallengeStatus::Live, None, 100);
        store
            .append_event(&ChallengeEvent::new(
                &challenge.id,
                EventPayload::AnswerSubmitted {
                    participant: "carol".to_owned(),
                    correct: false,
                },
            ))
            .unwrap();
        store
            .append_event(&ChallengeEvent::new(
                &challenge.id,
                EventPayload::WinnerFound {
                    winner: "carol".to_owned(),
                    reward_share: 50,
                },
            ))
            .unwrap();

        let all = queries.events_for(&challenge.id, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].kind, "WINNER_FOUND");

        let winners = queries
            .events_for(&challenge.id, Some(EventKind::WinnerFound))
            .unwrap();
        assert_eq!(winners.len(), 1);
    }
}
