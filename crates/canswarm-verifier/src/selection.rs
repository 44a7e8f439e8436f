//! Committee selection.
//!
//! Weight = √stake · reputation · recency. The square root deliberately
//! dampens whale concentration. All arithmetic is integer and the sampling
//! stream is seeded from the need id, so selection is part of replay
//! determinism: the same pool state and need always produce the same
//! committee on every node.

use tracing::debug;

use canswarm_core::config::SwarmConfig;
use canswarm_core::error::SwarmError;
use canswarm_core::protocol::VerifierRecord;
use canswarm_core::types::{AgentId, Credits, NeedId, Timestamp};
use canswarm_crypto::sha256;
use canswarm_ledger::Ledger;

use crate::pool::VerifierPool;
use crate::reputation;

const WEEK_SECS: i64 = 7 * 24 * 3600;

/// Integer square root (Newton's method).
pub fn isqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

/// Recency multiplier in basis points: 90% retained per idle week.
fn recency_bp(last_active: Timestamp, now: Timestamp) -> u128 {
    let idle_weeks = (now.saturating_sub(last_active).max(0) / WEEK_SECS).min(52);
    let mut bp: u128 = 10_000;
    for _ in 0..idle_weeks {
        bp = bp * 90 / 100;
    }
    bp
}

/// Selection weight for one candidate.
pub fn selection_weight(record: &VerifierRecord, stake: Credits, now: Timestamp) -> u128 {
    isqrt(stake as u128) * record.reputation_bp as u128 * recency_bp(record.last_active, now)
}

fn tie_hash(agent: &AgentId, need: &NeedId) -> [u8; 32] {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(agent.as_bytes());
    buf.extend_from_slice(need.as_bytes());
    sha256(&buf)
}

/// Deterministic PRNG stream derived from the need id.
fn draw(seed: &[u8; 32], round: u64, bound: u128) -> u128 {
    let mut buf = Vec::with_capacity(40);
    buf.extend_from_slice(seed);
    buf.extend_from_slice(&round.to_be_bytes());
    let digest = sha256(&buf);
    let mut arr = [0u8; 16];
    arr.copy_from_slice(&digest[..16]);
    u128::from_be_bytes(arr) % bound
}

/// Per-attribute committee quota: floor(k · cap%), at least 1.
fn quota(k: usize, cap_pct: u32) -> usize {
    ((k * cap_pct as usize) / 100).max(1)
}

/// Select a K-member committee for a need.
///
/// Sampling is without replacement, proportional to weight, subject to the
/// org / zone / region concentration caps. Candidates are walked in
/// (stake desc, tie-hash) order so equal weights break deterministically.
pub fn select_committee(
    pool: &VerifierPool,
    ledger: &Ledger,
    cfg: &SwarmConfig,
    k: usize,
    need: &NeedId,
    now: Timestamp,
) -> Result<Vec<AgentId>, SwarmError> {
    let active = pool.active_set(ledger, cfg, now)?;
    if active.len() < k {
        return Err(SwarmError::CommitteeInfeasible {
            k,
            eligible: active.len(),
        });
    }

    struct Candidate {
        record: VerifierRecord,
        stake: Credits,
        weight: u128,
    }

    let mut candidates = Vec::with_capacity(active.len());
    for record in active {
        let stake = ledger.stake_of(&record.manifest.agent)?;
        let decayed_rep = reputation::decayed(
            record.reputation_bp,
            (now.saturating_sub(record.last_active).max(0) / WEEK_SECS) as u32,
        );
        let mut record = record;
        record.reputation_bp = decayed_rep;
        let weight = selection_weight(&record, stake, now).max(1);
        candidates.push(Candidate {
            record,
            stake,
            weight,
        });
    }
    candidates.sort_by(|a, b| {
        b.stake
            .cmp(&a.stake)
            .then_with(|| {
                tie_hash(&a.record.manifest.agent, need)
                    .cmp(&tie_hash(&b.record.manifest.agent, need))
            })
    });

    let org_quota = quota(k, cfg.committee_org_cap_pct);
    let zone_quota = quota(k, cfg.committee_zone_cap_pct);
    let region_quota = quota(k, cfg.committee_region_cap_pct);

    let seed = sha256(need.as_bytes());
    let mut committee: Vec<AgentId> = Vec::with_capacity(k);
    let mut org_counts = std::collections::HashMap::<String, usize>::new();
    let mut zone_counts = std::collections::HashMap::<String, usize>::new();
    let mut region_counts = std::collections::HashMap::<String, usize>::new();
    let mut round: u64 = 0;

    while committee.len() < k {
        let eligible: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                org_counts.get(&c.record.manifest.org).copied().unwrap_or(0) < org_quota
                    && zone_counts.get(&c.record.manifest.zone).copied().unwrap_or(0) < zone_quota
                    && region_counts
                        .get(&c.record.manifest.region)
                        .copied()
                        .unwrap_or(0)
                        < region_quota
            })
            .map(|(i, _)| i)
            .collect();

        if eligible.is_empty() {
            return Err(SwarmError::CommitteeInfeasible {
                k,
                eligible: committee.len(),
            });
        }

        let total: u128 = eligible.iter().map(|i| candidates[*i].weight).sum();
        let mut r = draw(&seed, round, total);
        round += 1;

        let mut picked = eligible[0];
        for i in &eligible {
            let w = candidates[*i].weight;
            if r < w {
                picked = *i;
                break;
            }
            r -= w;
        }

        let chosen = candidates.remove(picked);
        *org_counts.entry(chosen.record.manifest.org.clone()).or_insert(0) += 1;
        *zone_counts.entry(chosen.record.manifest.zone.clone()).or_insert(0) += 1;
        *region_counts
            .entry(chosen.record.manifest.region.clone())
            .or_insert(0) += 1;
        committee.push(chosen.record.manifest.agent);
    }

    debug!(need = %need, k, "committee selected");
    Ok(committee)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canswarm_core::constants::SYSTEM_AGENT;
    use canswarm_core::protocol::VerifierManifest;
    use canswarm_store::SwarmDb;
    use std::sync::Arc;

    fn setup(name: &str) -> (VerifierPool, Ledger) {
        let dir =
            std::env::temp_dir().join(format!("canswarm_select_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let db = Arc::new(SwarmDb::open(&dir).unwrap());
        (VerifierPool::new(Arc::clone(&db)), Ledger::new(db))
    }

    fn add_verifier(
        pool: &VerifierPool,
        ledger: &Ledger,
        tag: u8,
        stake: Credits,
        org: &str,
        zone: &str,
        region: &str,
    ) -> AgentId {
        let agent = AgentId::from_bytes([tag; 32]);
        ledger.mint(&agent, stake, &SYSTEM_AGENT, 0).unwrap();
        ledger.stake(&agent, stake).unwrap();
        pool.register(
            VerifierManifest {
                agent,
                capabilities: vec![],
                org: org.into(),
                zone: zone.into(),
                region: region.into(),
            },
            0,
        )
        .unwrap();
        agent
    }

    #[test]
    fn isqrt_matches_perfect_squares() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(144), 12);
        assert_eq!(isqrt(145), 12);
        assert_eq!(isqrt(10_000 * 10_000), 10_000);
    }

    #[test]
    fn selection_is_deterministic() {
        let (pool, ledger) = setup("determinism");
        let cfg = SwarmConfig::default();
        for tag in 1..=8 {
            add_verifier(
                &pool,
                &ledger,
                tag,
                2_000 + tag as u64 * 100,
                &format!("org-{tag}"),
                &format!("zone-{tag}"),
                &format!("region-{tag}"),
            );
        }
        let need = NeedId::from_bytes([42; 32]);
        let a = select_committee(&pool, &ledger, &cfg, 3, &need, 0).unwrap();
        let b = select_committee(&pool, &ledger, &cfg, 3, &need, 0).unwrap();
        assert_eq!(a, b);

        // A different need draws a different stream.
        let other = NeedId::from_bytes([43; 32]);
        let c = select_committee(&pool, &ledger, &cfg, 3, &other, 0).unwrap();
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn org_cap_limits_concentration() {
        let (pool, ledger) = setup("org_cap");
        let cfg = SwarmConfig::default();
        // Five whales from one org, five small independents.
        for tag in 1..=5 {
            add_verifier(&pool, &ledger, tag, 1_000_000, "megacorp", &format!("z{tag}"), "eu");
        }
        for tag in 6..=10 {
            add_verifier(
                &pool,
                &ledger,
                tag,
                2_000,
                &format!("org-{tag}"),
                &format!("z{tag}"),
                "us",
            );
        }
        let need = NeedId::from_bytes([7; 32]);
        let committee = select_committee(&pool, &ledger, &cfg, 5, &need, 0).unwrap();

        let pool_records: Vec<_> = committee
            .iter()
            .map(|a| pool.get(a).unwrap().unwrap())
            .collect();
        let megacorp = pool_records
            .iter()
            .filter(|r| r.manifest.org == "megacorp")
            .count();
        // floor(5 · 30%) = 1 seat for any single org.
        assert!(megacorp <= 1, "megacorp got {megacorp} seats");
    }

    #[test]
    fn too_few_eligible_is_infeasible() {
        let (pool, ledger) = setup("infeasible");
        let cfg = SwarmConfig::default();
        add_verifier(&pool, &ledger, 1, 2_000, "o", "z", "r");
        assert!(matches!(
            select_committee(&pool, &ledger, &cfg, 3, &NeedId::from_bytes([1; 32]), 0),
            Err(SwarmError::CommitteeInfeasible { .. })
        ));
    }

    #[test]
    fn sqrt_dampens_whales() {
        // 100× the stake buys only 10× the weight.
        let record = VerifierRecord {
            manifest: VerifierManifest {
                agent: AgentId::from_bytes([1; 32]),
                capabilities: vec![],
                org: "o".into(),
                zone: "z".into(),
                region: "r".into(),
            },
            reputation_bp: 10_000,
            registered_at: 0,
            last_active: 0,
        };
        let small = selection_weight(&record, 10_000, 0);
        let whale = selection_weight(&record, 1_000_000, 0);
        assert_eq!(whale / small, 10);
    }
}
