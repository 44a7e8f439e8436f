//! Reputation bookkeeping.
//!
//! Bounded [0, 10_000] basis points, bound to the agent's stable identity.
//! Inactivity decays the stored score 5% per idle week before any update
//! applies; the selection-weight recency factor is a separate multiplier
//! (the two compose).

use tracing::debug;

use canswarm_core::constants::{
    REPUTATION_DECAY_PER_WEEK_PCT, REPUTATION_DELTA_DOWN_BP, REPUTATION_DELTA_UP_BP,
    REPUTATION_MAX_BP,
};
use canswarm_core::error::SwarmError;
use canswarm_core::types::{AgentId, Timestamp};

use crate::pool::VerifierPool;

const WEEK_SECS: i64 = 7 * 24 * 3600;

/// Apply the weekly inactivity decay to a raw score.
pub fn decayed(reputation_bp: u32, idle_weeks: u32) -> u32 {
    let mut rep = reputation_bp as u64;
    for _ in 0..idle_weeks.min(52) {
        rep = rep * (100 - REPUTATION_DECAY_PER_WEEK_PCT as u64) / 100;
    }
    rep as u32
}

fn idle_weeks(last_active: Timestamp, now: Timestamp) -> u32 {
    (now.saturating_sub(last_active).max(0) / WEEK_SECS) as u32
}

/// A successful attestation: decay for idleness, then +δ_up, clamped.
pub fn record_success(
    pool: &VerifierPool,
    agent: &AgentId,
    now: Timestamp,
) -> Result<(), SwarmError> {
    update(pool, agent, now, |rep| {
        (rep + REPUTATION_DELTA_UP_BP).min(REPUTATION_MAX_BP)
    })
}

/// A slashed attestation: decay for idleness, then −δ_down, floored at 0.
pub fn record_slash(
    pool: &VerifierPool,
    agent: &AgentId,
    now: Timestamp,
) -> Result<(), SwarmError> {
    update(pool, agent, now, |rep| {
        rep.saturating_sub(REPUTATION_DELTA_DOWN_BP)
    })
}

fn update(
    pool: &VerifierPool,
    agent: &AgentId,
    now: Timestamp,
    f: impl FnOnce(u32) -> u32,
) -> Result<(), SwarmError> {
    let Some(mut record) = pool.get(agent)? else {
        return Err(SwarmError::NotAVerifier(agent.to_string()));
    };
    let idle = idle_weeks(record.last_active, now);
    let before = record.reputation_bp;
    record.reputation_bp = f(decayed(record.reputation_bp, idle));
    record.last_active = now;
    debug!(agent = %agent, before, after = record.reputation_bp, idle, "reputation updated");
    pool.put(&record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canswarm_core::protocol::VerifierManifest;
    use canswarm_store::SwarmDb;
    use std::sync::Arc;

    fn pool(name: &str) -> VerifierPool {
        let dir =
            std::env::temp_dir().join(format!("canswarm_rep_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        VerifierPool::new(Arc::new(SwarmDb::open(&dir).unwrap()))
    }

    fn register(pool: &VerifierPool, tag: u8, now: Timestamp) -> AgentId {
        let agent = AgentId::from_bytes([tag; 32]);
        pool.register(
            VerifierManifest {
                agent,
                capabilities: vec![],
                org: "o".into(),
                zone: "z".into(),
                region: "r".into(),
            },
            now,
        )
        .unwrap();
        agent
    }

    #[test]
    fn success_and_slash_move_the_score() {
        let pool = pool("moves");
        let agent = register(&pool, 1, 0);
        record_success(&pool, &agent, 10).unwrap();
        assert_eq!(pool.get(&agent).unwrap().unwrap().reputation_bp, 5_100);
        record_slash(&pool, &agent, 20).unwrap();
        assert_eq!(pool.get(&agent).unwrap().unwrap().reputation_bp, 3_600);
    }

    #[test]
    fn score_is_clamped() {
        let pool = pool("clamp");
        let agent = register(&pool, 1, 0);
        let mut record = pool.get(&agent).unwrap().unwrap();
        record.reputation_bp = REPUTATION_MAX_BP;
        pool.put(&record).unwrap();
        record_success(&pool, &agent, 10).unwrap();
        assert_eq!(pool.get(&agent).unwrap().unwrap().reputation_bp, REPUTATION_MAX_BP);
    }

    #[test]
    fn idle_weeks_decay_before_update() {
        let pool = pool("decay");
        let agent = register(&pool, 1, 0);
        // Two idle weeks: 5000 → 4750 → 4512, then +100.
        record_success(&pool, &agent, 2 * WEEK_SECS).unwrap();
        assert_eq!(pool.get(&agent).unwrap().unwrap().reputation_bp, 4_612);
    }

    #[test]
    fn decay_helper_is_pure() {
        assert_eq!(decayed(10_000, 0), 10_000);
        assert_eq!(decayed(10_000, 1), 9_500);
        assert_eq!(decayed(10_000, 2), 9_025);
    }
}
