use serde::{Deserialize, Serialize};

/// Recognized runtime options with the protocol defaults.
///
/// Loaded from JSON by the node binary and threaded through the dispatch
/// context; every component reads its knobs from here rather than from
/// process-wide state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    // ── Quorum ───────────────────────────────────────────────────────────────
    /// Target K_plan before the active-set scaling kicks in.
    pub k_target: u32,
    /// K_plan = min(k_target, max(1, floor(active · k_alpha))). Expressed in
    /// hundredths so the formula stays in integer arithmetic (30 = 0.30).
    pub k_alpha_hundredths: u32,
    /// Below this many active verifiers the swarm runs in bootstrap mode:
    /// K = 1 for both plan and result quorums, challenge rewards doubled.
    pub bootstrap_threshold: usize,
    /// Bootstrap exits only after the active set has held the threshold for
    /// this long.
    pub bootstrap_stable_window_secs: u64,

    // ── Challenge ────────────────────────────────────────────────────────────
    /// T_challenge: window after COMMIT in which a bonded challenge may be
    /// raised. Bounty escrow releases only after twice this.
    pub challenge_window_secs: u64,

    // ── Lease ────────────────────────────────────────────────────────────────
    pub lease_default_ttl_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// Missed intervals tolerated before scavenge.
    pub heartbeat_miss_grace: u32,
    /// How often the scavenger sweeps the lease table.
    pub scavenge_interval_secs: u64,

    // ── Auction ──────────────────────────────────────────────────────────────
    pub bid_window_default_secs: u64,
    /// A bid arriving with less than this remaining extends the window.
    pub anti_snipe_tail_secs: u64,
    pub anti_snipe_max_extensions: u32,

    // ── Timeouts ─────────────────────────────────────────────────────────────
    pub cas_get_timeout_secs: u64,
    pub consensus_timeout_secs: u64,
    pub ledger_timeout_secs: u64,
    pub policy_timeout_ms: u64,

    // ── Staking ──────────────────────────────────────────────────────────────
    pub min_verifier_stake: u64,
    pub unbonding_period_secs: u64,

    // ── Committee diversity caps (percent) ───────────────────────────────────
    pub committee_org_cap_pct: u32,
    pub committee_zone_cap_pct: u32,
    pub committee_region_cap_pct: u32,

    // ── Slashing ─────────────────────────────────────────────────────────────
    /// Fraction of stake slashed from each attesting verifier on UPHELD,
    /// in percent.
    pub slash_on_uphold_pct: u32,
    /// Fraction of worker stake slashed per missed heartbeat interval,
    /// in percent.
    pub slash_per_missed_heartbeat_pct: u32,

    // ── Partition detection ──────────────────────────────────────────────────
    pub peer_heartbeat_interval_secs: u64,
    /// Consecutive missed peer heartbeats before the peer is considered gone.
    pub peer_miss_threshold: u32,
    /// Connected-peer fraction (percent) below which writes turn provisional.
    pub partition_quorum_pct: u32,

    // ── Verifier recency ─────────────────────────────────────────────────────
    /// An agent inactive longer than this leaves the active set.
    pub verifier_recency_horizon_secs: u64,

    // ── Bus ──────────────────────────────────────────────────────────────────
    /// Per-subscriber queue depth before publishes fail with BUS_UNAVAILABLE.
    pub bus_queue_depth: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            k_target: 5,
            k_alpha_hundredths: 30,
            bootstrap_threshold: 10,
            bootstrap_stable_window_secs: 24 * 3600,
            challenge_window_secs: 24 * 3600,
            lease_default_ttl_secs: 30,
            heartbeat_interval_secs: 10,
            heartbeat_miss_grace: 3,
            scavenge_interval_secs: 10,
            bid_window_default_secs: 30,
            anti_snipe_tail_secs: 5,
            anti_snipe_max_extensions: 3,
            cas_get_timeout_secs: 5,
            consensus_timeout_secs: 2,
            ledger_timeout_secs: 1,
            policy_timeout_ms: 100,
            min_verifier_stake: 1_000,
            unbonding_period_secs: 7 * 24 * 3600,
            committee_org_cap_pct: 30,
            committee_zone_cap_pct: 40,
            committee_region_cap_pct: 50,
            slash_on_uphold_pct: 50,
            slash_per_missed_heartbeat_pct: 1,
            peer_heartbeat_interval_secs: 10,
            peer_miss_threshold: 3,
            partition_quorum_pct: 50,
            verifier_recency_horizon_secs: 7 * 24 * 3600,
            bus_queue_depth: 512,
        }
    }
}

impl SwarmConfig {
    /// K_plan for a given active verifier count.
    pub fn k_plan(&self, active_verifiers: usize) -> u32 {
        if active_verifiers < self.bootstrap_threshold {
            return 1;
        }
        let scaled = (active_verifiers as u32 * self.k_alpha_hundredths) / 100;
        self.k_target.min(scaled.max(1))
    }

    /// Bootstrap K=1 applies to result quorums as well as plan quorums.
    pub fn k_result(&self, active_verifiers: usize) -> u32 {
        self.k_plan(active_verifiers)
    }

    pub fn in_bootstrap(&self, active_verifiers: usize) -> bool {
        active_verifiers < self.bootstrap_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn k_plan_bootstrap_is_one() {
        let cfg = SwarmConfig::default();
        assert_eq!(cfg.k_plan(0), 1);
        assert_eq!(cfg.k_plan(9), 1);
    }

    #[test]
    fn k_plan_scales_with_active_set() {
        let cfg = SwarmConfig::default();
        // 10 active · 0.30 = 3
        assert_eq!(cfg.k_plan(10), 3);
        // 20 active · 0.30 = 6, capped at k_target = 5
        assert_eq!(cfg.k_plan(20), 5);
    }

    #[test]
    fn defaults_match_protocol() {
        let cfg = SwarmConfig::default();
        assert_eq!(cfg.challenge_window_secs, 86_400);
        assert_eq!(cfg.anti_snipe_tail_secs, 5);
        assert_eq!(cfg.unbonding_period_secs, 604_800);
    }
}
