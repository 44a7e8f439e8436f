//! canswarm-ledger
//!
//! The double-entry credit ledger: accounts, escrow, stake, unbonding and
//! slashing. Every operation is integer arithmetic; distribution splits use
//! integer division with the remainder burned, so replay reproduces every
//! balance exactly.
//!
//! Slashed credits move to the SYSTEM pool first and are distributed from
//! there, which keeps the conservation invariant true between the slash and
//! its distribution:
//!
//!   Σ balance + Σ locked + Σ unbonding + Σ in-flight escrow + burned ≡ minted

use std::sync::Arc;

use tracing::{debug, info, warn};

use canswarm_core::constants::{
    MAX_SUPPLY_CREDITS, SLASH_SHARE_CHALLENGER_PCT, SLASH_SHARE_HONEST_PCT, SYSTEM_AGENT,
};
use canswarm_core::error::SwarmError;
use canswarm_core::ledger::{
    AccountState, EscrowPurpose, EscrowState, SlashCause, SlashEvent, UnbondingEntry,
};
use canswarm_core::types::{AgentId, ArtifactHash, Credits, EscrowId, Timestamp};
use canswarm_store::SwarmDb;

// ── Split helper ─────────────────────────────────────────────────────────────

/// Exact integer split of a slash total. The remainder after the challenger
/// and honest shares is burned, so the three parts always sum to `total`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlashSplit {
    pub challenger: Credits,
    pub honest_total: Credits,
    pub burn: Credits,
}

pub fn split_slash(total: Credits) -> SlashSplit {
    let challenger = (total * SLASH_SHARE_CHALLENGER_PCT) / 100;
    let honest_total = (total * SLASH_SHARE_HONEST_PCT) / 100;
    SlashSplit {
        challenger,
        honest_total,
        burn: total - challenger - honest_total,
    }
}

// ── Ledger ───────────────────────────────────────────────────────────────────

/// The ledger engine. Exposed to handlers, never to external clients.
pub struct Ledger {
    db: Arc<SwarmDb>,
}

impl Ledger {
    pub fn new(db: Arc<SwarmDb>) -> Self {
        Self { db }
    }

    fn account(&self, id: &AgentId) -> Result<AccountState, SwarmError> {
        self.db
            .get_account(id)?
            .ok_or_else(|| SwarmError::UnknownAccount(id.to_string()))
    }

    pub fn get_balance(&self, id: &AgentId) -> Result<Credits, SwarmError> {
        Ok(self.account(id)?.balance)
    }

    /// Locked (staked) credits for an account. 0 for unknown accounts.
    pub fn stake_of(&self, id: &AgentId) -> Result<Credits, SwarmError> {
        Ok(self.db.get_account(id)?.map(|a| a.locked).unwrap_or(0))
    }

    pub fn account_exists(&self, id: &AgentId) -> bool {
        self.db.account_exists(id)
    }

    /// Create an empty account. Idempotent.
    pub fn create_account(&self, id: &AgentId, now: Timestamp) -> Result<(), SwarmError> {
        if !self.db.account_exists(id) {
            self.db.put_account(&AccountState::new(*id, now))?;
        }
        Ok(())
    }

    // ── Mint ─────────────────────────────────────────────────────────────────

    /// Mint new credits. `authority` must be the SYSTEM agent and the total
    /// supply cap is enforced.
    pub fn mint(
        &self,
        to: &AgentId,
        amount: Credits,
        authority: &AgentId,
        now: Timestamp,
    ) -> Result<(), SwarmError> {
        if *authority != SYSTEM_AGENT {
            return Err(SwarmError::MintUnauthorized);
        }
        let mut meta = self.db.ledger_meta()?;
        if meta.minted.saturating_add(amount) > MAX_SUPPLY_CREDITS {
            return Err(SwarmError::SupplyCapExceeded {
                supply: meta.minted,
                mint: amount,
                cap: MAX_SUPPLY_CREDITS,
            });
        }
        self.create_account(to, now)?;
        let mut account = self.account(to)?;
        account.balance += amount;
        meta.minted += amount;
        self.db.put_account(&account)?;
        self.db.put_ledger_meta(&meta)?;
        info!(to = %to, amount, minted = meta.minted, "mint");
        Ok(())
    }

    // ── Transfer ─────────────────────────────────────────────────────────────

    /// Move credits between accounts. The recipient must already exist
    /// unless `allow_create_recipient` — off by default at every call site,
    /// which keeps a typo'd recipient id from silently eating the funds.
    pub fn transfer(
        &self,
        from: &AgentId,
        to: &AgentId,
        amount: Credits,
        allow_create_recipient: bool,
        now: Timestamp,
    ) -> Result<(), SwarmError> {
        if !self.db.account_exists(to) {
            if !allow_create_recipient {
                return Err(SwarmError::UnknownAccount(to.to_string()));
            }
            self.create_account(to, now)?;
        }
        let mut sender = self.account(from)?;
        if sender.balance < amount {
            return Err(SwarmError::InsufficientBalance {
                need: amount,
                have: sender.balance,
            });
        }
        sender.balance -= amount;
        let mut recipient = self.account(to)?;
        recipient.balance += amount;
        self.db.put_account(&sender)?;
        self.db.put_account(&recipient)?;
        debug!(from = %from, to = %to, amount, "transfer");
        Ok(())
    }

    // ── Escrow ───────────────────────────────────────────────────────────────

    /// Lock credits into an escrow contract.
    pub fn escrow(
        &self,
        from: &AgentId,
        amount: Credits,
        escrow_id: EscrowId,
        purpose: EscrowPurpose,
        now: Timestamp,
    ) -> Result<(), SwarmError> {
        if self.db.get_escrow(&escrow_id)?.is_some() {
            // Idempotent under redelivery: the same escrow id is a no-op.
            return Ok(());
        }
        let mut sender = self.account(from)?;
        if sender.balance < amount {
            return Err(SwarmError::InsufficientBalance {
                need: amount,
                have: sender.balance,
            });
        }
        sender.balance -= amount;
        self.db.put_account(&sender)?;
        self.db.put_escrow(&EscrowState {
            escrow_id,
            from: *from,
            amount,
            purpose,
            created_at: now,
            released: false,
        })?;
        debug!(escrow = %escrow_id, from = %from, amount, "escrow opened");
        Ok(())
    }

    /// Pay an escrow out to `to`. Atomic read-modify-write: the `released`
    /// flag flips in the same transaction that credits the recipient, so
    /// exactly one of any concurrent release attempts succeeds.
    pub fn release_escrow(&self, escrow_id: &EscrowId, to: &AgentId) -> Result<(), SwarmError> {
        let escrow = self.db.release_escrow_txn(escrow_id, to)?;
        info!(escrow = %escrow_id, to = %to, amount = escrow.amount, "escrow released");
        Ok(())
    }

    /// Return an escrow to its opener.
    pub fn cancel_escrow(&self, escrow_id: &EscrowId) -> Result<(), SwarmError> {
        let escrow = self
            .db
            .get_escrow(escrow_id)?
            .ok_or_else(|| SwarmError::EscrowMissing(escrow_id.to_hex()))?;
        let from = escrow.from;
        let escrow = self.db.release_escrow_txn(escrow_id, &from)?;
        info!(escrow = %escrow_id, to = %from, amount = escrow.amount, "escrow cancelled");
        Ok(())
    }

    pub fn get_escrow(&self, escrow_id: &EscrowId) -> Result<Option<EscrowState>, SwarmError> {
        self.db.get_escrow(escrow_id)
    }

    // ── Stake ────────────────────────────────────────────────────────────────

    /// Lock credits as slashable stake.
    pub fn stake(&self, account: &AgentId, amount: Credits) -> Result<(), SwarmError> {
        let mut acc = self.account(account)?;
        if acc.balance < amount {
            return Err(SwarmError::InsufficientBalance {
                need: amount,
                have: acc.balance,
            });
        }
        acc.balance -= amount;
        acc.locked += amount;
        self.db.put_account(&acc)?;
        debug!(account = %account, amount, locked = acc.locked, "stake");
        Ok(())
    }

    /// Start the unbonding timer for part of an account's stake. The
    /// credits leave `locked` now and return to `balance` only at maturity.
    pub fn begin_unbond(
        &self,
        account: &AgentId,
        amount: Credits,
        now: Timestamp,
        unbonding_period_secs: u64,
    ) -> Result<(), SwarmError> {
        let mut acc = self.account(account)?;
        if acc.locked < amount {
            return Err(SwarmError::InsufficientStake {
                need: amount,
                have: acc.locked,
            });
        }
        acc.locked -= amount;
        self.db.put_account(&acc)?;
        self.db.push_unbonding(&UnbondingEntry {
            account: *account,
            amount,
            started_at: now,
            matures_at: now + unbonding_period_secs as i64,
        })?;
        debug!(account = %account, amount, "unbond started");
        Ok(())
    }

    /// Release every matured unbonding tranche. Returns how many matured.
    pub fn complete_unbonds(&self, now: Timestamp) -> Result<usize, SwarmError> {
        let mut released = 0;
        for (key, entry) in self.db.iter_unbonding()? {
            if entry.matures_at <= now {
                let mut acc = self.account(&entry.account)?;
                acc.balance += entry.amount;
                self.db.put_account(&acc)?;
                self.db.remove_unbonding(&key)?;
                released += 1;
                debug!(account = %entry.account, amount = entry.amount, "unbond matured");
            }
        }
        Ok(released)
    }

    // ── Slashing ─────────────────────────────────────────────────────────────

    /// Unconditionally reduce an account's locked stake. The slashed amount
    /// moves to the SYSTEM pool for distribution; the caller decides the
    /// split. Returns the amount actually slashed (capped at the stake).
    pub fn slash(
        &self,
        account: &AgentId,
        amount: Credits,
        cause: SlashCause,
        evidence: Option<ArtifactHash>,
        now: Timestamp,
    ) -> Result<Credits, SwarmError> {
        let mut acc = self.account(account)?;
        let slashed = amount.min(acc.locked);
        if slashed == 0 {
            return Ok(0);
        }
        acc.locked -= slashed;
        self.db.put_account(&acc)?;

        self.create_account(&SYSTEM_AGENT, now)?;
        let mut system = self.account(&SYSTEM_AGENT)?;
        system.balance += slashed;
        self.db.put_account(&system)?;

        warn!(account = %account, slashed, ?cause, "stake slashed");
        self.db.append_slash_event(&SlashEvent {
            account: *account,
            amount: slashed,
            cause,
            evidence,
            ts: now,
        })?;
        Ok(slashed)
    }

    /// Burn credits out of an account. Burned credits are gone for good but
    /// stay counted in the conservation identity.
    pub fn burn(&self, from: &AgentId, amount: Credits) -> Result<(), SwarmError> {
        let mut acc = self.account(from)?;
        if acc.balance < amount {
            return Err(SwarmError::InsufficientBalance {
                need: amount,
                have: acc.balance,
            });
        }
        acc.balance -= amount;
        self.db.put_account(&acc)?;
        let mut meta = self.db.ledger_meta()?;
        meta.burned += amount;
        self.db.put_ledger_meta(&meta)?;
        info!(from = %from, amount, burned = meta.burned, "burn");
        Ok(())
    }

    // ── Conservation ─────────────────────────────────────────────────────────

    /// Verify Σ balance + Σ locked + Σ unbonding + Σ in-flight escrow +
    /// burned ≡ minted. Test and audit surface.
    pub fn conservation(&self) -> Result<ConservationReport, SwarmError> {
        let meta = self.db.ledger_meta()?;
        let mut balances: Credits = 0;
        let mut locked: Credits = 0;
        for acc in self.db.iter_accounts()? {
            balances += acc.balance;
            locked += acc.locked;
        }
        let unbonding: Credits = self
            .db
            .iter_unbonding()?
            .iter()
            .map(|(_, e)| e.amount)
            .sum();
        let escrowed: Credits = self
            .db
            .iter_escrows()?
            .iter()
            .filter(|e| !e.released)
            .map(|e| e.amount)
            .sum();
        Ok(ConservationReport {
            minted: meta.minted,
            burned: meta.burned,
            balances,
            locked,
            unbonding,
            escrowed,
        })
    }
}

/// Snapshot of the conservation identity's terms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConservationReport {
    pub minted: Credits,
    pub burned: Credits,
    pub balances: Credits,
    pub locked: Credits,
    pub unbonding: Credits,
    pub escrowed: Credits,
}

impl ConservationReport {
    pub fn holds(&self) -> bool {
        self.balances + self.locked + self.unbonding + self.escrowed + self.burned == self.minted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canswarm_core::types::NeedId;

    fn ledger(name: &str) -> Ledger {
        let dir =
            std::env::temp_dir().join(format!("canswarm_ledger_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        Ledger::new(Arc::new(SwarmDb::open(&dir).unwrap()))
    }

    fn agent(tag: u8) -> AgentId {
        AgentId::from_bytes([tag; 32])
    }

    #[test]
    fn mint_requires_system_authority() {
        let ledger = ledger("mint_auth");
        assert!(matches!(
            ledger.mint(&agent(1), 100, &agent(1), 0),
            Err(SwarmError::MintUnauthorized)
        ));
        ledger.mint(&agent(1), 100, &SYSTEM_AGENT, 0).unwrap();
        assert_eq!(ledger.get_balance(&agent(1)).unwrap(), 100);
    }

    #[test]
    fn mint_enforces_supply_cap() {
        let ledger = ledger("cap");
        assert!(matches!(
            ledger.mint(&agent(1), MAX_SUPPLY_CREDITS + 1, &SYSTEM_AGENT, 0),
            Err(SwarmError::SupplyCapExceeded { .. })
        ));
    }

    #[test]
    fn transfer_rejects_unknown_recipient_by_default() {
        let ledger = ledger("typo");
        ledger.mint(&agent(1), 100, &SYSTEM_AGENT, 0).unwrap();
        assert!(matches!(
            ledger.transfer(&agent(1), &agent(2), 50, false, 0),
            Err(SwarmError::UnknownAccount(_))
        ));
        ledger.transfer(&agent(1), &agent(2), 50, true, 0).unwrap();
        assert_eq!(ledger.get_balance(&agent(2)).unwrap(), 50);
    }

    #[test]
    fn stake_and_unbond_cycle_conserves() {
        let ledger = ledger("unbond");
        ledger.mint(&agent(1), 1_000, &SYSTEM_AGENT, 0).unwrap();
        ledger.stake(&agent(1), 400).unwrap();
        assert_eq!(ledger.stake_of(&agent(1)).unwrap(), 400);

        ledger.begin_unbond(&agent(1), 400, 100, 3600).unwrap();
        assert_eq!(ledger.stake_of(&agent(1)).unwrap(), 0);
        assert!(ledger.conservation().unwrap().holds());

        // Not yet matured.
        assert_eq!(ledger.complete_unbonds(1_000).unwrap(), 0);
        assert_eq!(ledger.get_balance(&agent(1)).unwrap(), 600);

        assert_eq!(ledger.complete_unbonds(100 + 3600).unwrap(), 1);
        assert_eq!(ledger.get_balance(&agent(1)).unwrap(), 1_000);
        assert!(ledger.conservation().unwrap().holds());
    }

    #[test]
    fn slash_moves_stake_to_system_pool() {
        let ledger = ledger("slash");
        ledger.mint(&agent(1), 10_000, &SYSTEM_AGENT, 0).unwrap();
        ledger.stake(&agent(1), 10_000).unwrap();
        let slashed = ledger
            .slash(&agent(1), 5_000, SlashCause::UpheldChallenge, None, 0)
            .unwrap();
        assert_eq!(slashed, 5_000);
        assert_eq!(ledger.get_balance(&SYSTEM_AGENT).unwrap(), 5_000);
        assert_eq!(ledger.stake_of(&agent(1)).unwrap(), 5_000);
        assert!(ledger.conservation().unwrap().holds());
    }

    #[test]
    fn slash_caps_at_stake() {
        let ledger = ledger("slash_cap");
        ledger.mint(&agent(1), 100, &SYSTEM_AGENT, 0).unwrap();
        ledger.stake(&agent(1), 30).unwrap();
        let slashed = ledger
            .slash(&agent(1), 99, SlashCause::MissedHeartbeat, None, 0)
            .unwrap();
        assert_eq!(slashed, 30);
    }

    #[test]
    fn escrow_release_and_cancel() {
        let ledger = ledger("escrow");
        ledger.mint(&agent(1), 500, &SYSTEM_AGENT, 0).unwrap();
        ledger.create_account(&agent(2), 0).unwrap();

        let e1 = EscrowId::from_bytes([10; 32]);
        ledger
            .escrow(&agent(1), 200, e1, EscrowPurpose::Bounty { need: NeedId::from_bytes([0; 32]) }, 0)
            .unwrap();
        assert_eq!(ledger.get_balance(&agent(1)).unwrap(), 300);
        assert!(ledger.conservation().unwrap().holds());

        ledger.release_escrow(&e1, &agent(2)).unwrap();
        assert_eq!(ledger.get_balance(&agent(2)).unwrap(), 200);
        // A second release cannot double-pay.
        assert!(ledger.release_escrow(&e1, &agent(2)).is_err());

        let e2 = EscrowId::from_bytes([11; 32]);
        ledger
            .escrow(&agent(1), 100, e2, EscrowPurpose::Bounty { need: NeedId::from_bytes([0; 32]) }, 0)
            .unwrap();
        ledger.cancel_escrow(&e2).unwrap();
        assert_eq!(ledger.get_balance(&agent(1)).unwrap(), 300);
        assert!(ledger.conservation().unwrap().holds());
    }

    #[test]
    fn split_slash_is_exact() {
        let split = split_slash(15_000);
        assert_eq!(split.challenger, 7_500);
        assert_eq!(split.honest_total, 6_000);
        assert_eq!(split.burn, 1_500);
        assert_eq!(split.challenger + split.honest_total + split.burn, 15_000);

        // Odd totals: remainder lands in the burn share.
        let odd = split_slash(101);
        assert_eq!(odd.challenger + odd.honest_total + odd.burn, 101);
    }

    #[test]
    fn burn_is_counted_in_conservation() {
        let ledger = ledger("burn");
        ledger.mint(&agent(1), 100, &SYSTEM_AGENT, 0).unwrap();
        ledger.burn(&agent(1), 40).unwrap();
        let report = ledger.conservation().unwrap();
        assert_eq!(report.burned, 40);
        assert!(report.holds());
    }
}
