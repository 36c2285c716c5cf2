use crate::types::{
    Address,
    BetResult,
    GameSnapshot,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
};

/// Outcome of applying a snapshot to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The snapshot replaced the stored one.
    Fresh,
    /// The snapshot belonged to an earlier game cycle and was discarded.
    Stale,
}

/// Single source of truth for the locally known game state.
///
/// Mutated only by confirmed reads and received events. Snapshot application
/// is last-confirmed-write-wins by the monotonic game counter, not by
/// completion order, so a slow refresh from cycle N can never overwrite a
/// faster one from cycle N+1.
#[derive(Clone, Default)]
pub struct GameStateStore {
    inner: Arc<Mutex<StoreInner>>,
}

#[derive(Default)]
struct StoreInner {
    snapshot: GameSnapshot,
    results: HashMap<u64, Vec<BetResult>>,
}

impl GameStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored snapshot wholesale unless the incoming one is
    /// from an earlier cycle.
    pub fn apply_snapshot(&self, snapshot: GameSnapshot) -> Applied {
        let mut guard = self.inner.lock().unwrap();
        if snapshot.game_counter < guard.snapshot.game_counter {
            return Applied::Stale;
        }
        guard.snapshot = snapshot;
        Applied::Fresh
    }

    /// Forces the started flag ahead of the next confirmed read. Used by
    /// event handlers; the event itself is ledger confirmation.
    pub fn force_started(&self, started: bool) {
        let mut guard = self.inner.lock().unwrap();
        guard.snapshot.started = started;
    }

    /// Records one participant's result for a game cycle. Entries are
    /// immutable once recorded: a second insert for the same
    /// `(game_id, participant)` pair is a no-op. Returns whether the entry
    /// was newly recorded.
    pub fn record_result(&self, game_id: u64, result: BetResult) -> bool {
        let mut guard = self.inner.lock().unwrap();
        let entries = guard.results.entry(game_id).or_default();
        if entries
            .iter()
            .any(|existing| existing.participant == result.participant)
        {
            return false;
        }
        entries.push(result);
        true
    }

    pub fn snapshot(&self) -> GameSnapshot {
        self.inner.lock().unwrap().snapshot.clone()
    }

    pub fn game_counter(&self) -> u64 {
        self.inner.lock().unwrap().snapshot.game_counter
    }

    pub fn results(&self, game_id: u64) -> Vec<BetResult> {
        let guard = self.inner.lock().unwrap();
        guard.results.get(&game_id).cloned().unwrap_or_default()
    }

    /// The result belonging to `participant`, if it placed a bet in that
    /// cycle. Absence is a valid outcome, not an error.
    pub fn result_for(&self, game_id: u64, participant: &Address) -> Option<BetResult> {
        let guard = self.inner.lock().unwrap();
        guard
            .results
            .get(&game_id)?
            .iter()
            .find(|result| result.participant == *participant)
            .cloned()
    }

    /// Drops all local state. Used on session teardown; the next session
    /// rehydrates everything from the ledger.
    pub fn clear(&self) {
        let mut guard = self.inner.lock().unwrap();
        *guard = StoreInner::default();
    }
}
