//! In-memory fakes for the ledger, the randomness oracle, and the event
//! feed, plus a [`TestContext`] that wires them together.

use crate::{
    Error,
    Result,
    controller::GameController,
    events::GameEvent,
    gateway::{
        EventSource,
        LedgerGateway,
        RandomnessOracle,
    },
    reconciler::RandomnessReconciler,
    types::{
        Address,
        BetResult,
        GameSnapshot,
        RequestId,
    },
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};

pub fn addr(n: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[19] = n;
    Address::from(bytes)
}

#[derive(Clone, Copy)]
enum AdvanceMode {
    Never,
    Always,
    OnNth(usize),
}

struct OracleState {
    last_request_id: RequestId,
    advance_mode: AdvanceMode,
    words: HashMap<RequestId, u64>,
    auto_fulfill: Option<(usize, u64)>,
    fetch_counts: HashMap<RequestId, usize>,
    request_calls: usize,
    fetch_calls: usize,
    fail_budget: usize,
}

/// Scripted randomness oracle. Request ids advance according to the
/// configured mode; fetches return the unfulfilled sentinel until a word is
/// scripted for the id.
#[derive(Clone)]
pub struct FakeOracle {
    inner: Arc<Mutex<OracleState>>,
}

impl Default for FakeOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeOracle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(OracleState {
                last_request_id: RequestId(0),
                advance_mode: AdvanceMode::Never,
                words: HashMap::new(),
                auto_fulfill: None,
                fetch_counts: HashMap::new(),
                request_calls: 0,
                fetch_calls: 0,
                fail_budget: 0,
            })),
        }
    }

    pub fn set_last_request_id(&self, id: RequestId) {
        self.inner.lock().unwrap().last_request_id = id;
    }

    /// Every accepted request bumps the advertised request id.
    pub fn advance_on_request(&self, advance: bool) {
        let mut guard = self.inner.lock().unwrap();
        guard.advance_mode = if advance {
            AdvanceMode::Always
        } else {
            AdvanceMode::Never
        };
    }

    /// Only the n-th request registers; earlier ones are dropped.
    pub fn advance_on_nth_request(&self, n: usize) {
        self.inner.lock().unwrap().advance_mode = AdvanceMode::OnNth(n);
    }

    /// Fulfills any request once it has been fetched `n` times; earlier
    /// fetches return the sentinel.
    pub fn fulfill_after_fetches(&self, n: usize, word: u64) {
        self.inner.lock().unwrap().auto_fulfill = Some((n, word));
    }

    /// Scripts the fulfilled word for one request id.
    pub fn fulfill_request(&self, id: RequestId, word: u64) {
        self.inner.lock().unwrap().words.insert(id, word);
    }

    /// The next `n` fetches fail instead of answering.
    pub fn fail_next_fetches(&self, n: usize) {
        self.inner.lock().unwrap().fail_budget = n;
    }

    pub fn request_calls(&self) -> usize {
        self.inner.lock().unwrap().request_calls
    }

    pub fn fetch_calls(&self) -> usize {
        self.inner.lock().unwrap().fetch_calls
    }
}

impl RandomnessOracle for FakeOracle {
    async fn last_request_id(&self) -> Result<RequestId> {
        Ok(self.inner.lock().unwrap().last_request_id)
    }

    async fn request_random_words(&self) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        guard.request_calls += 1;
        let advance = match guard.advance_mode {
            AdvanceMode::Never => false,
            AdvanceMode::Always => true,
            AdvanceMode::OnNth(n) => guard.request_calls == n,
        };
        if advance {
            guard.last_request_id = RequestId(guard.last_request_id.0 + 1);
        }
        Ok(())
    }

    async fn fetch_random_word(&self, request_id: RequestId) -> Result<u64> {
        let mut guard = self.inner.lock().unwrap();
        guard.fetch_calls += 1;
        *guard.fetch_counts.entry(request_id).or_default() += 1;
        if guard.fail_budget > 0 {
            guard.fail_budget -= 1;
            return Err(Error::rejected(503, "oracle unavailable"));
        }
        if let Some(word) = guard.words.get(&request_id) {
            return Ok(*word);
        }
        if let Some((n, word)) = guard.auto_fulfill
            && guard.fetch_counts[&request_id] >= n
        {
            return Ok(word);
        }
        Ok(0)
    }
}

struct LedgerState {
    snapshot: GameSnapshot,
    bets: Vec<(Address, u8)>,
    results: HashMap<u64, Vec<BetResult>>,
    next_roll: u8,
    reject_next: Option<String>,
    start_game_calls: usize,
    distribute_calls: usize,
    set_max_players_calls: usize,
}

/// In-memory stand-in for the game contract. One shared chain state, one
/// handle per calling account, mirroring how each wallet gets its own
/// contract instance against the same deployment.
#[derive(Clone)]
pub struct FakeLedger {
    caller: Address,
    inner: Arc<Mutex<LedgerState>>,
}

impl FakeLedger {
    pub fn new(caller: Address) -> Self {
        Self {
            caller,
            inner: Arc::new(Mutex::new(LedgerState {
                snapshot: GameSnapshot {
                    predefined_betting_amount: 1_000,
                    max_players: 6,
                    owner_reward_percentage: 5,
                    ..GameSnapshot::default()
                },
                bets: Vec::new(),
                results: HashMap::new(),
                next_roll: 1,
                reject_next: None,
                start_game_calls: 0,
                distribute_calls: 0,
                set_max_players_calls: 0,
            })),
        }
    }

    /// A handle bound to another account, sharing the same chain state.
    pub fn with_caller(&self, caller: Address) -> Self {
        Self {
            caller,
            inner: self.inner.clone(),
        }
    }

    pub fn snapshot(&self) -> GameSnapshot {
        self.inner.lock().unwrap().snapshot.clone()
    }

    pub fn set_started(&self, started: bool) {
        self.inner.lock().unwrap().snapshot.started = started;
    }

    /// The face the next distribution will roll.
    pub fn set_next_roll(&self, value: u8) {
        self.inner.lock().unwrap().next_roll = value;
    }

    /// The next write call is rejected with the given revert reason.
    pub fn reject_next_call(&self, reason: impl Into<String>) {
        self.inner.lock().unwrap().reject_next = Some(reason.into());
    }

    /// Seeds recorded results for a past cycle:
    /// `(participant, chosen, rolled, won, amount_won, balance_after)`.
    pub fn seed_results(
        &self,
        game_id: u64,
        entries: Vec<(Address, u8, u8, bool, u128, u128)>,
    ) {
        let results = entries
            .into_iter()
            .map(
                |(participant, chosen_value, rolled_value, won, amount_won, balance_after)| {
                    BetResult {
                        participant,
                        chosen_value,
                        rolled_value,
                        won,
                        amount_won,
                        balance_after,
                    }
                },
            )
            .collect();
        self.inner.lock().unwrap().results.insert(game_id, results);
    }

    pub fn start_game_calls(&self) -> usize {
        self.inner.lock().unwrap().start_game_calls
    }

    pub fn distribute_calls(&self) -> usize {
        self.inner.lock().unwrap().distribute_calls
    }

    pub fn set_max_players_calls(&self) -> usize {
        self.inner.lock().unwrap().set_max_players_calls
    }

    pub fn placed_bets(&self) -> Vec<(Address, u8)> {
        self.inner.lock().unwrap().bets.clone()
    }

    fn check_reject(state: &mut LedgerState) -> Result<()> {
        if let Some(reason) = state.reject_next.take() {
            return Err(Error::rejected(400, reason));
        }
        Ok(())
    }
}

impl LedgerGateway for FakeLedger {
    async fn is_started(&self) -> Result<bool> {
        Ok(self.inner.lock().unwrap().snapshot.started)
    }

    async fn players(&self) -> Result<Vec<Address>> {
        Ok(self.inner.lock().unwrap().snapshot.players.clone())
    }

    async fn balance(&self) -> Result<u128> {
        Ok(self.inner.lock().unwrap().snapshot.balance)
    }

    async fn game_counter(&self) -> Result<u64> {
        Ok(self.inner.lock().unwrap().snapshot.game_counter)
    }

    async fn total_bet_amount(&self) -> Result<u128> {
        Ok(self.inner.lock().unwrap().snapshot.total_bet_amount)
    }

    async fn owner_reward_percentage(&self) -> Result<u8> {
        Ok(self.inner.lock().unwrap().snapshot.owner_reward_percentage)
    }

    async fn predefined_betting_amount(&self) -> Result<u128> {
        Ok(self.inner.lock().unwrap().snapshot.predefined_betting_amount)
    }

    async fn max_players(&self) -> Result<u32> {
        Ok(self.inner.lock().unwrap().snapshot.max_players)
    }

    async fn game_results(&self, game_id: u64) -> Result<Vec<BetResult>> {
        let guard = self.inner.lock().unwrap();
        Ok(guard.results.get(&game_id).cloned().unwrap_or_default())
    }

    async fn start_game(&self) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        guard.start_game_calls += 1;
        Self::check_reject(&mut guard)?;
        if guard.snapshot.started {
            return Err(Error::rejected(400, "game already started"));
        }
        guard.snapshot.started = true;
        Ok(())
    }

    async fn enter(&self, amount: u128) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        Self::check_reject(&mut guard)?;
        if guard.snapshot.started {
            return Err(Error::rejected(400, "game already started"));
        }
        if guard.snapshot.players.len() as u32 >= guard.snapshot.max_players {
            return Err(Error::rejected(400, "game is full"));
        }
        guard.snapshot.players.push(self.caller);
        guard.snapshot.balance += amount;
        Ok(())
    }

    async fn exit_game(&self) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        Self::check_reject(&mut guard)?;
        if guard.snapshot.started {
            return Err(Error::rejected(400, "game already started"));
        }
        guard.snapshot.players.retain(|player| *player != self.caller);
        Ok(())
    }

    async fn place_bet(&self, value: u8) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        Self::check_reject(&mut guard)?;
        if !guard.snapshot.started {
            return Err(Error::rejected(400, "game has not started"));
        }
        let bet_amount = guard.snapshot.predefined_betting_amount;
        guard.bets.push((self.caller, value));
        guard.snapshot.total_bet_amount += bet_amount;
        Ok(())
    }

    async fn cancel_bet(&self) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        Self::check_reject(&mut guard)?;
        if !guard.snapshot.started {
            return Err(Error::rejected(400, "game has not started"));
        }
        let bet_amount = guard.snapshot.predefined_betting_amount;
        let before = guard.bets.len();
        guard.bets.retain(|(player, _)| *player != self.caller);
        let cancelled = (before - guard.bets.len()) as u128;
        guard.snapshot.total_bet_amount -= cancelled * bet_amount;
        Ok(())
    }

    async fn roll_dice_and_distribute_rewards(&self) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        guard.distribute_calls += 1;
        Self::check_reject(&mut guard)?;
        if !guard.snapshot.started {
            return Err(Error::rejected(400, "game has not started"));
        }
        let rolled = guard.next_roll;
        let stake = guard.snapshot.predefined_betting_amount;
        let game_id = guard.snapshot.game_counter;
        let results: Vec<BetResult> = guard
            .bets
            .iter()
            .map(|(participant, chosen)| {
                let won = *chosen == rolled;
                let amount_won = if won { stake * 5 } else { 0 };
                BetResult {
                    participant: *participant,
                    chosen_value: *chosen,
                    rolled_value: rolled,
                    won,
                    amount_won,
                    balance_after: amount_won,
                }
            })
            .collect();
        guard.results.insert(game_id, results);
        guard.snapshot.started = false;
        guard.snapshot.game_counter += 1;
        guard.snapshot.players.clear();
        guard.snapshot.total_bet_amount = 0;
        guard.bets.clear();
        Ok(())
    }

    async fn set_owner_reward_percentage(&self, pct: u8) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        Self::check_reject(&mut guard)?;
        if guard.snapshot.started {
            return Err(Error::rejected(400, "game already started"));
        }
        guard.snapshot.owner_reward_percentage = pct;
        Ok(())
    }

    async fn set_predefined_betting_amount(&self, amount: u128) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        Self::check_reject(&mut guard)?;
        if guard.snapshot.started {
            return Err(Error::rejected(400, "game already started"));
        }
        guard.snapshot.predefined_betting_amount = amount;
        Ok(())
    }

    async fn set_max_players(&self, max: u32) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        guard.set_max_players_calls += 1;
        Self::check_reject(&mut guard)?;
        if guard.snapshot.started {
            return Err(Error::rejected(400, "game already started"));
        }
        guard.snapshot.max_players = max;
        Ok(())
    }
}

/// Event feed fed by a test through the paired sender.
pub struct FakeEventSource {
    recv: tokio::sync::mpsc::Receiver<(GameEvent, u64)>,
}

impl FakeEventSource {
    pub fn new_with_sender() -> (Self, tokio::sync::mpsc::Sender<(GameEvent, u64)>) {
        let (send, recv) = tokio::sync::mpsc::channel(10);
        (FakeEventSource { recv }, send)
    }
}

impl EventSource for FakeEventSource {
    async fn next_event(&mut self) -> Result<(GameEvent, u64)> {
        match self.recv.recv().await {
            Some(event) => Ok(event),
            None => Err(Error::EventStreamClosed),
        }
    }
}

/// An owner, a player, and the fake chain they share.
pub struct TestContext {
    pub ledger: FakeLedger,
    pub oracle: FakeOracle,
    pub owner: Address,
    pub player: Address,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    pub fn new() -> Self {
        let owner = addr(1);
        let player = addr(2);
        Self {
            ledger: FakeLedger::new(owner),
            oracle: FakeOracle::new(),
            owner,
            player,
        }
    }

    pub fn owner_controller(&self) -> GameController<FakeLedger, FakeOracle> {
        GameController::new(self.ledger.clone(), self.oracle.clone(), self.owner)
    }

    pub fn player_controller(&self) -> GameController<FakeLedger, FakeOracle> {
        GameController::new(
            self.ledger.with_caller(self.player),
            self.oracle.clone(),
            self.player,
        )
    }

    /// A reconciler that polls at millisecond pace so tests stay fast.
    pub fn fast_reconciler() -> RandomnessReconciler {
        RandomnessReconciler::new().with_poll_interval(Duration::from_millis(1))
    }
}

/// Drains a word with `rand` when a test wants an arbitrary non-sentinel
/// fulfillment instead of a scripted one.
pub fn arbitrary_word() -> u64 {
    use rand::Rng;
    rand::rng().random_range(1..=u64::MAX)
}
