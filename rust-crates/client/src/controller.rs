use crate::{
    Error,
    Result,
    events::GameEvent,
    gateway::{
        LedgerGateway,
        RandomnessOracle,
    },
    reconciler::{
        Fulfillment,
        RandomnessReconciler,
    },
    store::{
        Applied,
        GameStateStore,
    },
    types::{
        Address,
        BetResult,
        GameSnapshot,
        RequestId,
    },
};
use std::collections::HashSet;
use tracing::{
    info,
    warn,
};

const MAX_OWNER_REWARD_PERCENTAGE: u8 = 10;
const ERROR_BUFFER_DEPTH: usize = 50;

/// Where the controller currently sits in the game lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GamePhase {
    Idle,
    Started,
    AwaitingRandomness,
    Distributing,
}

/// Orchestrates the game lifecycle against the ledger and the randomness
/// oracle, and keeps the [`GameStateStore`] in sync with confirmed state.
///
/// Guards reject obviously invalid actions before any ledger call; the
/// ledger re-validates authoritatively and may still reject. Local state is
/// never mutated optimistically: every action ends in a confirmed refresh.
pub struct GameController<L, O> {
    gateway: L,
    oracle: O,
    address: Address,
    store: GameStateStore,
    reconciler: RandomnessReconciler,
    phase: GamePhase,
    /// Request ids for which a distribution call has been issued. Marked
    /// before the call goes out so overlapping fulfillment observations
    /// cannot trigger a second distribution.
    consumed: HashSet<RequestId>,
    status: String,
    errors: Vec<String>,
}

impl<L, O> GameController<L, O>
where
    L: LedgerGateway,
    O: RandomnessOracle,
{
    pub fn new(gateway: L, oracle: O, address: Address) -> Self {
        Self {
            gateway,
            oracle,
            address,
            store: GameStateStore::new(),
            reconciler: RandomnessReconciler::new(),
            phase: GamePhase::Idle,
            consumed: HashSet::new(),
            status: String::from("Ready"),
            errors: Vec::new(),
        }
    }

    pub fn with_reconciler(mut self, reconciler: RandomnessReconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn store(&self) -> GameStateStore {
        self.store.clone()
    }

    pub fn snapshot(&self) -> GameSnapshot {
        self.store.snapshot()
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub(crate) fn oracle(&self) -> &O {
        &self.oracle
    }

    pub(crate) fn reconciler(&self) -> &RandomnessReconciler {
        &self.reconciler
    }

    /// Re-reads the full parameter set and applies it through the store's
    /// monotonic rule. Reads are sequential, so the snapshot is internally
    /// consistent from this client's perspective.
    pub async fn refresh_snapshot(&mut self) -> Result<Applied> {
        let started = self.gateway.is_started().await?;
        let game_counter = self.gateway.game_counter().await?;
        let balance = self.gateway.balance().await?;
        let total_bet_amount = self.gateway.total_bet_amount().await?;
        let owner_reward_percentage = self.gateway.owner_reward_percentage().await?;
        let predefined_betting_amount =
            self.gateway.predefined_betting_amount().await?;
        let max_players = self.gateway.max_players().await?;
        let players = self.gateway.players().await?;

        let applied = self.store.apply_snapshot(GameSnapshot {
            started,
            game_counter,
            balance,
            total_bet_amount,
            owner_reward_percentage,
            predefined_betting_amount,
            max_players,
            players,
        });
        if applied == Applied::Fresh
            && matches!(self.phase, GamePhase::Idle | GamePhase::Started)
        {
            self.phase = if started {
                GamePhase::Started
            } else {
                GamePhase::Idle
            };
        }
        Ok(applied)
    }

    pub async fn start_game(&mut self) -> Result<()> {
        self.ensure_not_started("starting the game")?;
        let outcome = self.gateway.start_game().await;
        self.submit(outcome, "start game failed")?;
        self.set_status("Game started");
        self.refresh_snapshot().await?;
        Ok(())
    }

    pub async fn enter_game(&mut self, amount: u128) -> Result<()> {
        if amount == 0 {
            return Err(Error::guard("entry value must be positive"));
        }
        self.ensure_not_started("entering the game")?;
        let outcome = self.gateway.enter(amount).await;
        self.submit(outcome, "enter game failed")?;
        self.set_status(format!("Entered the game with {amount} wei"));
        self.refresh_snapshot().await?;
        Ok(())
    }

    pub async fn exit_game(&mut self) -> Result<()> {
        self.ensure_not_started("exiting the game")?;
        let outcome = self.gateway.exit_game().await;
        self.submit(outcome, "exit game failed")?;
        self.set_status("Exited the game");
        self.refresh_snapshot().await?;
        Ok(())
    }

    pub async fn place_bet(&mut self, value: u8) -> Result<()> {
        if !(1..=6).contains(&value) {
            return Err(Error::guard(format!(
                "bet outcome must be between 1 and 6, got {value}"
            )));
        }
        let outcome = self.gateway.place_bet(value).await;
        self.submit(outcome, "place bet failed")?;
        self.set_status(format!("Bet placed on {value}"));
        self.refresh_snapshot().await?;
        Ok(())
    }

    pub async fn cancel_bet(&mut self) -> Result<()> {
        self.ensure_started("cancelling a bet")?;
        let outcome = self.gateway.cancel_bet().await;
        self.submit(outcome, "cancel bet failed")?;
        self.set_status("Bet cancelled");
        self.refresh_snapshot().await?;
        Ok(())
    }

    pub async fn set_owner_reward_percentage(&mut self, pct: u8) -> Result<()> {
        self.ensure_not_started("changing the owner reward percentage")?;
        if pct > MAX_OWNER_REWARD_PERCENTAGE {
            return Err(Error::guard(format!(
                "owner reward percentage must be between 0 and {MAX_OWNER_REWARD_PERCENTAGE}, got {pct}"
            )));
        }
        let outcome = self.gateway.set_owner_reward_percentage(pct).await;
        self.submit(outcome, "set owner reward failed")?;
        self.set_status(format!("Owner reward percentage set to {pct}%"));
        self.refresh_snapshot().await?;
        Ok(())
    }

    pub async fn set_predefined_betting_amount(&mut self, amount: u128) -> Result<()> {
        self.ensure_not_started("changing the betting amount")?;
        let outcome = self.gateway.set_predefined_betting_amount(amount).await;
        self.submit(outcome, "set betting amount failed")?;
        self.set_status(format!("Predefined betting amount set to {amount} wei"));
        self.refresh_snapshot().await?;
        Ok(())
    }

    pub async fn set_max_players(&mut self, max: u32) -> Result<()> {
        self.ensure_not_started("changing the player limit")?;
        if max == 0 {
            return Err(Error::guard("max players must be positive"));
        }
        let outcome = self.gateway.set_max_players(max).await;
        self.submit(outcome, "set max players failed")?;
        self.set_status(format!("Max players set to {max}"));
        self.refresh_snapshot().await?;
        Ok(())
    }

    /// Rolls the dice end to end: awaits randomness fulfillment, then
    /// releases the reward distribution exactly once.
    pub async fn roll_dice(&mut self) -> Result<Fulfillment> {
        self.begin_roll()?;
        let fulfillment = match self.reconciler.issue_and_await(&self.oracle).await {
            Ok(fulfillment) => fulfillment,
            Err(err) => {
                self.abort_roll(&err);
                return Err(err);
            }
        };
        self.resolve_roll(fulfillment).await?;
        Ok(fulfillment)
    }

    /// Guards and enters the awaiting-randomness phase. Split out of
    /// [`Self::roll_dice`] so a session can run the poll on a worker task.
    pub fn begin_roll(&mut self) -> Result<()> {
        self.ensure_started("rolling the dice")?;
        self.phase = GamePhase::AwaitingRandomness;
        self.set_status("Rolling...");
        Ok(())
    }

    /// Restores the phase after a failed or stalled poll. The game is still
    /// running on the ledger; the owner can retry the roll.
    pub fn abort_roll(&mut self, err: &Error) {
        self.phase = GamePhase::Started;
        self.push_error(format!("dice roll stalled: {err}"));
    }

    /// Releases the reward distribution for a fulfilled request. The request
    /// id is marked consumed before the call is issued, so at most one
    /// distribution can ever go out per request; a failed call un-consumes
    /// the id and surfaces the error so the owner can retry.
    pub async fn resolve_roll(&mut self, fulfillment: Fulfillment) -> Result<()> {
        let request_id = fulfillment.request.request_id;
        if !self.consumed.insert(request_id) {
            warn!(%request_id, "distribution already released for request");
            return Ok(());
        }
        self.phase = GamePhase::Distributing;
        info!(%request_id, word = fulfillment.random_word, "distributing rewards");
        if let Err(err) = self.gateway.roll_dice_and_distribute_rewards().await {
            self.consumed.remove(&request_id);
            self.phase = GamePhase::Started;
            self.push_error(format!("reward distribution failed: {err}"));
            return Err(err);
        }
        self.phase = GamePhase::Idle;
        self.set_status("Rewards distributed");
        self.refresh_snapshot().await?;
        self.fetch_latest_results().await?;
        Ok(())
    }

    /// Fetches and records the full result set for a cycle. Recording is
    /// idempotent, so overlapping fetches and event deliveries are harmless.
    pub async fn fetch_results(&mut self, game_id: u64) -> Result<Vec<BetResult>> {
        let results = self.gateway.game_results(game_id).await?;
        for result in &results {
            self.store.record_result(game_id, result.clone());
        }
        Ok(results)
    }

    /// Results of the most recently completed cycle, or empty when no cycle
    /// has completed yet.
    pub async fn fetch_latest_results(&mut self) -> Result<Vec<BetResult>> {
        let counter = self.store.game_counter();
        if counter == 0 {
            return Ok(Vec::new());
        }
        self.fetch_results(counter - 1).await
    }

    /// This participant's result for a cycle. `None` means it did not
    /// participate, which is a valid outcome.
    pub fn my_result(&self, game_id: u64) -> Option<BetResult> {
        self.store.result_for(game_id, &self.address)
    }

    /// Applies a received contract event. Handlers are idempotent: events
    /// are delivered at least once and may arrive in any order relative to
    /// user-initiated refreshes.
    pub async fn handle_event(&mut self, event: GameEvent) -> Result<()> {
        match event {
            GameEvent::GameStarted => {
                self.store.force_started(true);
                self.refresh_snapshot().await?;
            }
            GameEvent::GameEnded => {
                self.store.force_started(false);
                self.refresh_snapshot().await?;
                self.fetch_latest_results().await?;
            }
            GameEvent::DiceRollResult(event) => {
                let result = BetResult {
                    participant: event.player,
                    chosen_value: event.bet_outcome,
                    rolled_value: event.random_roll,
                    won: event.won,
                    amount_won: event.reward,
                    balance_after: event.balance,
                };
                self.store.record_result(event.game_id, result);
            }
        }
        Ok(())
    }

    fn ensure_started(&self, action: &str) -> Result<()> {
        if !self.store.snapshot().started {
            return Err(Error::guard(format!(
                "{action} requires a running game"
            )));
        }
        Ok(())
    }

    fn ensure_not_started(&self, action: &str) -> Result<()> {
        if self.store.snapshot().started {
            return Err(Error::guard(format!(
                "{action} is only possible before the game starts"
            )));
        }
        Ok(())
    }

    fn submit(&mut self, outcome: Result<()>, context: &str) -> Result<()> {
        if let Err(err) = outcome {
            self.push_error(format!("{context}: {err}"));
            return Err(err);
        }
        Ok(())
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
    }

    pub(crate) fn push_error(&mut self, message: String) {
        warn!("{message}");
        self.errors.push(message);
        if self.errors.len() > ERROR_BUFFER_DEPTH {
            let drain = self.errors.len() - ERROR_BUFFER_DEPTH;
            self.errors.drain(0..drain);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        test_helpers::{
            TestContext,
            addr,
        },
        types::RandomnessRequest,
    };
    use chrono::Utc;

    #[tokio::test]
    async fn set_max_players__rejected_while_game_is_started() {
        // given
        let ctx = TestContext::new();
        let mut owner = ctx.owner_controller();
        owner.start_game().await.unwrap();

        // when
        let outcome = owner.set_max_players(8).await;

        // then: the guard fires before any ledger call is attempted.
        assert!(matches!(outcome, Err(Error::Guard { .. })));
        assert_eq!(ctx.ledger.set_max_players_calls(), 0);
    }

    #[tokio::test]
    async fn set_owner_reward_percentage__rejects_values_above_ten() {
        // given
        let ctx = TestContext::new();
        let mut owner = ctx.owner_controller();

        // when
        let outcome = owner.set_owner_reward_percentage(11).await;

        // then
        assert!(matches!(outcome, Err(Error::Guard { .. })));
    }

    #[tokio::test]
    async fn place_bet__out_of_range_never_reaches_the_gateway() {
        // given
        let ctx = TestContext::new();
        let mut player = ctx.player_controller();

        // when
        let outcome = player.place_bet(7).await;

        // then
        assert!(matches!(outcome, Err(Error::Guard { .. })));
        assert!(ctx.ledger.placed_bets().is_empty());
    }

    #[tokio::test]
    async fn place_bet__in_range_with_started_game_proceeds() {
        // given
        let ctx = TestContext::new();
        let mut player = ctx.player_controller();
        player.enter_game(1_000).await.unwrap();
        ctx.owner_controller().start_game().await.unwrap();
        player.refresh_snapshot().await.unwrap();

        // when
        player.place_bet(3).await.unwrap();

        // then
        assert_eq!(ctx.ledger.placed_bets(), vec![(ctx.player, 3)]);
    }

    #[tokio::test]
    async fn enter_game__requires_a_positive_entry_value() {
        // given
        let ctx = TestContext::new();
        let mut player = ctx.player_controller();

        // when
        let outcome = player.enter_game(0).await;

        // then
        assert!(matches!(outcome, Err(Error::Guard { .. })));
        assert!(ctx.ledger.snapshot().players.is_empty());
    }

    #[tokio::test]
    async fn cancel_bet__rejected_before_the_game_starts() {
        // given
        let ctx = TestContext::new();
        let mut player = ctx.player_controller();

        // when
        let outcome = player.cancel_bet().await;

        // then
        assert!(matches!(outcome, Err(Error::Guard { .. })));
    }

    #[tokio::test]
    async fn handle_event__duplicate_dice_roll_result_records_once() {
        // given
        let ctx = TestContext::new();
        let mut player = ctx.player_controller();
        let event = GameEvent::dice_roll_result(3, ctx.player, 5, 5, true, 6_000, 6_000);

        // when
        player.handle_event(event.clone()).await.unwrap();
        player.handle_event(event).await.unwrap();

        // then
        let results = player.store().results(3);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].amount_won, 6_000);
    }

    #[tokio::test]
    async fn resolve_roll__consumed_request_releases_no_second_distribution() {
        // given
        let ctx = TestContext::new();
        let mut owner = ctx.owner_controller();
        owner.start_game().await.unwrap();
        let fulfillment = Fulfillment {
            request: RandomnessRequest {
                request_id: RequestId(6),
                issued_at: Utc::now(),
            },
            random_word: 4,
        };
        owner.resolve_roll(fulfillment).await.unwrap();

        // when: a second observation of the same fulfilled request.
        owner.resolve_roll(fulfillment).await.unwrap();

        // then
        assert_eq!(ctx.ledger.distribute_calls(), 1);
    }

    #[tokio::test]
    async fn resolve_roll__failed_distribution_unconsumes_the_request() {
        // given
        let ctx = TestContext::new();
        let mut owner = ctx.owner_controller();
        owner.start_game().await.unwrap();
        ctx.ledger.reject_next_call("distribution reverted");
        let fulfillment = Fulfillment {
            request: RandomnessRequest {
                request_id: RequestId(6),
                issued_at: Utc::now(),
            },
            random_word: 4,
        };

        // when
        let outcome = owner.resolve_roll(fulfillment).await;

        // then: the cycle is not marked resolved, so a retry goes through.
        assert!(matches!(outcome, Err(Error::Rejected { .. })));
        assert_eq!(owner.phase(), GamePhase::Started);
        owner.resolve_roll(fulfillment).await.unwrap();
        assert_eq!(ctx.ledger.distribute_calls(), 2);
    }

    #[tokio::test]
    async fn handle_event__game_started_forces_the_started_flag() {
        // given
        let ctx = TestContext::new();
        let mut player = ctx.player_controller();
        ctx.ledger.set_started(true);

        // when
        player.handle_event(GameEvent::GameStarted).await.unwrap();

        // then
        assert!(player.snapshot().started);
        assert_eq!(player.phase(), GamePhase::Started);
    }

    #[tokio::test]
    async fn my_result__filters_to_the_local_address() {
        // given
        let ctx = TestContext::new();
        let mut player = ctx.player_controller();
        ctx.ledger.seed_results(
            2,
            vec![
                (addr(7), 1, 4, false, 0, 100),
                (ctx.player, 4, 4, true, 500, 600),
                (addr(8), 6, 4, false, 0, 50),
            ],
        );

        // when
        player.fetch_results(2).await.unwrap();

        // then
        let mine = player.my_result(2).unwrap();
        assert_eq!(mine.participant, ctx.player);
        assert!(mine.won);
    }
}
