use crate::{
    Error,
    Result,
    controller::GameController,
    gateway::{
        EventSource,
        LedgerGateway,
        RandomnessOracle,
    },
    reconciler::Fulfillment,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{
    info,
    warn,
};

/// Actions a presentation layer can submit to a running session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    StartGame,
    EnterGame { amount: u128 },
    ExitGame,
    PlaceBet { value: u8 },
    CancelBet,
    RollDice,
    SetOwnerRewardPercentage { pct: u8 },
    SetPredefinedBettingAmount { amount: u128 },
    SetMaxPlayers { max: u32 },
    Refresh,
    FetchResults { game_id: u64 },
    Shutdown,
}

/// Cloneable sender half used to drive a session from the outside.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::NotConnected {
                reason: String::from("session is no longer running"),
            })
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
    }
}

/// One wallet session against the ledger: an explicit context created on
/// connect and torn down on drop, instead of ambient module-level handles.
///
/// The session owns the controller, the event subscription, and the roll
/// worker slot. All pending work is cancelled on teardown so a stale session
/// can never mutate a successor's state.
pub struct Session<L, O, E> {
    controller: GameController<L, O>,
    events: E,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    handle: SessionHandle,
    roll_task: Option<JoinHandle<()>>,
    last_event_seq: Option<u64>,
}

impl<L, O, E> Session<L, O, E>
where
    L: LedgerGateway + Send + Sync + 'static,
    O: RandomnessOracle + Clone + Send + Sync + 'static,
    E: EventSource + Send + 'static,
{
    /// Connects a session: hydrates the store with an initial snapshot and
    /// attaches the event subscription. Subscription setup happens here and
    /// only here, so reconnecting always goes through the same routine.
    pub async fn connect(
        mut controller: GameController<L, O>,
        events: E,
    ) -> Result<Self> {
        controller
            .refresh_snapshot()
            .await
            .map_err(|err| Error::NotConnected {
                reason: format!("initial snapshot read failed: {err}"),
            })?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        info!(address = %controller.address(), "session connected");
        Ok(Self {
            controller,
            events,
            commands: command_rx,
            handle: SessionHandle {
                commands: command_tx,
            },
            roll_task: None,
            last_event_seq: None,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn controller(&self) -> &GameController<L, O> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut GameController<L, O> {
        &mut self.controller
    }

    /// Drives the session until shutdown: user commands, ledger events, and
    /// roll-worker completions interleave on one loop, so no callback can
    /// race another into the store.
    pub async fn run(mut self) -> Result<()> {
        let (roll_tx, mut roll_rx) = mpsc::unbounded_channel::<Result<Fulfillment>>();
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    match command {
                        SessionCommand::Shutdown => break,
                        SessionCommand::RollDice => self.spawn_roll(&roll_tx),
                        other => {
                            if let Err(err) = self.apply(other).await {
                                warn!(?err, "command failed");
                            }
                        }
                    }
                }
                outcome = roll_rx.recv() => {
                    // The sender half lives on the stack above, so recv only
                    // yields while a worker is running.
                    let Some(outcome) = outcome else {
                        break;
                    };
                    self.roll_task = None;
                    match outcome {
                        Ok(fulfillment) => {
                            if let Err(err) =
                                self.controller.resolve_roll(fulfillment).await
                            {
                                warn!(?err, "reward distribution failed");
                            }
                        }
                        Err(err) => self.controller.abort_roll(&err),
                    }
                }
                event = self.events.next_event() => {
                    match event {
                        Ok((event, seq)) => {
                            if self.last_event_seq.is_some_and(|seen| seq <= seen) {
                                // Duplicate delivery; handlers are idempotent
                                // anyway, but there is no point replaying it.
                                continue;
                            }
                            self.last_event_seq = Some(seq);
                            if let Err(err) = self.controller.handle_event(event).await {
                                warn!(?err, seq, "event handling failed");
                            }
                        }
                        Err(err) => {
                            warn!(?err, "event stream failed");
                            break;
                        }
                    }
                }
            }
        }
        self.teardown();
        Ok(())
    }

    /// Starts the randomness poll on a worker task. Any previous worker for
    /// this cycle is aborted first: exactly one poll timer is live at a
    /// time, so two timers can never race to trigger distribution.
    fn spawn_roll(&mut self, roll_tx: &mpsc::UnboundedSender<Result<Fulfillment>>) {
        if let Err(err) = self.controller.begin_roll() {
            warn!(?err, "roll rejected");
            return;
        }
        if let Some(task) = self.roll_task.take() {
            task.abort();
            info!("previous randomness poll cancelled");
        }
        let oracle = self.controller.oracle().clone();
        let reconciler = self.controller.reconciler().clone();
        let tx = roll_tx.clone();
        self.roll_task = Some(tokio::spawn(async move {
            let outcome = reconciler.issue_and_await(&oracle).await;
            let _ = tx.send(outcome);
        }));
    }

    async fn apply(&mut self, command: SessionCommand) -> Result<()> {
        match command {
            SessionCommand::StartGame => self.controller.start_game().await,
            SessionCommand::EnterGame { amount } => {
                self.controller.enter_game(amount).await
            }
            SessionCommand::ExitGame => self.controller.exit_game().await,
            SessionCommand::PlaceBet { value } => self.controller.place_bet(value).await,
            SessionCommand::CancelBet => self.controller.cancel_bet().await,
            SessionCommand::SetOwnerRewardPercentage { pct } => {
                self.controller.set_owner_reward_percentage(pct).await
            }
            SessionCommand::SetPredefinedBettingAmount { amount } => {
                self.controller.set_predefined_betting_amount(amount).await
            }
            SessionCommand::SetMaxPlayers { max } => {
                self.controller.set_max_players(max).await
            }
            SessionCommand::Refresh => {
                self.controller.refresh_snapshot().await.map(|_| ())
            }
            SessionCommand::FetchResults { game_id } => {
                self.controller.fetch_results(game_id).await.map(|_| ())
            }
            SessionCommand::RollDice | SessionCommand::Shutdown => Ok(()),
        }
    }

    fn teardown(&mut self) {
        if let Some(task) = self.roll_task.take() {
            task.abort();
        }
        // The next session rehydrates everything from the ledger.
        self.controller.store().clear();
        info!("session torn down");
    }
}

impl<L, O, E> Drop for Session<L, O, E> {
    fn drop(&mut self) {
        if let Some(task) = self.roll_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        test_helpers::{
            FakeEventSource,
            TestContext,
        },
        types::RequestId,
    };
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn run__commands_drive_the_controller() {
        // given
        let ctx = TestContext::new();
        let (events, _event_tx) = FakeEventSource::new_with_sender();
        let session = Session::connect(ctx.owner_controller(), events)
            .await
            .unwrap();
        let handle = session.handle();
        let store = session.controller().store();
        let running = tokio::spawn(session.run());

        // when
        handle.send(SessionCommand::StartGame).unwrap();
        sleep(Duration::from_millis(20)).await;

        // then
        assert!(store.snapshot().started);
        handle.shutdown();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn run__roll_command_distributes_exactly_once() {
        // given
        let ctx = TestContext::new();
        ctx.oracle.set_last_request_id(RequestId(5));
        ctx.oracle.advance_on_request(true);
        ctx.oracle.fulfill_after_fetches(3, 4);
        let controller = ctx
            .owner_controller()
            .with_reconciler(TestContext::fast_reconciler());
        let (events, _event_tx) = FakeEventSource::new_with_sender();
        let mut session = Session::connect(controller, events).await.unwrap();
        session.controller_mut().start_game().await.unwrap();
        let handle = session.handle();
        let running = tokio::spawn(session.run());

        // when
        handle.send(SessionCommand::RollDice).unwrap();
        sleep(Duration::from_millis(100)).await;

        // then
        assert_eq!(ctx.ledger.distribute_calls(), 1);
        assert!(!ctx.ledger.snapshot().started);
        handle.shutdown();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn run__second_roll_aborts_the_first_poll() {
        // given: the first request is never fulfilled.
        let ctx = TestContext::new();
        ctx.oracle.set_last_request_id(RequestId(5));
        ctx.oracle.advance_on_request(true);
        let controller = ctx
            .owner_controller()
            .with_reconciler(TestContext::fast_reconciler());
        let (events, _event_tx) = FakeEventSource::new_with_sender();
        let mut session = Session::connect(controller, events).await.unwrap();
        session.controller_mut().start_game().await.unwrap();
        let handle = session.handle();
        let running = tokio::spawn(session.run());
        handle.send(SessionCommand::RollDice).unwrap();
        sleep(Duration::from_millis(20)).await;

        // when: a second roll supersedes the stalled one; only the second
        // request id ever fulfills.
        ctx.oracle.fulfill_request(RequestId(7), 9);
        handle.send(SessionCommand::RollDice).unwrap();
        sleep(Duration::from_millis(100)).await;

        // then: only one distribution was ever released.
        assert_eq!(ctx.ledger.distribute_calls(), 1);
        handle.shutdown();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn run__duplicate_event_sequence_is_skipped() {
        // given
        let ctx = TestContext::new();
        let (events, event_tx) = FakeEventSource::new_with_sender();
        let session = Session::connect(ctx.player_controller(), events)
            .await
            .unwrap();
        let handle = session.handle();
        let store = session.controller().store();
        let running = tokio::spawn(session.run());
        let event =
            crate::events::GameEvent::dice_roll_result(1, ctx.player, 2, 2, true, 10, 10);

        // when: the same event is delivered twice under one sequence number.
        event_tx.send((event.clone(), 7)).await.unwrap();
        event_tx.send((event, 7)).await.unwrap();
        sleep(Duration::from_millis(20)).await;

        // then
        assert_eq!(store.results(1).len(), 1);
        handle.shutdown();
        running.await.unwrap().unwrap();
    }
}
