#![allow(non_snake_case)]

use diceroll_client::{
    Error,
    test_helpers::TestContext,
};
use proptest::prelude::*;
use tokio::runtime::Runtime;

#[tokio::test]
async fn owner_settings__rejected_client_side_while_the_game_runs() {
    let ctx = TestContext::new();

    // given
    let mut owner = ctx.owner_controller();
    owner.start_game().await.unwrap();

    // when
    let max_players = owner.set_max_players(8).await;
    let reward = owner.set_owner_reward_percentage(3).await;
    let bet_amount = owner.set_predefined_betting_amount(2_000).await;

    // then: every guard fires before a ledger call is attempted.
    assert!(matches!(max_players, Err(Error::Guard { .. })));
    assert!(matches!(reward, Err(Error::Guard { .. })));
    assert!(matches!(bet_amount, Err(Error::Guard { .. })));
    assert_eq!(ctx.ledger.set_max_players_calls(), 0);
    let snapshot = ctx.ledger.snapshot();
    assert_eq!(snapshot.max_players, 6);
    assert_eq!(snapshot.owner_reward_percentage, 5);
    assert_eq!(snapshot.predefined_betting_amount, 1_000);
}

#[tokio::test]
async fn enter_game__rejected_once_the_game_has_started() {
    let ctx = TestContext::new();

    // given
    ctx.owner_controller().start_game().await.unwrap();
    let mut player = ctx.player_controller();
    player.refresh_snapshot().await.unwrap();

    // when
    let outcome = player.enter_game(1_000).await;

    // then
    assert!(matches!(outcome, Err(Error::Guard { .. })));
    assert!(ctx.ledger.snapshot().players.is_empty());
}

#[tokio::test]
async fn exit_game__rejected_once_the_game_has_started() {
    let ctx = TestContext::new();

    // given
    let mut player = ctx.player_controller();
    player.enter_game(1_000).await.unwrap();
    ctx.owner_controller().start_game().await.unwrap();
    player.refresh_snapshot().await.unwrap();

    // when
    let outcome = player.exit_game().await;

    // then
    assert!(matches!(outcome, Err(Error::Guard { .. })));
    assert_eq!(ctx.ledger.snapshot().players.len(), 1);
}

#[tokio::test]
async fn start_game__ledger_rejection_leaves_local_state_unchanged() {
    let ctx = TestContext::new();

    // given
    let mut owner = ctx.owner_controller();
    ctx.ledger.reject_next_call("only the owner can start the game");

    // when
    let outcome = owner.start_game().await;

    // then: the call reached the ledger, and nothing was committed
    // optimistically on rejection.
    assert!(matches!(outcome, Err(Error::Rejected { .. })));
    assert_eq!(ctx.ledger.start_game_calls(), 1);
    assert!(!owner.snapshot().started);
    assert_eq!(owner.errors().len(), 1);
}

// Exercises the whole u8 domain against the bet range guard.
proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]
    #[test]
    fn place_bet__only_values_one_through_six_reach_the_ledger(value in 0u8..=20) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            _place_bet__only_values_one_through_six_reach_the_ledger(value).await.unwrap()
        });
    }
}

async fn _place_bet__only_values_one_through_six_reach_the_ledger(
    value: u8,
) -> Result<(), TestCaseError> {
    let ctx = TestContext::new();

    // given
    let mut player = ctx.player_controller();
    player.enter_game(1_000).await.unwrap();
    ctx.owner_controller().start_game().await.unwrap();
    player.refresh_snapshot().await.unwrap();

    // when
    let outcome = player.place_bet(value).await;

    // then
    if (1..=6).contains(&value) {
        prop_assert!(outcome.is_ok());
        prop_assert_eq!(ctx.ledger.placed_bets(), vec![(ctx.player, value)]);
    } else {
        let is_guard_err = matches!(outcome, Err(Error::Guard { .. }));
        prop_assert!(is_guard_err);
        prop_assert!(ctx.ledger.placed_bets().is_empty());
    }
    Ok(())
}
