use crate::types::Address;
use serde::{
    Deserialize,
    Serialize,
};

/// Events emitted by the game contract. Delivery is at-least-once, so every
/// handler must be idempotent.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub enum GameEvent {
    GameStarted,
    GameEnded,
    DiceRollResult(DiceRollResultEvent),
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct DiceRollResultEvent {
    pub game_id: u64,
    pub player: Address,
    pub bet_outcome: u8,
    pub random_roll: u8,
    pub won: bool,
    pub reward: u128,
    pub balance: u128,
}

impl GameEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn dice_roll_result(
        game_id: u64,
        player: Address,
        bet_outcome: u8,
        random_roll: u8,
        won: bool,
        reward: u128,
        balance: u128,
    ) -> Self {
        let inner = DiceRollResultEvent {
            game_id,
            player,
            bet_outcome,
            random_roll,
            won,
            reward,
            balance,
        };
        GameEvent::DiceRollResult(inner)
    }
}
