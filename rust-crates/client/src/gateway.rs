use crate::{
    Result,
    events::GameEvent,
    types::{
        Address,
        BetResult,
        RequestId,
    },
};

/// The oracle reserves this word for requests that have not been fulfilled
/// yet; fulfilled words are always non-zero.
pub const UNFULFILLED_WORD: u64 = 0;

/// Typed request/response surface of the remote game contract.
///
/// Every write resolves on finality or fails; the returned future is the
/// pending-confirmation handle. The ledger re-validates every call
/// authoritatively, client-side guards are a convenience only.
pub trait LedgerGateway {
    fn is_started(&self) -> impl Future<Output = Result<bool>> + Send;
    fn players(&self) -> impl Future<Output = Result<Vec<Address>>> + Send;
    fn balance(&self) -> impl Future<Output = Result<u128>> + Send;
    fn game_counter(&self) -> impl Future<Output = Result<u64>> + Send;
    fn total_bet_amount(&self) -> impl Future<Output = Result<u128>> + Send;
    fn owner_reward_percentage(&self) -> impl Future<Output = Result<u8>> + Send;
    fn predefined_betting_amount(&self) -> impl Future<Output = Result<u128>> + Send;
    fn max_players(&self) -> impl Future<Output = Result<u32>> + Send;
    fn game_results(
        &self,
        game_id: u64,
    ) -> impl Future<Output = Result<Vec<BetResult>>> + Send;

    fn start_game(&self) -> impl Future<Output = Result<()>> + Send;
    fn enter(&self, amount: u128) -> impl Future<Output = Result<()>> + Send;
    fn exit_game(&self) -> impl Future<Output = Result<()>> + Send;
    fn place_bet(&self, value: u8) -> impl Future<Output = Result<()>> + Send;
    fn cancel_bet(&self) -> impl Future<Output = Result<()>> + Send;
    fn roll_dice_and_distribute_rewards(&self) -> impl Future<Output = Result<()>> + Send;
    fn set_owner_reward_percentage(
        &self,
        pct: u8,
    ) -> impl Future<Output = Result<()>> + Send;
    fn set_predefined_betting_amount(
        &self,
        amount: u128,
    ) -> impl Future<Output = Result<()>> + Send;
    fn set_max_players(&self, max: u32) -> impl Future<Output = Result<()>> + Send;
}

/// The randomness oracle contract, decoupled from the main ledger.
pub trait RandomnessOracle {
    fn last_request_id(&self) -> impl Future<Output = Result<RequestId>> + Send;
    fn request_random_words(&self) -> impl Future<Output = Result<()>> + Send;
    fn fetch_random_word(
        &self,
        request_id: RequestId,
    ) -> impl Future<Output = Result<u64>> + Send;
}

/// A stream of contract events paired with a monotonic sequence number.
pub trait EventSource {
    fn next_event(&mut self) -> impl Future<Output = Result<(GameEvent, u64)>> + Send;
}
