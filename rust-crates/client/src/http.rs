use crate::{
    Error,
    Result,
    events::GameEvent,
    gateway::{
        EventSource,
        LedgerGateway,
        RandomnessOracle,
    },
    types::{
        Address,
        BetResult,
        RequestId,
    },
};
use reqwest::StatusCode;
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use std::{
    collections::VecDeque,
    time::Duration,
};
use tokio::time;
use tracing::debug;

const DEFAULT_EVENT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Serialize)]
struct AmountBody {
    amount: u128,
}

#[derive(Serialize)]
struct BetBody {
    value: u8,
}

#[derive(Serialize)]
struct PercentageBody {
    pct: u8,
}

#[derive(Serialize)]
struct MaxPlayersBody {
    max: u32,
}

#[derive(Deserialize)]
struct EventEnvelope {
    seq: u64,
    event: GameEvent,
}

/// JSON gateway to the node bridge exposing the game and oracle contracts.
#[derive(Clone)]
pub struct HttpGateway {
    base_url: String,
    http: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder().build()?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let res = self.http.get(url).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(Self::error_from(status, res).await);
        }
        Ok(res.json().await?)
    }

    async fn post(&self, path: &str) -> Result<()> {
        let url = format!("{}{path}", self.base_url);
        let res = self.http.post(url).send().await?;
        Self::confirm(res).await
    }

    async fn post_body<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let url = format!("{}{path}", self.base_url);
        let res = self.http.post(url).json(body).send().await?;
        Self::confirm(res).await
    }

    /// A write is confirmed only by a success status; anything else is a
    /// ledger rejection carrying the revert reason in the body.
    async fn confirm(res: reqwest::Response) -> Result<()> {
        let status = res.status();
        if !status.is_success() {
            return Err(Self::error_from(status, res).await);
        }
        Ok(())
    }

    async fn error_from(status: StatusCode, res: reqwest::Response) -> Error {
        let body = res
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable body>"));
        Error::rejected(status.as_u16(), body)
    }
}

impl LedgerGateway for HttpGateway {
    async fn is_started(&self) -> Result<bool> {
        self.get_json("/game/started").await
    }

    async fn players(&self) -> Result<Vec<Address>> {
        self.get_json("/game/players").await
    }

    async fn balance(&self) -> Result<u128> {
        self.get_json("/game/balance").await
    }

    async fn game_counter(&self) -> Result<u64> {
        self.get_json("/game/counter").await
    }

    async fn total_bet_amount(&self) -> Result<u128> {
        self.get_json("/game/total-bet-amount").await
    }

    async fn owner_reward_percentage(&self) -> Result<u8> {
        self.get_json("/game/owner-reward-percentage").await
    }

    async fn predefined_betting_amount(&self) -> Result<u128> {
        self.get_json("/game/predefined-betting-amount").await
    }

    async fn max_players(&self) -> Result<u32> {
        self.get_json("/game/max-players").await
    }

    async fn game_results(&self, game_id: u64) -> Result<Vec<BetResult>> {
        let url = format!("{}/game/results/{game_id}", self.base_url);
        let res = self.http.get(url).send().await?;
        let status = res.status();
        // No results recorded for the cycle is a valid outcome.
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(Self::error_from(status, res).await);
        }
        Ok(res.json().await?)
    }

    async fn start_game(&self) -> Result<()> {
        self.post("/game/start").await
    }

    async fn enter(&self, amount: u128) -> Result<()> {
        self.post_body("/game/enter", &AmountBody { amount }).await
    }

    async fn exit_game(&self) -> Result<()> {
        self.post("/game/exit").await
    }

    async fn place_bet(&self, value: u8) -> Result<()> {
        self.post_body("/game/bet", &BetBody { value }).await
    }

    async fn cancel_bet(&self) -> Result<()> {
        self.post("/game/cancel-bet").await
    }

    async fn roll_dice_and_distribute_rewards(&self) -> Result<()> {
        self.post("/game/roll").await
    }

    async fn set_owner_reward_percentage(&self, pct: u8) -> Result<()> {
        self.post_body("/game/settings/owner-reward", &PercentageBody { pct })
            .await
    }

    async fn set_predefined_betting_amount(&self, amount: u128) -> Result<()> {
        self.post_body("/game/settings/betting-amount", &AmountBody { amount })
            .await
    }

    async fn set_max_players(&self, max: u32) -> Result<()> {
        self.post_body("/game/settings/max-players", &MaxPlayersBody { max })
            .await
    }
}

impl RandomnessOracle for HttpGateway {
    async fn last_request_id(&self) -> Result<RequestId> {
        let id: u64 = self.get_json("/oracle/last-request-id").await?;
        Ok(RequestId(id))
    }

    async fn request_random_words(&self) -> Result<()> {
        self.post("/oracle/request").await
    }

    async fn fetch_random_word(&self, request_id: RequestId) -> Result<u64> {
        self.get_json(&format!("/oracle/word/{request_id}")).await
    }
}

/// Event feed over the bridge's cursor endpoint. Delivery is at-least-once;
/// the cursor only advances once an event has been handed out, so a poll
/// dropped mid-flight is simply re-fetched.
pub struct HttpEventSource {
    gateway: HttpGateway,
    cursor: u64,
    buffer: VecDeque<(GameEvent, u64)>,
    poll_interval: Duration,
}

impl HttpEventSource {
    pub fn new(gateway: HttpGateway) -> Self {
        Self {
            gateway,
            cursor: 0,
            buffer: VecDeque::new(),
            poll_interval: DEFAULT_EVENT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl EventSource for HttpEventSource {
    async fn next_event(&mut self) -> Result<(GameEvent, u64)> {
        loop {
            if let Some((event, seq)) = self.buffer.pop_front() {
                self.cursor = seq;
                return Ok((event, seq));
            }
            let path = format!("/events?since={}", self.cursor);
            let batch: Vec<EventEnvelope> = self.gateway.get_json(&path).await?;
            let fresh = batch
                .into_iter()
                .filter(|envelope| envelope.seq > self.cursor);
            for envelope in fresh {
                self.buffer.push_back((envelope.event, envelope.seq));
            }
            if self.buffer.is_empty() {
                debug!(cursor = self.cursor, "no new events; waiting");
                time::sleep(self.poll_interval).await;
            }
        }
    }
}
