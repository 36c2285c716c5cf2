use crate::{
    Error,
    Result,
    gateway::{
        RandomnessOracle,
        UNFULFILLED_WORD,
    },
    types::{
        RandomnessRequest,
        RequestId,
    },
};
use chrono::Utc;
use std::time::Duration;
use tokio::time;
use tracing::{
    debug,
    warn,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_MAX_ISSUE_ATTEMPTS: usize = 5;
const DEFAULT_MAX_FETCH_ATTEMPTS: usize = 30;

/// A fulfilled randomness request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fulfillment {
    pub request: RandomnessRequest,
    pub random_word: u64,
}

/// Detects fulfillment of a randomness request through the request-id
/// handshake: read the oracle's last request id as a baseline, issue the
/// request, wait for the id to move off the baseline, then poll the word
/// behind the new id until it is no longer the unfulfilled sentinel.
///
/// Both loops are bounded; a stalled oracle surfaces as
/// [`Error::PollTimeout`] instead of polling forever. Oracle read/write
/// failures inside a loop are logged and consume a tick.
#[derive(Clone, Debug)]
pub struct RandomnessReconciler {
    poll_interval: Duration,
    max_issue_attempts: usize,
    max_fetch_attempts: usize,
}

impl Default for RandomnessReconciler {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_issue_attempts: DEFAULT_MAX_ISSUE_ATTEMPTS,
            max_fetch_attempts: DEFAULT_MAX_FETCH_ATTEMPTS,
        }
    }
}

impl RandomnessReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_issue_attempts(mut self, attempts: usize) -> Self {
        self.max_issue_attempts = attempts;
        self
    }

    pub fn with_max_fetch_attempts(mut self, attempts: usize) -> Self {
        self.max_fetch_attempts = attempts;
        self
    }

    /// Issues a randomness request and resolves once the oracle has
    /// fulfilled it. Returns the fulfilled word together with the request
    /// it answered; polling stops as soon as the word is observed.
    pub async fn issue_and_await<O: RandomnessOracle>(
        &self,
        oracle: &O,
    ) -> Result<Fulfillment> {
        let baseline = oracle.last_request_id().await?;
        let mut ticker = time::interval(self.poll_interval);
        // The first tick of a fresh interval completes immediately.
        ticker.tick().await;

        let request = self.await_new_request_id(oracle, baseline, &mut ticker).await?;
        debug!(request_id = %request.request_id, "randomness request observed");
        self.await_fulfillment(oracle, request, &mut ticker).await
    }

    /// Issues the request and waits until the oracle advertises an id that
    /// differs from the baseline. An unchanged id after a full period means
    /// the request was dropped, so it is re-issued rather than waited on
    /// forever.
    async fn await_new_request_id<O: RandomnessOracle>(
        &self,
        oracle: &O,
        baseline: RequestId,
        ticker: &mut time::Interval,
    ) -> Result<RandomnessRequest> {
        let mut attempts = 0;
        loop {
            if attempts >= self.max_issue_attempts {
                return Err(Error::PollTimeout { attempts });
            }
            attempts += 1;
            if let Err(err) = oracle.request_random_words().await {
                warn!(?err, attempt = attempts, "randomness request failed");
            }
            ticker.tick().await;
            match oracle.last_request_id().await {
                Ok(id) if id != baseline => {
                    return Ok(RandomnessRequest {
                        request_id: id,
                        issued_at: Utc::now(),
                    });
                }
                Ok(_) => {
                    debug!(
                        %baseline,
                        attempt = attempts,
                        "request id unchanged; re-issuing"
                    );
                }
                Err(err) => warn!(?err, "request id read failed"),
            }
        }
    }

    async fn await_fulfillment<O: RandomnessOracle>(
        &self,
        oracle: &O,
        request: RandomnessRequest,
        ticker: &mut time::Interval,
    ) -> Result<Fulfillment> {
        let mut attempts = 0;
        loop {
            if attempts >= self.max_fetch_attempts {
                return Err(Error::PollTimeout { attempts });
            }
            attempts += 1;
            match oracle.fetch_random_word(request.request_id).await {
                Ok(word) if word != UNFULFILLED_WORD => {
                    return Ok(Fulfillment {
                        request,
                        random_word: word,
                    });
                }
                Ok(_) => {
                    debug!(request_id = %request.request_id, "random word not fetched yet");
                }
                Err(err) => warn!(?err, "random word fetch failed"),
            }
            ticker.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::FakeOracle;

    fn fast_reconciler() -> RandomnessReconciler {
        RandomnessReconciler::new().with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn issue_and_await__returns_word_once_oracle_fulfills() {
        // given: baseline id 5, id advances on request, word unset for the
        // first two fetches and 4 on the third.
        let oracle = FakeOracle::new();
        oracle.set_last_request_id(RequestId(5));
        oracle.advance_on_request(true);
        oracle.fulfill_after_fetches(3, 4);

        // when
        let fulfillment = fast_reconciler().issue_and_await(&oracle).await.unwrap();

        // then
        assert_eq!(fulfillment.random_word, 4);
        assert_eq!(fulfillment.request.request_id, RequestId(6));
        assert_eq!(oracle.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn issue_and_await__reissues_while_request_id_is_unchanged() {
        // given: the first two requests are dropped by the oracle.
        let oracle = FakeOracle::new();
        oracle.set_last_request_id(RequestId(5));
        oracle.advance_on_nth_request(3);
        oracle.fulfill_after_fetches(1, 9);

        // when
        let fulfillment = fast_reconciler().issue_and_await(&oracle).await.unwrap();

        // then
        assert_eq!(oracle.request_calls(), 3);
        assert_eq!(fulfillment.request.request_id, RequestId(6));
    }

    #[tokio::test]
    async fn issue_and_await__times_out_when_request_id_never_moves() {
        // given: the oracle never registers the request.
        let oracle = FakeOracle::new();
        oracle.set_last_request_id(RequestId(5));
        oracle.advance_on_request(false);

        // when
        let outcome = fast_reconciler()
            .with_max_issue_attempts(3)
            .issue_and_await(&oracle)
            .await;

        // then
        assert!(matches!(outcome, Err(Error::PollTimeout { attempts: 3 })));
        assert_eq!(oracle.request_calls(), 3);
        assert_eq!(oracle.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn issue_and_await__times_out_when_word_is_never_fulfilled() {
        // given: the request registers but the word stays at the sentinel.
        let oracle = FakeOracle::new();
        oracle.set_last_request_id(RequestId(5));
        oracle.advance_on_request(true);

        // when
        let outcome = fast_reconciler()
            .with_max_fetch_attempts(4)
            .issue_and_await(&oracle)
            .await;

        // then
        assert!(matches!(outcome, Err(Error::PollTimeout { attempts: 4 })));
        assert_eq!(oracle.fetch_calls(), 4);
    }

    #[tokio::test]
    async fn issue_and_await__retries_through_oracle_read_failures() {
        // given: the first fetch errors, the second fulfills.
        let oracle = FakeOracle::new();
        oracle.set_last_request_id(RequestId(5));
        oracle.advance_on_request(true);
        oracle.fail_next_fetches(1);
        oracle.fulfill_after_fetches(2, 11);

        // when
        let fulfillment = fast_reconciler().issue_and_await(&oracle).await.unwrap();

        // then
        assert_eq!(fulfillment.random_word, 11);
    }
}
