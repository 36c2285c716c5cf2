//! Client-side protocol for the on-chain dice roll game.
//!
//! The ledger is the single source of truth; this crate only reconciles a
//! local snapshot with it. No mutation is committed locally before the
//! ledger confirms it, and randomness fulfillment is detected through the
//! request-id handshake in [`reconciler`].

pub mod controller;
pub mod events;
pub mod gateway;
pub mod http;
pub mod reconciler;
pub mod session;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use controller::{GameController, GamePhase};
pub use reconciler::{Fulfillment, RandomnessReconciler};
pub use session::{Session, SessionCommand, SessionHandle};
pub use store::GameStateStore;

use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no active ledger connection: {reason}")]
    NotConnected { reason: String },
    #[error("rejected before submission: {reason}")]
    Guard { reason: String },
    #[error("rejected by ledger: {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("randomness not fulfilled after {attempts} poll attempts")]
    PollTimeout { attempts: usize },
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("event stream closed")]
    EventStreamClosed,
}

impl Error {
    pub fn guard(reason: impl Into<String>) -> Self {
        Error::Guard {
            reason: reason.into(),
        }
    }

    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        Error::Rejected {
            status,
            body: body.into(),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
