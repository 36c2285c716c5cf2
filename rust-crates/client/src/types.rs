use crate::Error;
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    str::FromStr,
};

/// A 20-byte account address.
///
/// Parsing accepts mixed-case hex with or without a `0x` prefix, so two
/// spellings of the same account always compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 20]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes =
            hex::decode(stripped).map_err(|_| Error::InvalidAddress(s.to_string()))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| Error::InvalidAddress(s.to_string()))?;
        Ok(Address(bytes))
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

/// Opaque token correlating a randomness request with its fulfillment.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize,
)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The locally known game state. Authoritative values come only from
/// confirmed ledger reads and received events.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub started: bool,
    pub game_counter: u64,
    /// Ledger-held funds, in wei.
    pub balance: u128,
    pub total_bet_amount: u128,
    pub owner_reward_percentage: u8,
    pub predefined_betting_amount: u128,
    pub max_players: u32,
    pub players: Vec<Address>,
}

/// One participant's outcome in a completed game cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetResult {
    pub participant: Address,
    pub chosen_value: u8,
    pub rolled_value: u8,
    pub won: bool,
    pub amount_won: u128,
    pub balance_after: u128,
}

/// An outstanding randomness request. At most one is tracked per game cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RandomnessRequest {
    pub request_id: RequestId,
    pub issued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn address_from_str__is_case_insensitive() {
        // given
        let lower: Address = "0xab5801a7d398351b8be11c439e05c5b3259aec9b"
            .parse()
            .unwrap();

        // when
        let upper: Address = "0xAB5801A7D398351B8bE11C439e05C5B3259aeC9B"
            .parse()
            .unwrap();

        // then
        assert_eq!(lower, upper);
    }

    #[test]
    fn address_from_str__rejects_short_input() {
        // given
        let input = "0x1234";

        // when
        let parsed = input.parse::<Address>();

        // then
        assert!(matches!(parsed, Err(Error::InvalidAddress(_))));
    }

    #[test]
    fn address_display__round_trips_through_from_str() {
        // given
        let address: Address = "ab5801a7d398351b8be11c439e05c5b3259aec9b"
            .parse()
            .unwrap();

        // when
        let reparsed: Address = address.to_string().parse().unwrap();

        // then
        assert_eq!(address, reparsed);
    }
}
