use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::env;
use std::str::FromStr;

pub const DEFAULT_DIFFICULTY: u8 = 4;
pub const DEFAULT_MINING_REWARD: f64 = 3.0;
pub const DEFAULT_TRANSACTION_FEE: f64 = 0.1;
pub const DEFAULT_INITIAL_SUPPLY: f64 = 1000.0;

/// Errors raised while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// Economic parameters of a ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Leading zero hex digits required in a mined block hash
    pub difficulty: u8,

    /// Base reward paid to the miner of each block
    pub mining_reward: f64,

    /// Fee charged on every transfer
    pub transaction_fee: f64,

    /// Supply minted to the first user in the genesis block
    pub initial_supply: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            difficulty: DEFAULT_DIFFICULTY,
            mining_reward: DEFAULT_MINING_REWARD,
            transaction_fee: DEFAULT_TRANSACTION_FEE,
            initial_supply: DEFAULT_INITIAL_SUPPLY,
        }
    }
}

fn read_var<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

fn check_amount(key: &str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

impl LedgerConfig {
    /// Reads `LEDGER_DIFFICULTY`, `LEDGER_MINING_REWARD`,
    /// `LEDGER_TRANSACTION_FEE` and `LEDGER_INITIAL_SUPPLY`, falling back to
    /// the defaults for unset variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = LedgerConfig::default();

        Ok(LedgerConfig {
            difficulty: read_var("LEDGER_DIFFICULTY", defaults.difficulty)?,
            mining_reward: check_amount(
                "LEDGER_MINING_REWARD",
                read_var("LEDGER_MINING_REWARD", defaults.mining_reward)?,
            )?,
            transaction_fee: check_amount(
                "LEDGER_TRANSACTION_FEE",
                read_var("LEDGER_TRANSACTION_FEE", defaults.transaction_fee)?,
            )?,
            initial_supply: check_amount(
                "LEDGER_INITIAL_SUPPLY",
                read_var("LEDGER_INITIAL_SUPPLY", defaults.initial_supply)?,
            )?,
        })
    }

    pub fn with_difficulty(mut self, difficulty: u8) -> Self {
        self.difficulty = difficulty;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();

        assert_eq!(config.difficulty, 4);
        assert_eq!(config.mining_reward, 3.0);
        assert_eq!(config.transaction_fee, 0.1);
        assert_eq!(config.initial_supply, 1000.0);
    }

    #[test]
    fn test_read_var_parses_and_rejects() {
        env::set_var("LEDGER_TEST_ONLY_VALUE", "7");
        assert_eq!(read_var::<u8>("LEDGER_TEST_ONLY_VALUE", 1).unwrap(), 7);

        env::set_var("LEDGER_TEST_ONLY_VALUE", "seven");
        assert!(read_var::<u8>("LEDGER_TEST_ONLY_VALUE", 1).is_err());

        env::remove_var("LEDGER_TEST_ONLY_VALUE");
        assert_eq!(read_var::<u8>("LEDGER_TEST_ONLY_VALUE", 1).unwrap(), 1);
    }

    #[test]
    fn test_negative_amount_is_rejected() {
        assert!(check_amount("KEY", -0.1).is_err());
        assert!(check_amount("KEY", f64::INFINITY).is_err());
        assert_eq!(check_amount("KEY", 0.0).unwrap(), 0.0);
    }
}
