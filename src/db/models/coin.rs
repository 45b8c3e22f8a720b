//! Coin amounts and coin bags.
//!
//! Amounts are arbitrary-precision integers: cumulative pool volumes grow
//! without bound and exceed u128 on long-lived pools.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context};
use num_bigint::BigInt;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

/// A single denominated amount, e.g. `10500uosmo`.
///
/// Serializes in the chain JSON convention: the amount is a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    #[serde(with = "bigint_string")]
    pub amount: BigInt,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: impl Into<BigInt>) -> Self {
        Self {
            denom: denom.into(),
            amount: amount.into(),
        }
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

impl FromStr for Coin {
    type Err = anyhow::Error;

    /// Parses the canonical `<amount><denom>` form, e.g. `50uosmo` or
    /// `1200ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| anyhow!("coin {:?} has no denom", s))?;
        if split == 0 {
            bail!("coin {:?} has no amount", s);
        }
        let (amount, denom) = s.split_at(split);
        if !denom.starts_with(|c: char| c.is_ascii_alphabetic()) {
            bail!("coin {:?} has an invalid denom", s);
        }
        Ok(Coin {
            denom: denom.to_string(),
            amount: BigInt::from_str(amount).with_context(|| format!("coin {:?}", s))?,
        })
    }
}

/// An ordered bag of coins: at most one entry per denom, sorted ascending
/// by denom. The canonical string form is `"10stake,50uosmo"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coins(Vec<Coin>);

impl Coins {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Builds a normalized bag from arbitrary coins: sorts by denom, drops
    /// zero amounts and rejects duplicate denoms.
    pub fn from_coins(coins: Vec<Coin>) -> anyhow::Result<Self> {
        let mut coins: Vec<Coin> = coins.into_iter().filter(|c| !c.amount.is_zero()).collect();
        coins.sort_by(|a, b| a.denom.cmp(&b.denom));
        for pair in coins.windows(2) {
            if pair[0].denom == pair[1].denom {
                bail!("duplicate denom {:?}", pair[0].denom);
            }
        }
        Ok(Self(coins))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Coin> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, denom: &str) -> Option<&Coin> {
        self.0.iter().find(|c| c.denom == denom)
    }

    /// Amount of the given denom, zero if absent.
    pub fn amount_of(&self, denom: &str) -> BigInt {
        self.get(denom)
            .map(|c| c.amount.clone())
            .unwrap_or_default()
    }
}

impl fmt::Display for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for coin in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", coin)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Coins {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::new());
        }
        let coins = s
            .split(',')
            .map(Coin::from_str)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Self::from_coins(coins)
    }
}

impl<'a> IntoIterator for &'a Coins {
    type Item = &'a Coin;
    type IntoIter = std::slice::Iter<'a, Coin>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

mod bigint_string {
    use std::str::FromStr;

    use num_bigint::BigInt;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &BigInt, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigInt, D::Error> {
        let raw = String::deserialize(d)?;
        BigInt::from_str(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_round_trip() {
        let coin: Coin = "10500uosmo".parse().unwrap();
        assert_eq!(coin.denom, "uosmo");
        assert_eq!(coin.amount, BigInt::from(10500));
        assert_eq!(coin.to_string(), "10500uosmo");
    }

    #[test]
    fn coin_ibc_denom() {
        let coin: Coin = "7ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2"
            .parse()
            .unwrap();
        assert!(coin.denom.starts_with("ibc/"));
        assert_eq!(coin.amount, BigInt::from(7));
    }

    #[test]
    fn coin_rejects_garbage() {
        assert!("uosmo".parse::<Coin>().is_err());
        assert!("123".parse::<Coin>().is_err());
        assert!("123/bad".parse::<Coin>().is_err());
    }

    #[test]
    fn coins_normalizes_order() {
        let coins: Coins = "50uosmo,10stake".parse().unwrap();
        assert_eq!(coins.to_string(), "10stake,50uosmo");
    }

    #[test]
    fn coins_drops_zero_and_rejects_duplicates() {
        let coins =
            Coins::from_coins(vec![Coin::new("uosmo", 5), Coin::new("stake", 0)]).unwrap();
        assert_eq!(coins.to_string(), "5uosmo");

        assert!(
            Coins::from_coins(vec![Coin::new("uosmo", 5), Coin::new("uosmo", 6)]).is_err()
        );
    }

    #[test]
    fn coins_empty_string() {
        let coins: Coins = "".parse().unwrap();
        assert!(coins.is_empty());
        assert_eq!(coins.to_string(), "");
    }

    #[test]
    fn coins_amount_of_missing_is_zero() {
        let coins: Coins = "10stake".parse().unwrap();
        assert_eq!(coins.amount_of("uosmo"), BigInt::from(0));
    }

    #[test]
    fn coin_json_uses_string_amounts() {
        let coin = Coin::new("uosmo", 123);
        let json = serde_json::to_string(&coin).unwrap();
        assert_eq!(json, r#"{"denom":"uosmo","amount":"123"}"#);
        let back: Coin = serde_json::from_str(&json).unwrap();
        assert_eq!(back, coin);
    }
}
