use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// A unit money can be expressed in, measured by how many satoshis one unit is worth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Currency {
    pub id: Cow<'static, str>,
    pub in_sats: f64,
}

/// The identity currency: one unit is one satoshi
pub const SAT: Currency = Currency {
    id: Cow::Borrowed("SAT"),
    in_sats: 1.0,
};

impl Currency {
    pub fn new(id: impl Into<String>, in_sats: f64) -> Self {
        Self {
            id: Cow::Owned(id.into()),
            in_sats,
        }
    }

    pub fn is_sat(&self) -> bool {
        self.id == SAT.id
    }
}

/// Immutable money value. Satoshi is the canonical unit and every
/// operation is performed in satoshis.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount {
    sat: f64,
}

impl Amount {
    pub const ZERO: Amount = Amount { sat: 0.0 };

    /// Amount of `num` units of `currency`
    pub fn new(num: f64, currency: &Currency) -> Self {
        Self {
            sat: currency.in_sats * num,
        }
    }

    pub fn from_sat(sat: f64) -> Self {
        Self { sat }
    }

    pub fn add(self, other: Amount) -> Amount {
        Amount::from_sat(self.sat + other.sat)
    }

    pub fn subtr(self, other: Amount) -> Amount {
        Amount::from_sat(self.sat - other.sat)
    }

    pub fn mult(self, num: f64) -> Amount {
        Amount::from_sat(self.sat * num)
    }

    pub fn div(self, num: f64) -> Amount {
        Amount::from_sat(self.sat / num)
    }

    /// Value in `currency` units, rounded to a whole satoshi before conversion
    pub fn get(&self, currency: &Currency) -> f64 {
        round_half_up(self.sat) / currency.in_sats
    }

    /// Whole satoshis
    pub fn sat(&self) -> i64 {
        round_half_up(self.sat) as i64
    }
}

// Halves round towards positive infinity, so -0.5 becomes 0
fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat", self.sat())
    }
}

/// Fiat multiplier applied when a user enters or views amounts in a
/// currency other than SAT. It is passed explicitly wherever user input
/// becomes a stored amount.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bias {
    pub fiat_mult: f64,
}

impl Default for Bias {
    fn default() -> Self {
        Self { fiat_mult: 1.0 }
    }
}

impl Bias {
    pub fn new(fiat_mult: f64) -> Self {
        Self { fiat_mult }
    }

    /// Build an amount from user input. Returns the amount and whether the
    /// multiplier was applied.
    pub fn apply(&self, num: f64, currency: &Currency) -> (Amount, bool) {
        let amount = Amount::new(num, currency);
        if currency.is_sat() {
            (amount, false)
        } else {
            (amount.mult(self.fiat_mult), true)
        }
    }

    /// Value to display for `amount` in `currency`
    pub fn present(&self, amount: Amount, currency: &Currency) -> f64 {
        if currency.is_sat() {
            amount.get(currency)
        } else {
            amount.mult(self.fiat_mult).get(currency)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_in_sat() {
        assert_eq!(Amount::new(100.0, &SAT).get(&SAT), 100.0);
    }

    #[test]
    fn test_get_in_other_currency() {
        let btc = Currency::new("X", 100_000_000.0);
        assert_eq!(Amount::new(100_000_000.0, &SAT).get(&btc), 1.0);
        assert_eq!(Amount::new(2.5, &btc).sat(), 250_000_000);
    }

    #[test]
    fn test_get_rounds_before_conversion() {
        let amount = Amount::from_sat(10.4);
        assert_eq!(amount.get(&SAT), 10.0);
        assert_eq!(Amount::from_sat(10.5).get(&SAT), 11.0);

        let ten = Currency::new("TEN", 10.0);
        assert_eq!(Amount::from_sat(24.6).get(&ten), 2.5);
    }

    #[test]
    fn test_add_then_subtract_is_identity() {
        let pairs = [(0.0, 0.0), (1.0, 2.0), (123_456.7, 0.3), (-50.0, 75.25), (21e14, 1.0)];
        for (a, b) in pairs {
            let a = Amount::from_sat(a);
            let b = Amount::from_sat(b);
            let diff = (a.add(b).subtr(b).get(&SAT) - a.get(&SAT)).abs();
            assert!(diff <= 1.0, "{a:?} {b:?} drifted by {diff}");
        }
    }

    #[test]
    fn test_mult_and_div_return_new_values() {
        let base = Amount::from_sat(1000.0);
        assert_eq!(base.mult(3.0).sat(), 3000);
        assert_eq!(base.div(4.0).sat(), 250);
        assert_eq!(base.sat(), 1000);
    }

    #[test]
    fn test_negative_amounts_are_allowed() {
        let amount = Amount::from_sat(10.0).subtr(Amount::from_sat(25.0));
        assert_eq!(amount.sat(), -15);
    }

    #[test]
    fn test_bias_only_applies_to_non_sat() {
        let bias = Bias::new(1.1);
        let usd = Currency::new("USD", 2000.0);

        let (amount, applied) = bias.apply(100.0, &SAT);
        assert!(!applied);
        assert_eq!(amount.sat(), 100);

        let (amount, applied) = bias.apply(1.0, &usd);
        assert!(applied);
        assert_eq!(amount.sat(), 2200);

        assert_eq!(bias.present(Amount::from_sat(2000.0), &usd), 1.1);
        assert_eq!(bias.present(Amount::from_sat(2000.0), &SAT), 2000.0);
    }
}
