//! Currency catalogue: codes, display precision and physical denominations.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Mxn,
    Usd,
    Eur,
    Usdt,
    Cad,
    Gbp,
}

impl Currency {
    /// The desk's home currency. Every pair is quoted against it.
    pub const LOCAL: Currency = Currency::Mxn;

    pub const ALL: [Currency; 6] = [
        Currency::Mxn,
        Currency::Usd,
        Currency::Eur,
        Currency::Usdt,
        Currency::Cad,
        Currency::Gbp,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Mxn  => "MXN",
            Self::Usd  => "USD",
            Self::Eur  => "EUR",
            Self::Usdt => "USDT",
            Self::Cad  => "CAD",
            Self::Gbp  => "GBP",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mxn  => "Peso Mexicano",
            Self::Usd  => "Dólar Estadounidense",
            Self::Eur  => "Euro",
            Self::Usdt => "Tether USDT",
            Self::Cad  => "Dólar Canadiense",
            Self::Gbp  => "Libra Esterlina",
        }
    }

    pub fn decimals(&self) -> u32 {
        2
    }

    pub fn is_crypto(&self) -> bool {
        matches!(self, Self::Usdt)
    }

    /// Physical denominations, largest first. Empty for currencies the desk
    /// only holds electronically or does not count by piece.
    pub fn denominations(&self) -> &'static [Decimal] {
        const MXN: [Decimal; 10] = [
            dec!(1000), dec!(500), dec!(200), dec!(100), dec!(50),
            dec!(20), dec!(10), dec!(5), dec!(2), dec!(1),
        ];
        const USD: [Decimal; 7] = [
            dec!(100), dec!(50), dec!(20), dec!(10), dec!(5), dec!(2), dec!(1),
        ];
        const EUR: [Decimal; 7] = [
            dec!(500), dec!(200), dec!(100), dec!(50), dec!(20), dec!(10), dec!(5),
        ];
        match self {
            Self::Mxn => &MXN,
            Self::Usd => &USD,
            Self::Eur => &EUR,
            Self::Usdt | Self::Cad | Self::Gbp => &[],
        }
    }

    /// Round an amount to this currency's precision, half away from zero.
    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.decimals(), RoundingStrategy::MidpointAwayFromZero)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Unknown currency code '{s}'"))
    }
}

/// Round a monetary figure that has no natural currency (margins, fees
/// expressed in the local currency) to two places.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
