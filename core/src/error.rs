use rust_decimal::Decimal;
use thiserror::Error;

use crate::currency::Currency;

#[derive(Error, Debug)]
pub enum DeskError {
    // ── Caller-recoverable rejections ─────────────
    #[error("Currency pair {given}/{received} is not available")]
    PairUnavailable { given: Currency, received: Currency },

    #[error("Quotation '{quotation_id}' is expired, consumed or unknown")]
    QuoteExpired { quotation_id: String },

    #[error("Official identification is required for this amount")]
    IdentificationRequired,

    #[error("The cash drawer is not open")]
    DrawerClosed,

    #[error("The cash drawer is already open (operator {operator_id})")]
    DrawerAlreadyOpen { operator_id: String },

    #[error("Client limit exceeded: {reason}")]
    LimitExceeded {
        reason: String,
        remaining_daily: Option<Decimal>,
    },

    #[error("Operation blocked by fraud screening (score {score}): {}", factors.join(", "))]
    FraudBlocked { score: u8, factors: Vec<String> },

    #[error("Client '{client_id}' is blocked: {reason}")]
    ClientBlocked { client_id: String, reason: String },

    #[error("Not enough {currency} in the drawer: need {required}, have {available}")]
    InsufficientCash {
        currency:  Currency,
        required:  Decimal,
        available: Decimal,
    },

    #[error("A '{direction}' request cannot hand over {given} for {received}")]
    DirectionMismatch {
        direction: &'static str,
        given:     Currency,
        received:  Currency,
    },

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("Amount {amount} {currency} is outside the allowed range {min}..={max}")]
    AmountOutOfRange {
        currency: Currency,
        amount:   Decimal,
        min:      Decimal,
        max:      Decimal,
    },

    // ── Lookups and lifecycle ─────────────────────
    #[error("Client '{0}' not found")]
    ClientNotFound(String),

    #[error("Alert '{0}' not found")]
    AlertNotFound(String),

    #[error("Alert '{0}' is already resolved")]
    AlertAlreadyResolved(String),

    #[error("Operation '{0}' not found")]
    OperationNotFound(String),

    #[error("Invalid transition for '{entity}': {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from:   String,
        to:     String,
    },

    #[error("Invalid currency pair '{pair_id}': {reason}")]
    InvalidPair { pair_id: String, reason: String },

    // ── Defects and infrastructure ────────────────
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeskError {
    /// True for rejections the caller can fix (new quote, more ID, escalate).
    /// False for defects and infrastructure failures.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            Self::InvariantViolation(_)
                | Self::LockPoisoned(_)
                | Self::Database(_)
                | Self::Serialization(_)
                | Self::Other(_)
        )
    }
}

pub type DeskResult<T> = Result<T, DeskError>;
