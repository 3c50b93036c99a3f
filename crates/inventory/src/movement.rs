//! Stock movements: the immutable audit trail of every stock change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::{AccountId, DomainError, Entity, impl_uuid_newtype};

use crate::product::{ProductId, StockMoved};

/// Movement identifier (UUIDv7, assigned by the ledger).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(Uuid);

impl_uuid_newtype!(MovementId, "MovementId");

/// Direction of a stock change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "entrada")]
    Inbound,
    #[serde(alias = "saida")]
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Direction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inbound" | "entrada" => Ok(Direction::Inbound),
            "outbound" | "saida" => Ok(Direction::Outbound),
            other => Err(DomainError::validation(format!(
                "direction must be inbound or outbound (got '{other}')"
            ))),
        }
    }
}

/// Caller's request to move stock. Identifier and timestamp are assigned at
/// commit time, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementIntent {
    pub product_id: ProductId,
    pub direction: Direction,
    pub quantity: u64,
    #[serde(default)]
    pub variant_label: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl MovementIntent {
    pub fn inbound(product_id: ProductId, quantity: u64) -> Self {
        Self::new(product_id, Direction::Inbound, quantity)
    }

    pub fn outbound(product_id: ProductId, quantity: u64) -> Self {
        Self::new(product_id, Direction::Outbound, quantity)
    }

    pub fn new(product_id: ProductId, direction: Direction, quantity: u64) -> Self {
        Self {
            product_id,
            direction,
            quantity,
            variant_label: None,
            note: None,
        }
    }

    pub fn for_variant(mut self, label: impl Into<String>) -> Self {
        self.variant_label = Some(label.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// A committed stock change.
///
/// Never edited or deleted once stored. `product_version` is the product
/// version this movement produced, which orders movements of one product
/// even when timestamps collide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub movement_id: MovementId,
    pub account_id: AccountId,
    pub product_id: ProductId,
    pub direction: Direction,
    pub quantity: u64,
    pub variant_label: Option<String>,
    pub note: Option<String>,
    pub product_version: u64,
    pub occurred_at: DateTime<Utc>,
}

impl Movement {
    /// Build the movement record for a decided `StockMoved` event.
    pub fn from_event(event: &StockMoved, product_version: u64) -> Self {
        Self {
            movement_id: event.movement_id,
            account_id: event.account_id,
            product_id: event.product_id,
            direction: event.direction,
            quantity: event.quantity,
            variant_label: event.variant_label.clone(),
            note: event.note.clone(),
            product_version,
            occurred_at: event.occurred_at,
        }
    }
}

impl Entity for Movement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.movement_id
    }
}
