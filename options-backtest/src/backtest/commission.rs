//! Commission model for options trading.
//!
//! A flat fee per contract, charged on every leg when a position opens and
//! again when it closes (including worthless expiry).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::position::Leg;

/// Commission for a single transaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Commission {
    pub contracts: u32,
    pub per_contract: Decimal,
    pub total: Decimal,
}

impl Commission {
    pub fn calculate(contracts: u32, per_contract: Decimal) -> Self {
        Self {
            contracts,
            per_contract,
            total: per_contract * Decimal::from(contracts),
        }
    }
}

/// Per-contract commission model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommissionModel {
    /// Commission per contract per leg.
    pub per_contract: Decimal,
}

impl Default for CommissionModel {
    fn default() -> Self {
        Self {
            per_contract: Decimal::ONE, // $1.00 per contract
        }
    }
}

impl CommissionModel {
    pub fn new(per_contract: Decimal) -> Self {
        Self { per_contract }
    }

    /// Create a zero-commission model.
    pub fn zero() -> Self {
        Self::new(Decimal::ZERO)
    }

    /// Commission for `contracts` contracts (absolute count).
    pub fn calculate(&self, contracts: u32) -> Commission {
        Commission::calculate(contracts, self.per_contract)
    }

    /// Commission to trade every leg once: per_contract × Σ|quantity|.
    pub fn for_legs(&self, legs: &[Leg]) -> Commission {
        let contracts = legs.iter().map(|l| l.quantity.unsigned_abs()).sum();
        self.calculate(contracts)
    }
}
