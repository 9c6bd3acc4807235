//! Multi-leg position lifecycle.
//!
//! A [`Position`] is opened once from a set of priced legs, marked to market
//! every simulated day, and closed exactly once. After the close it is
//! immutable: marking or closing again fails with
//! [`PositionError::AlreadyClosed`].
//!
//! Sign conventions:
//! - Leg quantity: positive = long, negative = short (contracts)
//! - Entry cost: positive = net credit received, negative = net debit paid
//! - Position value: Σ(quantity × price × 100), what the legs are worth now

use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::{Greeks, MarketQuote, OptionKind};
use crate::pricing::{
    intrinsic_value, time_to_expiry, PricingContext, PricingError, CONTRACT_MULTIPLIER,
};

use super::commission::CommissionModel;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PositionError {
    #[error("Position has no legs")]
    EmptyLegs,

    #[error("Leg {index} has zero quantity")]
    ZeroQuantity { index: usize },

    #[error("Leg {index} has a negative entry premium")]
    NegativePremium { index: usize },

    #[error("Leg {index} expires on or before entry")]
    ExpiredLeg { index: usize },

    #[error("Legs reference more than one symbol")]
    MixedSymbols,

    #[error("Legs do not share the position entry date")]
    MixedEntryDates,

    #[error("Position is already closed")]
    AlreadyClosed,

    #[error("No short leg is in the money")]
    NotAssignable,

    #[error(transparent)]
    Pricing(#[from] PricingError),
}

/// Reporting label for a position. Never affects pricing or accounting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StrategyTag {
    CoveredCall,
    CashSecuredPut,
    CreditSpread,
    IronCondor,
    Straddle,
    Custom(String),
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CoveredCall => write!(f, "covered_call"),
            Self::CashSecuredPut => write!(f, "cash_secured_put"),
            Self::CreditSpread => write!(f, "credit_spread"),
            Self::IronCondor => write!(f, "iron_condor"),
            Self::Straddle => write!(f, "straddle"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// How a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseMethod {
    /// Expired legs settle at intrinsic value.
    Expiration,
    /// Every leg closes at its model price.
    ManualExit,
    /// Like expiration, but only valid when an expired short leg finished
    /// in the money.
    Assignment,
}

/// Status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Convert a per-share model price to money, rounded to 4 decimal places.
pub fn to_premium(price: f64) -> Decimal {
    Decimal::from_f64_retain(price).unwrap_or_default().round_dp(4)
}

/// One option contract line of a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub symbol: String,
    pub option_kind: OptionKind,
    pub strike: f64,
    pub expiration: NaiveDate,
    /// Contracts (positive = long, negative = short).
    pub quantity: i32,
    /// Premium per share at entry.
    pub entry_premium: Decimal,
    pub entry_volatility: f64,
    pub entry_date: NaiveDate,
    greeks: Greeks,
}

impl Leg {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: &str,
        option_kind: OptionKind,
        strike: f64,
        expiration: NaiveDate,
        quantity: i32,
        entry_premium: Decimal,
        entry_volatility: f64,
        entry_date: NaiveDate,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            option_kind,
            strike,
            expiration,
            quantity,
            entry_premium,
            entry_volatility,
            entry_date,
            greeks: Greeks::default(),
        }
    }

    /// Seed the Greeks snapshot (e.g. from the pricing used to build the leg).
    pub fn with_greeks(mut self, greeks: Greeks) -> Self {
        self.greeks = greeks;
        self
    }

    /// Per-contract Greeks from the most recent valuation.
    pub fn greeks(&self) -> Greeks {
        self.greeks
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0
    }

    pub fn intrinsic(&self, spot: f64) -> f64 {
        intrinsic_value(spot, self.strike, self.option_kind)
    }

    pub fn is_in_the_money(&self, spot: f64) -> bool {
        self.intrinsic(spot) > 0.0
    }

    pub fn is_expired(&self, date: NaiveDate) -> bool {
        self.expiration <= date
    }

    /// quantity × price × 100.
    pub fn market_value(&self, price: f64) -> Decimal {
        to_premium(price) * Decimal::from(self.quantity) * Decimal::from(CONTRACT_MULTIPLIER)
    }

    /// Cash received (positive) or paid (negative) to open this leg.
    pub fn entry_cash_flow(&self) -> Decimal {
        -self.entry_premium * Decimal::from(self.quantity) * Decimal::from(CONTRACT_MULTIPLIER)
    }
}

/// Valuation of an open position on one date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    pub date: NaiveDate,
    pub spot: f64,
    pub volatility: f64,
    pub value: Decimal,
    /// Σ(quantity × leg Greeks).
    pub greeks: Greeks,
}

impl Mark {
    pub fn quote(&self) -> MarketQuote {
        MarketQuote {
            spot: self.spot,
            volatility: self.volatility,
        }
    }
}

/// Settlement of a closed position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Exit {
    pub date: NaiveDate,
    pub method: CloseMethod,
    /// Σ(quantity × exit price × 100).
    pub value: Decimal,
    pub commission: Decimal,
    pub realized_pnl: Decimal,
}

/// A complete options position (one or more legs on one underlying).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    symbol: String,
    strategy_tag: StrategyTag,
    legs: Vec<Leg>,
    entry_date: NaiveDate,
    entry_spot: f64,
    entry_cost: Decimal,
    entry_commission: Decimal,
    last_mark: Option<Mark>,
    exit: Option<Exit>,
}

impl Position {
    /// Open a position from priced legs.
    ///
    /// `entry_cost = Σ(−quantity × entry_premium × 100) − entry commissions`.
    pub fn open(
        strategy_tag: StrategyTag,
        legs: Vec<Leg>,
        entry_date: NaiveDate,
        entry_spot: f64,
        commission: &CommissionModel,
    ) -> Result<Self, PositionError> {
        let first = legs.first().ok_or(PositionError::EmptyLegs)?;
        let symbol = first.symbol.clone();

        for (index, leg) in legs.iter().enumerate() {
            if leg.quantity == 0 {
                return Err(PositionError::ZeroQuantity { index });
            }
            if leg.entry_premium < Decimal::ZERO {
                return Err(PositionError::NegativePremium { index });
            }
            if leg.expiration <= entry_date {
                return Err(PositionError::ExpiredLeg { index });
            }
            if leg.symbol != symbol {
                return Err(PositionError::MixedSymbols);
            }
            if leg.entry_date != entry_date {
                return Err(PositionError::MixedEntryDates);
            }
        }

        let entry_commission = commission.for_legs(&legs).total;
        let gross: Decimal = legs.iter().map(Leg::entry_cash_flow).sum();

        Ok(Self {
            symbol,
            strategy_tag,
            legs,
            entry_date,
            entry_spot,
            entry_cost: gross - entry_commission,
            entry_commission,
            last_mark: None,
            exit: None,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn strategy_tag(&self) -> &StrategyTag {
        &self.strategy_tag
    }

    pub fn legs(&self) -> &[Leg] {
        &self.legs
    }

    pub fn entry_date(&self) -> NaiveDate {
        self.entry_date
    }

    pub fn entry_spot(&self) -> f64 {
        self.entry_spot
    }

    /// Net credit (positive) or debit (negative) at entry, after commissions.
    pub fn entry_cost(&self) -> Decimal {
        self.entry_cost
    }

    /// Premium received (positive) or paid (negative), before commissions.
    pub fn gross_premium(&self) -> Decimal {
        self.entry_cost + self.entry_commission
    }

    pub fn entry_commission(&self) -> Decimal {
        self.entry_commission
    }

    /// Entry plus exit commissions paid so far.
    pub fn commissions(&self) -> Decimal {
        self.entry_commission + self.exit.map(|e| e.commission).unwrap_or_default()
    }

    pub fn status(&self) -> PositionStatus {
        if self.exit.is_some() {
            PositionStatus::Closed
        } else {
            PositionStatus::Open
        }
    }

    pub fn is_open(&self) -> bool {
        self.exit.is_none()
    }

    pub fn last_mark(&self) -> Option<&Mark> {
        self.last_mark.as_ref()
    }

    pub fn exit(&self) -> Option<&Exit> {
        self.exit.as_ref()
    }

    pub fn exit_date(&self) -> Option<NaiveDate> {
        self.exit.map(|e| e.date)
    }

    pub fn close_method(&self) -> Option<CloseMethod> {
        self.exit.map(|e| e.method)
    }

    pub fn realized_pnl(&self) -> Option<Decimal> {
        self.exit.map(|e| e.realized_pnl)
    }

    /// Realized P&L, zero while open.
    pub fn pnl(&self) -> Decimal {
        self.realized_pnl().unwrap_or_default()
    }

    pub fn is_winner(&self) -> bool {
        self.pnl() > Decimal::ZERO
    }

    /// Value of the legs at the last mark, zero if never marked.
    pub fn current_value(&self) -> Decimal {
        self.last_mark.map(|m| m.value).unwrap_or_default()
    }

    /// Earliest leg expiration.
    pub fn expiration(&self) -> NaiveDate {
        self.legs
            .iter()
            .map(|l| l.expiration)
            .min()
            .unwrap_or(self.entry_date)
    }

    pub fn is_expired(&self, date: NaiveDate) -> bool {
        self.expiration() <= date
    }

    pub fn total_contracts(&self) -> u32 {
        self.legs.iter().map(|l| l.quantity.unsigned_abs()).sum()
    }

    /// Calendar days between entry and exit, `None` while open.
    pub fn days_held(&self) -> Option<i64> {
        self.exit_date().map(|d| (d - self.entry_date).num_days())
    }

    /// Whether a short leg expired by `date` and finished in the money.
    pub fn has_assignable_leg(&self, date: NaiveDate, quote: MarketQuote) -> bool {
        self.legs.iter().any(|l| {
            l.is_short()
                && l.is_expired(date)
                && l.is_in_the_money(self.settlement_spot(l.expiration, date, quote))
        })
    }

    /// Spot an expired leg settles at: the last observation on or before its
    /// expiration, so a missing expiry bar never settles at a later price.
    fn settlement_spot(&self, expiration: NaiveDate, date: NaiveDate, quote: MarketQuote) -> f64 {
        if date <= expiration {
            return quote.spot;
        }
        match self.last_mark {
            Some(mark) if mark.date <= expiration => mark.spot,
            Some(_) => quote.spot,
            None => self.entry_spot,
        }
    }

    /// Spot and volatility of the last mark, or the entry conditions if the
    /// position was never marked.
    pub fn reference_quote(&self) -> MarketQuote {
        match self.last_mark {
            Some(mark) => mark.quote(),
            None => MarketQuote {
                spot: self.entry_spot,
                volatility: self.legs.first().map(|l| l.entry_volatility).unwrap_or_default(),
            },
        }
    }

    /// Revalue every leg at `quote` and refresh the cached Greeks.
    ///
    /// Nothing is updated if any leg fails to price.
    pub fn mark_to_market(
        &mut self,
        date: NaiveDate,
        quote: MarketQuote,
        pricing: &PricingContext,
    ) -> Result<Mark, PositionError> {
        if !self.is_open() {
            return Err(PositionError::AlreadyClosed);
        }

        let prices = self
            .legs
            .iter()
            .map(|leg| {
                let t = time_to_expiry(date, leg.expiration);
                pricing.price(quote, leg.strike, t, leg.option_kind)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut value = Decimal::ZERO;
        let mut greeks = Greeks::default();
        for (leg, out) in self.legs.iter_mut().zip(prices) {
            leg.greeks = out.greeks;
            value += leg.market_value(out.price);
            greeks += out.greeks.scaled(leg.quantity as f64);
        }

        let mark = Mark {
            date,
            spot: quote.spot,
            volatility: quote.volatility,
            value,
            greeks,
        };
        self.last_mark = Some(mark);
        Ok(mark)
    }

    /// Close every leg and realize the P&L.
    ///
    /// `realized_pnl = entry_cost + exit_value − exit commissions`.
    pub fn close(
        &mut self,
        date: NaiveDate,
        method: CloseMethod,
        quote: MarketQuote,
        pricing: &PricingContext,
        commission: &CommissionModel,
    ) -> Result<Exit, PositionError> {
        if !self.is_open() {
            return Err(PositionError::AlreadyClosed);
        }
        if method == CloseMethod::Assignment && !self.has_assignable_leg(date, quote) {
            return Err(PositionError::NotAssignable);
        }

        let mut value = Decimal::ZERO;
        for leg in &self.legs {
            let settles_at_intrinsic = match method {
                CloseMethod::ManualExit => false,
                CloseMethod::Expiration | CloseMethod::Assignment => leg.is_expired(date),
            };

            let exit_price = if settles_at_intrinsic {
                leg.intrinsic(self.settlement_spot(leg.expiration, date, quote))
            } else {
                let t = time_to_expiry(date, leg.expiration);
                pricing.price(quote, leg.strike, t, leg.option_kind)?.price
            };
            value += leg.market_value(exit_price);
        }

        let exit_commission = commission.for_legs(&self.legs).total;
        let exit = Exit {
            date,
            method,
            value,
            commission: exit_commission,
            realized_pnl: self.entry_cost + value - exit_commission,
        };
        self.exit = Some(exit);
        Ok(exit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;

    fn d(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, month, day).unwrap()
    }

    fn leg(kind: OptionKind, strike: f64, quantity: i32, premium: Decimal) -> Leg {
        Leg::new("SPY", kind, strike, d(2, 16), quantity, premium, 0.2, d(1, 16))
    }

    fn quote(spot: f64) -> MarketQuote {
        MarketQuote {
            spot,
            volatility: 0.2,
        }
    }

    fn commission() -> CommissionModel {
        CommissionModel::new(dec!(0.65))
    }

    fn pricing() -> PricingContext {
        PricingContext::new(0.05, 0.0)
    }

    fn short_put() -> Position {
        Position::open(
            StrategyTag::CashSecuredPut,
            vec![leg(OptionKind::Put, 400.0, -1, dec!(2.50))],
            d(1, 16),
            420.0,
            &commission(),
        )
        .unwrap()
    }

    #[test]
    fn test_entry_cost_credit() {
        let position = short_put();
        // 2.50 × 1 × 100 − 0.65
        assert_eq!(position.entry_cost(), dec!(249.35));
        assert_eq!(position.gross_premium(), dec!(250));
        assert_eq!(position.entry_commission(), dec!(0.65));
        assert!(position.is_open());
        assert_eq!(position.realized_pnl(), None);
    }

    #[test]
    fn test_entry_cost_debit() {
        let position = Position::open(
            StrategyTag::Straddle,
            vec![
                leg(OptionKind::Call, 420.0, 2, dec!(3.10)),
                leg(OptionKind::Put, 420.0, 2, dec!(2.90)),
            ],
            d(1, 16),
            420.0,
            &commission(),
        )
        .unwrap();
        // −(3.10 + 2.90) × 2 × 100 − 4 × 0.65
        assert_eq!(position.entry_cost(), dec!(-1202.60));
        assert_eq!(position.total_contracts(), 4);
    }

    #[test]
    fn test_open_validation() {
        let model = commission();
        assert_eq!(
            Position::open(StrategyTag::Straddle, vec![], d(1, 16), 420.0, &model).unwrap_err(),
            PositionError::EmptyLegs
        );

        let zero = vec![
            leg(OptionKind::Call, 420.0, 1, dec!(1)),
            leg(OptionKind::Put, 420.0, 0, dec!(1)),
        ];
        assert_eq!(
            Position::open(StrategyTag::Straddle, zero, d(1, 16), 420.0, &model).unwrap_err(),
            PositionError::ZeroQuantity { index: 1 }
        );

        let negative = vec![leg(OptionKind::Call, 420.0, 1, dec!(-0.01))];
        assert_eq!(
            Position::open(StrategyTag::Straddle, negative, d(1, 16), 420.0, &model).unwrap_err(),
            PositionError::NegativePremium { index: 0 }
        );

        let mut other = leg(OptionKind::Put, 420.0, 1, dec!(1));
        other.symbol = "QQQ".to_string();
        let mixed = vec![leg(OptionKind::Call, 420.0, 1, dec!(1)), other];
        assert_eq!(
            Position::open(StrategyTag::Straddle, mixed, d(1, 16), 420.0, &model).unwrap_err(),
            PositionError::MixedSymbols
        );

        let late = vec![leg(OptionKind::Call, 420.0, 1, dec!(1))];
        assert_eq!(
            Position::open(StrategyTag::Straddle, late, d(1, 17), 420.0, &model).unwrap_err(),
            PositionError::MixedEntryDates
        );
    }

    #[test]
    fn test_zero_premium_is_allowed() {
        let legs = vec![leg(OptionKind::Call, 900.0, -1, dec!(0))];
        let position =
            Position::open(StrategyTag::CoveredCall, legs, d(1, 16), 420.0, &commission()).unwrap();
        assert_eq!(position.entry_cost(), dec!(-0.65));
    }

    #[test]
    fn test_mark_to_market_aggregates_greeks() {
        let mut position = Position::open(
            StrategyTag::CreditSpread,
            vec![
                leg(OptionKind::Put, 400.0, -2, dec!(2.50)),
                leg(OptionKind::Put, 390.0, 2, dec!(1.20)),
            ],
            d(1, 16),
            420.0,
            &commission(),
        )
        .unwrap();

        let mark = position.mark_to_market(d(1, 20), quote(415.0), &pricing()).unwrap();
        let t = time_to_expiry(d(1, 20), d(2, 16));
        let short =
            crate::pricing::price(415.0, 400.0, t, 0.05, 0.2, OptionKind::Put, 0.0).unwrap();
        let long = crate::pricing::price(415.0, 390.0, t, 0.05, 0.2, OptionKind::Put, 0.0).unwrap();

        assert_relative_eq!(
            mark.greeks.delta,
            -2.0 * short.greeks.delta + 2.0 * long.greeks.delta,
            epsilon = 1e-12
        );
        // Short the more expensive put: the spread is a liability
        assert!(mark.value < Decimal::ZERO);
        assert_eq!(
            mark.value,
            to_premium(short.price) * dec!(-200) + to_premium(long.price) * dec!(200)
        );
        assert_eq!(position.legs()[0].greeks(), short.greeks);
        assert_eq!(position.last_mark(), Some(&mark));
        assert_eq!(position.current_value(), mark.value);
    }

    #[test]
    fn test_failed_mark_leaves_state_untouched() {
        let mut position = short_put();
        let bad = MarketQuote {
            spot: 415.0,
            volatility: -0.1,
        };
        let err = position.mark_to_market(d(1, 20), bad, &pricing()).unwrap_err();
        assert!(matches!(err, PositionError::Pricing(PricingError::InvalidInput { .. })));
        assert!(position.last_mark().is_none());
        assert_eq!(position.legs()[0].greeks(), Greeks::default());
    }

    #[test]
    fn test_expiration_close_in_the_money() {
        let mut position = short_put();
        let exit = position
            .close(d(2, 16), CloseMethod::Expiration, quote(390.0), &pricing(), &commission())
            .unwrap();
        assert_eq!(exit.value, dec!(-1000));
        assert_eq!(exit.commission, dec!(0.65));
        // 249.35 − 1000 − 0.65
        assert_eq!(exit.realized_pnl, dec!(-751.30));
        assert_eq!(position.realized_pnl(), Some(dec!(-751.30)));
        assert_eq!(position.commissions(), dec!(1.30));
        assert_eq!(position.days_held(), Some(31));
        assert_eq!(position.status(), PositionStatus::Closed);
    }

    #[test]
    fn test_worthless_expiry_still_pays_commission() {
        let mut position = short_put();
        let exit = position
            .close(d(2, 16), CloseMethod::Expiration, quote(430.0), &pricing(), &commission())
            .unwrap();
        assert_eq!(exit.value, dec!(0));
        assert_eq!(exit.realized_pnl, dec!(248.70));
        assert!(position.is_winner());
    }

    #[test]
    fn test_double_close_fails() {
        let mut position = short_put();
        position
            .close(d(2, 16), CloseMethod::Expiration, quote(430.0), &pricing(), &commission())
            .unwrap();

        let again = position.close(
            d(2, 16),
            CloseMethod::ManualExit,
            quote(430.0),
            &pricing(),
            &commission(),
        );
        assert_eq!(again.unwrap_err(), PositionError::AlreadyClosed);
        assert_eq!(
            position.mark_to_market(d(2, 16), quote(430.0), &pricing()).unwrap_err(),
            PositionError::AlreadyClosed
        );
        assert_eq!(position.realized_pnl(), Some(dec!(248.70)));
    }

    #[test]
    fn test_manual_exit_uses_model_price() {
        let mut position = short_put();
        let exit = position
            .close(d(1, 30), CloseMethod::ManualExit, quote(410.0), &pricing(), &commission())
            .unwrap();
        let t = time_to_expiry(d(1, 30), d(2, 16));
        let model =
            crate::pricing::price(410.0, 400.0, t, 0.05, 0.2, OptionKind::Put, 0.0).unwrap();
        assert_eq!(exit.value, -to_premium(model.price) * dec!(100));
        assert_eq!(exit.realized_pnl, dec!(249.35) + exit.value - dec!(0.65));
        assert_eq!(exit.method, CloseMethod::ManualExit);
    }

    #[test]
    fn test_assignment_requires_short_itm_leg() {
        let mut position = short_put();
        let err = position
            .close(d(1, 30), CloseMethod::Assignment, quote(410.0), &pricing(), &commission())
            .unwrap_err();
        assert_eq!(err, PositionError::NotAssignable);
        assert!(position.is_open());
    }

    #[test]
    fn test_assignment_settles_short_leg_at_intrinsic() {
        let mut position = Position::open(
            StrategyTag::CreditSpread,
            vec![
                leg(OptionKind::Put, 400.0, -1, dec!(2.50)),
                leg(OptionKind::Put, 390.0, 1, dec!(1.20)),
            ],
            d(1, 16),
            420.0,
            &commission(),
        )
        .unwrap();
        // In the money but not yet expired
        assert!(!position.has_assignable_leg(d(1, 30), quote(395.0)));
        assert!(position.has_assignable_leg(d(2, 16), quote(395.0)));

        let exit = position
            .close(d(2, 16), CloseMethod::Assignment, quote(395.0), &pricing(), &commission())
            .unwrap();
        // Short put at intrinsic 5.00, long put expires worthless
        assert_eq!(exit.value, dec!(-500));
        assert_eq!(exit.commission, dec!(1.30));
        assert_eq!(exit.method, CloseMethod::Assignment);
    }

    #[test]
    fn test_open_rejects_leg_expiring_at_entry() {
        let mut same_day = leg(OptionKind::Put, 400.0, -1, dec!(0.40));
        same_day.expiration = d(1, 16);
        let legs = vec![leg(OptionKind::Put, 390.0, 1, dec!(0.10)), same_day];
        assert_eq!(
            Position::open(StrategyTag::CreditSpread, legs, d(1, 16), 420.0, &commission())
                .unwrap_err(),
            PositionError::ExpiredLeg { index: 1 }
        );
    }

    #[test]
    fn test_late_close_settles_at_spot_on_expiry() {
        // Last seen above the strike on the eve of expiry; the next quote
        // arrives after expiry well below it.
        let mut position = short_put();
        position.mark_to_market(d(2, 15), quote(420.0), &pricing()).unwrap();
        assert!(!position.has_assignable_leg(d(2, 20), quote(380.0)));
        assert_eq!(
            position
                .close(d(2, 20), CloseMethod::Assignment, quote(380.0), &pricing(), &commission())
                .unwrap_err(),
            PositionError::NotAssignable
        );

        let exit = position
            .close(d(2, 20), CloseMethod::Expiration, quote(380.0), &pricing(), &commission())
            .unwrap();
        assert_eq!(exit.value, dec!(0));
        assert_eq!(exit.realized_pnl, dec!(248.70));

        // The other way round: in the money at the last mark
        let mut position = short_put();
        position.mark_to_market(d(2, 15), quote(390.0), &pricing()).unwrap();
        assert!(position.has_assignable_leg(d(2, 20), quote(430.0)));
        let exit = position
            .close(d(2, 20), CloseMethod::Assignment, quote(430.0), &pricing(), &commission())
            .unwrap();
        assert_eq!(exit.value, dec!(-1000));
    }

    #[test]
    fn test_late_close_without_marks_uses_entry_spot() {
        let mut position = short_put();
        let exit = position
            .close(d(2, 20), CloseMethod::Expiration, quote(380.0), &pricing(), &commission())
            .unwrap();
        assert_eq!(exit.value, dec!(0));
    }

    #[test]
    fn test_expiration_prices_later_dated_legs() {
        let front = leg(OptionKind::Call, 420.0, -1, dec!(4.00));
        let mut back = leg(OptionKind::Call, 420.0, 1, dec!(6.00));
        back.expiration = d(3, 15);
        let mut position = Position::open(
            StrategyTag::Custom("calendar".into()),
            vec![front, back],
            d(1, 16),
            420.0,
            &commission(),
        )
        .unwrap();
        assert_eq!(position.expiration(), d(2, 16));
        assert!(position.is_expired(d(2, 16)));

        let exit = position
            .close(d(2, 16), CloseMethod::Expiration, quote(420.0), &pricing(), &commission())
            .unwrap();
        let t = time_to_expiry(d(2, 16), d(3, 15));
        let back_price =
            crate::pricing::price(420.0, 420.0, t, 0.05, 0.2, OptionKind::Call, 0.0).unwrap();
        assert!(back_price.price > 0.0);
        assert_eq!(exit.value, to_premium(back_price.price) * dec!(100));
    }

    #[test]
    fn test_unexpired_short_leg_keeps_time_value() {
        // Long the front month, short the back month, both deep in the money
        let front = leg(OptionKind::Call, 420.0, 1, dec!(4.00));
        let mut back = leg(OptionKind::Call, 420.0, -1, dec!(6.00));
        back.expiration = d(3, 15);
        let open = || {
            Position::open(
                StrategyTag::Custom("reverse_calendar".into()),
                vec![front.clone(), back.clone()],
                d(1, 16),
                420.0,
                &commission(),
            )
            .unwrap()
        };

        let mut position = open();
        assert!(!position.has_assignable_leg(d(2, 16), quote(440.0)));
        assert_eq!(
            position
                .close(d(2, 16), CloseMethod::Assignment, quote(440.0), &pricing(), &commission())
                .unwrap_err(),
            PositionError::NotAssignable
        );

        let mut position = open();
        let exit = position
            .close(d(2, 16), CloseMethod::Expiration, quote(440.0), &pricing(), &commission())
            .unwrap();
        let t = time_to_expiry(d(2, 16), d(3, 15));
        let back_price =
            crate::pricing::price(440.0, 420.0, t, 0.05, 0.2, OptionKind::Call, 0.0).unwrap();
        assert!(back_price.price > 20.0);
        assert_eq!(exit.value, dec!(2000) - to_premium(back_price.price) * dec!(100));
    }

    #[test]
    fn test_reference_quote_prefers_last_mark() {
        let mut position = short_put();
        assert_eq!(position.reference_quote(), quote(420.0));
        position.mark_to_market(d(1, 17), quote(418.0), &pricing()).unwrap();
        assert_eq!(position.reference_quote(), quote(418.0));
    }

    #[test]
    fn test_strategy_tag_order_and_display() {
        assert!(StrategyTag::CoveredCall < StrategyTag::IronCondor);
        assert!(StrategyTag::Straddle < StrategyTag::Custom("a".into()));
        assert_eq!(StrategyTag::IronCondor.to_string(), "iron_condor");
        assert_eq!(StrategyTag::Custom("wheel".into()).to_string(), "wheel");
    }
}
