//! Ready-made strategies.
//!
//! Templates build common option structures through the pricing model;
//! [`TemplateStrategy`] opens one whenever the engine asks.

pub mod templates;

pub use templates::{
    price_leg, round_strike, strike_for_delta, Template, TemplateParams, TemplateStrategy,
};
