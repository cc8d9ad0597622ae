// Allow our dollar.cents digit grouping convention (e.g., 100_00 = $100.00)
#![allow(clippy::inconsistent_digit_grouping)]

//! # canopy
//!
//! A hierarchical portfolio rebalancing engine. Canopy distributes each
//! account's value down a fixed asset-category tree (stock, bond, cash,
//! real estate and their subdivisions), then solves a constrained subset
//! allocation at every leaf so that proposed per-ticker values sum exactly
//! to the account total while honouring minimum investments and preferred
//! share rounding.
//!
//! ## Features
//!
//! - **Category tree**: static 49-node taxonomy; tickers classify into it
//!   from up to four single-character subcodes
//! - **Weight overlays**: built-in defaults, per-account level-1 weights,
//!   fine-grained overrides, market-driven equity adjustments, and a
//!   portfolio closure pass on the last account
//! - **Leaf allocation**: subset search with strict deterministic
//!   tie-breaks and an iteration budget
//! - **Fixed-point currency**: integer minor units end to end; banker's
//!   rounding at the boundary
//!
//! ## Quick Start
//!
//! ```
//! use canopy::{
//!     Account, AccountKey, Engine, EngineConfig, FilingStatus, Holding, Level1Weights, Money,
//!     Portfolio, Subcode, Symbol, TaxType, Ticker, TickerKind,
//! };
//! use chrono::NaiveDate;
//!
//! let config = EngineConfig::new(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
//! let engine = Engine::new(
//!     config,
//!     vec![
//!         Ticker::new(Symbol::new("VTSAX"), TickerKind::FundRebalanceable,
//!                     &[Subcode::S, Subcode::D, Subcode::L, Subcode::W]),
//!         Ticker::new(Symbol::new("VBSP"), TickerKind::FundRebalanceable,
//!                     &[Subcode::B, Subcode::E]),
//!     ],
//! )
//! .unwrap();
//!
//! let account = Account::new(
//!     AccountKey::new("vanguard", 1),
//!     0,
//!     TaxType::Taxable,
//!     Level1Weights::new(50.0, 50.0, 0.0, 0.0),
//! )
//! .with_holdings(vec![
//!     Holding::from_value(Symbol::new("VTSAX"), Money(100_00), Money(7000_00)),
//!     Holding::from_value(Symbol::new("VBSP"), Money(10_00), Money(3000_00)),
//! ]);
//!
//! let portfolio = Portfolio::new(
//!     "example",
//!     FilingStatus::Single,
//!     NaiveDate::from_ymd_opt(1960, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2050, 1, 1).unwrap(),
//!     Level1Weights::new(50.0, 50.0, 0.0, 0.0),
//! )
//! .with_accounts(vec![account]);
//!
//! let outcome = engine.rebalance_portfolio(&portfolio);
//! let account_outcome = &outcome.accounts[0];
//! assert_eq!(account_outcome.proposed_for(Symbol::new("VTSAX")), Some(Money(5000_00)));
//! assert_eq!(account_outcome.proposed_for(Symbol::new("VBSP")), Some(Money(5000_00)));
//! assert_eq!(account_outcome.residual, Money::ZERO);
//! ```
//!
//! ## Money Representation
//!
//! All currency is [`Money`], an `i64` count of minor units:
//!
//! ```
//! use canopy::Money;
//!
//! let amount = Money(100_50);  // $100.50
//! assert_eq!(format!("{}", amount), "$100.50");
//! ```

pub mod adjuster;
pub mod allocate;
pub mod category;
pub mod config;
pub mod diag;
mod engine;
pub mod error;
pub mod model;
mod node;
pub mod synth;
mod types;
pub mod weights;

// Re-export public API
pub use adjuster::HyperbolicAdjuster;
pub use allocate::{allocate, LeafAllocation, LeafTicker};
pub use category::{CategoryTree, NodeId, NodeKind, Subcode, SubcodeConflict};
pub use config::EngineConfig;
pub use diag::{AccountOutcome, AccountStatus, Diagnostic, PortfolioOutcome};
pub use engine::{Engine, TickerTable};
pub use error::{Error, Result};
pub use model::{
    Account, AccountKey, FilingStatus, Holding, Level1Weights, Portfolio, RebalanceProcedure,
    Synthesizer, SynthesizerKind, TaxType, Ticker, TickerKind,
};
pub use types::{Money, Symbol};
pub use weights::{EffectiveWeights, WeightOverride};
