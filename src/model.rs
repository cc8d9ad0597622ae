//! Validated domain objects the engine consumes.
//!
//! These are produced by external loaders (CSV parsing and schema checks are
//! out of scope); the engine treats them as already validated except where a
//! cheap re-check produces a better diagnostic.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::category::Subcode;
use crate::types::{Money, Symbol};
use crate::weights::WeightOverride;

/// What kind of instrument a ticker is. Only rebalanceable funds and ETFs
/// are adjusted by the engine; the other kinds pass through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TickerKind {
    FundRebalanceable,
    FundNotRebalanceable,
    SingleSecurity,
    Etf,
}

impl TickerKind {
    /// True if the engine is permitted to adjust holdings of this kind.
    #[inline]
    pub fn balanceable(self) -> bool {
        matches!(self, TickerKind::FundRebalanceable | TickerKind::Etf)
    }
}

/// Tax treatment tag of an account. Read by report writers; opaque to the
/// rebalancer itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaxType {
    Credit,
    Hsa,
    InheritedIra,
    NonRoth401k,
    NonRothAnnuity,
    NonRothIra,
    Pension,
    RealEstate,
    Roth401k,
    RothAnnuity,
    RothIra,
    Taxable,
}

/// How an account is rebalanced.
///
/// `Percent` allocates across every classified ticker of the account;
/// `Redistribute` only moves value between tickers that currently hold a
/// non-zero balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceProcedure {
    Percent,
    Redistribute,
}

/// Tax filing status of the investor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilingStatus {
    Single,
    MarriedJoint,
    MarriedSeparate,
    HeadOfHousehold,
}

/// Level-1 target weights. These are ratios, not percentages; they need
/// not sum to any particular total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level1Weights {
    pub stock: f64,
    pub bond: f64,
    pub cash: f64,
    pub real_estate: f64,
}

impl Level1Weights {
    pub const fn new(stock: f64, bond: f64, cash: f64, real_estate: f64) -> Self {
        Self {
            stock,
            bond,
            cash,
            real_estate,
        }
    }

    pub fn total(&self) -> f64 {
        self.stock + self.bond + self.cash + self.real_estate
    }

    pub fn is_all_zero(&self) -> bool {
        self.total() == 0.0
    }
}

/// Kinds of account-value synthesis for accounts whose holdings carry no
/// stated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SynthesizerKind {
    Averaging,
    CpiAnnuity,
    Negation,
    NoCpiAnnuity,
    SocialSecurity,
}

/// A synthesizer declaration: the kind plus any referenced accounts
/// (Averaging and Negation read other accounts' values).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesizer {
    pub kind: SynthesizerKind,
    #[serde(default)]
    pub referenced: Vec<AccountKey>,
}

/// Identifies an account: institution mnemonic plus account number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountKey {
    pub institution: String,
    pub number: u64,
}

impl AccountKey {
    pub fn new(institution: impl Into<String>, number: u64) -> Self {
        Self {
            institution: institution.into(),
            number,
        }
    }
}

impl std::fmt::Display for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.institution, self.number)
    }
}

/// Immutable ticker characteristics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ticker {
    pub symbol: Symbol,
    pub kind: TickerKind,
    /// Smallest non-zero position the fund accepts. Negative values are
    /// credit limits: the balance may go as low as the limit.
    pub minimum: Money,
    /// Preferred share-quantity step. 0 permits fractional shares.
    pub rounding: f64,
    /// Up to four subcodes classifying the ticker into one tree node.
    pub subcodes: Vec<Subcode>,
}

impl Ticker {
    pub fn new(symbol: Symbol, kind: TickerKind, subcodes: &[Subcode]) -> Self {
        Self {
            symbol,
            kind,
            minimum: Money::ZERO,
            rounding: 0.0,
            subcodes: subcodes.to_vec(),
        }
    }

    pub fn with_minimum(mut self, minimum: Money) -> Self {
        self.minimum = minimum;
        self
    }

    pub fn with_rounding(mut self, rounding: f64) -> Self {
        self.rounding = rounding;
        self
    }
}

/// A position in one account: shares, price, value, and the holding-weight
/// steering its share of the leaf allocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Holding {
    pub symbol: Symbol,
    pub shares: f64,
    pub price: Money,
    pub value: Money,
    /// Relative allocation weight among tickers bound to the same tree
    /// node. Default 1; 0 withholds the ticker from allocation.
    pub weight: f64,
}

impl Holding {
    /// A holding stated by value; shares derived from value / price.
    pub fn from_value(symbol: Symbol, price: Money, value: Money) -> Self {
        let shares = if price.is_zero() {
            0.0
        } else {
            value.as_f64() / price.as_f64()
        };
        Self {
            symbol,
            shares,
            price,
            value,
            weight: 1.0,
        }
    }

    /// A holding stated by share count; value derived from shares × price.
    pub fn from_shares(symbol: Symbol, price: Money, shares: f64) -> Self {
        Self {
            symbol,
            shares,
            price,
            value: Money::from_f64(shares * price.as_f64()),
            weight: 1.0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Debts enter as negative-value holdings and pass through unadjusted.
    pub fn is_debt(&self) -> bool {
        self.value < Money::ZERO
    }
}

/// One account at one institution.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub key: AccountKey,
    /// Rebalance order within the portfolio; accounts run lowest first.
    pub order: u32,
    pub procedure: RebalanceProcedure,
    pub tax_type: TaxType,
    pub weights: Level1Weights,
    /// Optional fine-grained override replacing weights at every tree level.
    pub detail: Option<WeightOverride>,
    pub synthesizer: Option<Synthesizer>,
    pub holdings: Vec<Holding>,
}

impl Account {
    pub fn new(key: AccountKey, order: u32, tax_type: TaxType, weights: Level1Weights) -> Self {
        Self {
            key,
            order,
            procedure: RebalanceProcedure::Percent,
            tax_type,
            weights,
            detail: None,
            synthesizer: None,
            holdings: Vec::new(),
        }
    }

    pub fn with_procedure(mut self, procedure: RebalanceProcedure) -> Self {
        self.procedure = procedure;
        self
    }

    pub fn with_detail(mut self, detail: WeightOverride) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Synthesizer) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn with_holdings(mut self, holdings: Vec<Holding>) -> Self {
        self.holdings = holdings;
        self
    }

    /// Sum of stated holding values (debts included).
    pub fn stated_value(&self) -> Money {
        self.holdings.iter().map(|h| h.value).sum()
    }
}

/// An investor's portfolio: identity, income facts, level-1 targets, and
/// the member accounts.
#[derive(Debug, Clone, Serialize)]
pub struct Portfolio {
    pub key: String,
    pub filing: FilingStatus,
    pub birth: NaiveDate,
    pub mortality: NaiveDate,
    /// Monthly annuity income (for annuity synthesizers).
    pub annuity_monthly: Money,
    /// Monthly Social-Security benefit.
    pub social_security_monthly: Money,
    /// Annual taxable income. Read by tax-table consumers; unused here.
    pub taxable_income: Money,
    pub weights: Level1Weights,
    /// Equity-fraction increase when the market falls to zero. Enables the
    /// hyperbolic adjustment when set (together with the S&P high).
    pub increase_at_zero: Option<f64>,
    /// Equity-fraction increase at the bear-market threshold. Defaults to
    /// half of `increase_at_zero`.
    pub increase_at_bear: Option<f64>,
    pub accounts: Vec<Account>,
}

impl Portfolio {
    pub fn new(
        key: impl Into<String>,
        filing: FilingStatus,
        birth: NaiveDate,
        mortality: NaiveDate,
        weights: Level1Weights,
    ) -> Self {
        Self {
            key: key.into(),
            filing,
            birth,
            mortality,
            annuity_monthly: Money::ZERO,
            social_security_monthly: Money::ZERO,
            taxable_income: Money::ZERO,
            weights,
            increase_at_zero: None,
            increase_at_bear: None,
            accounts: Vec::new(),
        }
    }

    pub fn with_accounts(mut self, accounts: Vec<Account>) -> Self {
        self.accounts = accounts;
        self
    }

    /// Accounts in declared rebalance order, ties broken by key.
    pub fn ordered_accounts(&self) -> Vec<&Account> {
        let mut ordered: Vec<&Account> = self.accounts.iter().collect();
        ordered.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.key.cmp(&b.key)));
        ordered
    }
}
