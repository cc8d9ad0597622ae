//! Per-account diagnostics and rebalance outcomes.
//!
//! Recoverable conditions never abort a run; they are collected here and
//! attached to the most specific entity. Consumed by the report, proposed,
//! difference, and action writers.

use serde::Serialize;

use crate::model::AccountKey;
use crate::types::{Money, Symbol};

/// Overall disposition of one account's rebalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccountStatus {
    /// Every unit of the rebalanceable total was placed.
    Ok,
    /// Some residual could not be placed.
    Partial,
    /// Nothing could be placed at all.
    Infeasible,
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountStatus::Ok => write!(f, "OK"),
            AccountStatus::Partial => write!(f, "PARTIAL"),
            AccountStatus::Infeasible => write!(f, "INFEASIBLE"),
        }
    }
}

/// A recoverable condition observed during a rebalance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Diagnostic {
    /// Input data failed a consistency check; the entity was skipped.
    Validation { entity: String, detail: String },
    /// A ticker could not be bound to any tree node; it was treated as
    /// non-rebalanceable.
    Classification { symbol: Symbol, detail: String },
    /// A leaf's constraints ruled out every allocation; its amount was
    /// surfaced upward.
    UnallocableLeaf { leaf: &'static str, amount: Money },
    /// The closure pass found a level-1 category already past its
    /// portfolio-wide target.
    Overshoot { category: &'static str, excess: Money },
    /// The equity-target curve parameters produce a non-monotone curve.
    CurveWarning { detail: String },
    /// The subset-search cap was reached before a zero-residual
    /// allocation was found.
    BudgetExhausted { leaf: &'static str, examined: u32 },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::Validation { entity, detail } => {
                write!(f, "validation: {entity}: {detail}")
            }
            Diagnostic::Classification { symbol, detail } => {
                write!(f, "classification: {symbol}: {detail}")
            }
            Diagnostic::UnallocableLeaf { leaf, amount } => {
                write!(f, "un-allocable leaf {leaf}: {amount} unplaced")
            }
            Diagnostic::Overshoot { category, excess } => {
                write!(f, "portfolio target for {category} overshot by {excess}")
            }
            Diagnostic::CurveWarning { detail } => write!(f, "curve warning: {detail}"),
            Diagnostic::BudgetExhausted { leaf, examined } => {
                write!(f, "subset budget exhausted at {leaf} after {examined} candidates")
            }
        }
    }
}

/// Result of rebalancing one account.
#[derive(Debug, Clone, Serialize)]
pub struct AccountOutcome {
    pub key: AccountKey,
    pub status: AccountStatus,
    /// Proposed value per participating ticker, sorted by symbol. Withheld
    /// tickers (holding-weight 0) appear with a zero value.
    pub proposed: Vec<(Symbol, Money)>,
    /// Holdings the engine may not adjust (debts, non-rebalanceable kinds,
    /// unclassifiable tickers), passed through at their current value.
    pub passed_through: Vec<(Symbol, Money)>,
    /// The amount the engine was asked to place.
    pub rebalanceable: Money,
    /// Amount that could not be placed anywhere.
    pub residual: Money,
    /// Value synthesized for the account, if a synthesizer ran.
    pub synthesized: Option<Money>,
    pub diagnostics: Vec<Diagnostic>,
}

impl AccountOutcome {
    /// Sum of proposed values over participating tickers.
    pub fn proposed_total(&self) -> Money {
        self.proposed.iter().map(|&(_, v)| v).sum()
    }

    /// Proposed value for one symbol, if it participated.
    pub fn proposed_for(&self, symbol: Symbol) -> Option<Money> {
        self.proposed
            .iter()
            .find(|&&(s, _)| s == symbol)
            .map(|&(_, v)| v)
    }

    pub fn has_diagnostics(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

impl std::fmt::Display for AccountOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "[{}] {} rebalanceable={} residual={}",
            self.status, self.key, self.rebalanceable, self.residual
        )?;
        for (symbol, value) in &self.proposed {
            writeln!(f, "  {symbol:<8} {value}")?;
        }
        for diag in &self.diagnostics {
            writeln!(f, "  ! {diag}")?;
        }
        Ok(())
    }
}

/// Results for a whole portfolio: one outcome per account, in rebalance
/// order.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioOutcome {
    pub key: String,
    pub accounts: Vec<AccountOutcome>,
}

impl PortfolioOutcome {
    /// Worst status across the member accounts.
    pub fn status(&self) -> AccountStatus {
        let mut worst = AccountStatus::Ok;
        for outcome in &self.accounts {
            match (worst, outcome.status) {
                (_, AccountStatus::Infeasible) => worst = AccountStatus::Infeasible,
                (AccountStatus::Ok, AccountStatus::Partial) => worst = AccountStatus::Partial,
                _ => {}
            }
        }
        worst
    }

    /// Total unplaced residual across accounts.
    pub fn residual(&self) -> Money {
        self.accounts.iter().map(|a| a.residual).sum()
    }

    pub fn outcome_for(&self, key: &AccountKey) -> Option<&AccountOutcome> {
        self.accounts.iter().find(|a| &a.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: AccountStatus, residual: Money) -> AccountOutcome {
        AccountOutcome {
            key: AccountKey::new("test", 1),
            status,
            proposed: vec![
                (Symbol::new("BND"), Money(4000_00)),
                (Symbol::new("SPY"), Money(6000_00)),
            ],
            passed_through: Vec::new(),
            rebalanceable: Money(10_000_00),
            residual,
            synthesized: None,
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn proposed_total_and_lookup() {
        let o = outcome(AccountStatus::Ok, Money::ZERO);
        assert_eq!(o.proposed_total(), Money(10_000_00));
        assert_eq!(o.proposed_for(Symbol::new("SPY")), Some(Money(6000_00)));
        assert_eq!(o.proposed_for(Symbol::new("GLD")), None);
    }

    #[test]
    fn portfolio_status_is_worst() {
        let p = PortfolioOutcome {
            key: "K".into(),
            accounts: vec![
                outcome(AccountStatus::Ok, Money::ZERO),
                outcome(AccountStatus::Partial, Money(5_00)),
            ],
        };
        assert_eq!(p.status(), AccountStatus::Partial);
        assert_eq!(p.residual(), Money(5_00));
    }

    #[test]
    fn display_formats() {
        let o = outcome(AccountStatus::Ok, Money::ZERO);
        let s = format!("{o}");
        assert!(s.contains("[OK]"));
        assert!(s.contains("SPY"));
        assert_eq!(format!("{}", AccountStatus::Infeasible), "INFEASIBLE");
    }

    #[test]
    fn diagnostic_display() {
        let d = Diagnostic::Overshoot {
            category: "Stock",
            excess: Money(120_00),
        };
        assert_eq!(format!("{d}"), "portfolio target for Stock overshot by $120.00");
    }

    #[test]
    fn outcome_serializes_for_report_writers() {
        let o = outcome(AccountStatus::Partial, Money(5_00));
        let json = serde_json::to_string(&o).unwrap();
        assert!(json.contains("\"Partial\""));
        assert!(json.contains("\"SPY\""));
        // Money stays an integer count of minor units on the wire.
        assert!(json.contains("600000"));
    }
}
