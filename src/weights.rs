//! Per-account effective weights: the overlay chain.
//!
//! For each account the tree's weights are produced by overlaying, in
//! order: built-in defaults, the account's level-1 weights, the account's
//! optional fine-grained override, the closure override for the last
//! account of a portfolio, the close-vs-today equity multiplier, and the
//! hyperbolic high-vs-today equity adjustment.

use log::{debug, warn};
use serde::Serialize;

use crate::adjuster::HyperbolicAdjuster;
use crate::category::{CategoryTree, NodeId};
use crate::config::EngineConfig;
use crate::diag::Diagnostic;
use crate::model::{Account, Level1Weights, Portfolio};

/// A fine-grained weight override covering any set of tree nodes. When an
/// account carries one, the listed weights replace the resolved weights at
/// every level they name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightOverride {
    entries: Vec<(NodeId, f64)>,
}

impl WeightOverride {
    pub fn new(entries: Vec<(NodeId, f64)>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[(NodeId, f64)] {
        &self.entries
    }

    fn apply(&self, weights: &mut EffectiveWeights) {
        for &(id, w) in &self.entries {
            weights.set(id, w);
        }
    }
}

/// Effective weight per tree node for the account currently being
/// rebalanced. Created at the start of an account's rebalance, discarded at
/// its end.
#[derive(Debug, Clone)]
pub struct EffectiveWeights {
    weights: Vec<f64>,
}

impl EffectiveWeights {
    /// Initialize from the tree's built-in default weight table.
    pub fn defaults(tree: &CategoryTree) -> Self {
        Self {
            weights: tree.ids().map(|id| tree.default_weight(id)).collect(),
        }
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> f64 {
        self.weights[id.index()]
    }

    #[inline]
    pub fn set(&mut self, id: NodeId, weight: f64) {
        self.weights[id.index()] = weight;
    }

    /// Replace the four level-1 weights.
    pub fn set_level1(&mut self, tree: &CategoryTree, level1: &Level1Weights) {
        self.set(tree.stock(), level1.stock);
        self.set(tree.bond(), level1.bond);
        self.set(tree.cash(), level1.cash);
        self.set(tree.real_estate(), level1.real_estate);
    }

    /// The current level-1 weights as a quad.
    pub fn level1(&self, tree: &CategoryTree) -> Level1Weights {
        Level1Weights::new(
            self.get(tree.stock()),
            self.get(tree.bond()),
            self.get(tree.cash()),
            self.get(tree.real_estate()),
        )
    }
}

/// Produce the effective weights for one account.
///
/// `closure` carries the level-1 override computed by the closure pass for
/// the last account of a portfolio; it is `None` for every other account.
pub fn resolve(
    tree: &CategoryTree,
    config: &EngineConfig,
    portfolio: &Portfolio,
    account: &Account,
    closure: Option<&Level1Weights>,
    diagnostics: &mut Vec<Diagnostic>,
) -> EffectiveWeights {
    let mut weights = EffectiveWeights::defaults(tree);

    weights.set_level1(tree, &account.weights);

    if let Some(detail) = &account.detail {
        detail.apply(&mut weights);
    }

    if let Some(override_) = closure {
        debug!(
            "closure override for {}: stock={:.2} bond={:.2} cash={:.2} real-estate={:.2}",
            account.key, override_.stock, override_.bond, override_.cash, override_.real_estate
        );
        weights.set_level1(tree, override_);
    }

    apply_close_adjustment(tree, config, account, &mut weights);
    apply_high_adjustment(tree, config, portfolio, account, &mut weights, diagnostics);

    weights
}

/// Overlay 4: multiply the stock weight by today / last close.
fn apply_close_adjustment(
    tree: &CategoryTree,
    config: &EngineConfig,
    account: &Account,
    weights: &mut EffectiveWeights,
) {
    let (Some(today), Some(close)) = (config.sp_today, config.sp_close) else {
        return;
    };
    if close <= 0.0 {
        return;
    }
    let factor = today / close;
    let stock = weights.get(tree.stock());
    weights.set(tree.stock(), stock * factor);
    debug!(
        "close adjustment for {}: stock weight {:.2} -> {:.2} (factor {:.4})",
        account.key,
        stock,
        stock * factor,
        factor
    );
}

/// Overlay 5: re-target the stock weight from the hyperbolic curve fitted
/// through the portfolio's market anchors.
fn apply_high_adjustment(
    tree: &CategoryTree,
    config: &EngineConfig,
    portfolio: &Portfolio,
    account: &Account,
    weights: &mut EffectiveWeights,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (Some(today), Some(high), Some(increase_at_zero)) =
        (config.sp_today, config.sp_high, portfolio.increase_at_zero)
    else {
        return;
    };
    if high <= 0.0 {
        return;
    }

    let increase_at_bear = portfolio
        .increase_at_bear
        .unwrap_or(increase_at_zero / 2.0);
    if increase_at_bear <= increase_at_zero / 5.0 {
        warn!(
            "portfolio {}: increase_at_bear {:.4} <= increase_at_zero/5 {:.4}",
            portfolio.key,
            increase_at_bear,
            increase_at_zero / 5.0
        );
        diagnostics.push(Diagnostic::CurveWarning {
            detail: format!(
                "increase_at_bear {increase_at_bear:.4} is at most a fifth of increase_at_zero \
                 {increase_at_zero:.4}; equity-target curve may be degenerate"
            ),
        });
    }

    let total = portfolio.weights.total();
    if total <= 0.0 {
        return;
    }
    let fraction = portfolio.weights.stock / total;
    let adjuster = HyperbolicAdjuster::new(
        high,
        fraction,
        fraction + increase_at_bear,
        fraction + increase_at_zero,
    );
    let target = adjuster.value_at(today);

    // Re-express the stock weight so stock / (stock + others) hits the
    // target fraction, holding the other level-1 weights fixed.
    let others = weights.get(tree.bond())
        + weights.get(tree.cash())
        + weights.get(tree.real_estate());
    if !(0.0..1.0).contains(&target) {
        diagnostics.push(Diagnostic::CurveWarning {
            detail: format!("equity target {target:.4} outside [0, 1); adjustment skipped"),
        });
        return;
    }
    if others <= 0.0 {
        // Nothing but stock at level 1; the fraction is already 1.
        return;
    }
    let stock = others * target / (1.0 - target);
    debug!(
        "high adjustment for {}: equity target {:.4}, stock weight {:.2} -> {:.2}",
        account.key,
        target,
        weights.get(tree.stock()),
        stock
    );
    weights.set(tree.stock(), stock);
}
