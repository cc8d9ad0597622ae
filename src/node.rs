//! Recursive weight-proportional splitting of an account total down the
//! category tree.
//!
//! A node allocates to its directly bound tickers first, then splits the
//! remainder among its weighted children. Only children whose subtrees
//! contain at least one allocatable ticker take part in the split. Leaf
//! residuals are pushed back up to the nearest ancestor with a descendant
//! able to absorb arbitrary currency (typically a money-market ticker under
//! Cash); whatever cannot be absorbed anywhere surfaces as the account
//! residual.
//!
//! The depth budget bounds rework: a leaf at depth at most `depth_cap` may
//! re-run its allocation when absorbing a residual (a bounded number of
//! times); deeper leaves take the residual as a direct addition to their
//! absorber ticker.

use log::debug;
use rustc_hash::FxHashMap;

use crate::allocate::{allocate, LeafTicker};
use crate::category::{CategoryTree, NodeId};
use crate::diag::Diagnostic;
use crate::types::{Money, Symbol};
use crate::weights::EffectiveWeights;

/// Re-allocation iterations allowed per node within the depth budget.
const MAX_REALLOC: u8 = 4;

/// Result of pushing one account's total through the tree.
pub(crate) struct SplitOutcome {
    pub proposed: FxHashMap<Symbol, Money>,
    pub residual: Money,
}

/// Split `amount` down the tree given per-node ticker bindings.
pub(crate) fn split_account(
    tree: &CategoryTree,
    weights: &EffectiveWeights,
    bound: Vec<Vec<LeafTicker>>,
    amount: Money,
    subset_cap: u32,
    depth_cap: u32,
    diagnostics: &mut Vec<Diagnostic>,
) -> SplitOutcome {
    debug_assert_eq!(bound.len(), tree.len());
    let mut splitter = Splitter {
        tree,
        weights,
        subset_cap,
        depth_cap,
        populated: mark_populated(tree, &bound),
        values: bound.iter().map(|b| vec![Money::ZERO; b.len()]).collect(),
        node_amount: vec![Money::ZERO; tree.len()],
        realloc_used: vec![0; tree.len()],
        bound,
    };

    let residual = splitter.distribute(tree.root(), amount, diagnostics);

    let mut proposed = FxHashMap::default();
    for (node, tickers) in splitter.bound.iter().enumerate() {
        for (i, ticker) in tickers.iter().enumerate() {
            proposed.insert(ticker.symbol, splitter.values[node][i]);
        }
    }
    SplitOutcome { proposed, residual }
}

/// A subtree is populated if it binds at least one allocatable ticker.
fn mark_populated(tree: &CategoryTree, bound: &[Vec<LeafTicker>]) -> Vec<bool> {
    let mut populated = vec![false; tree.len()];
    // Children precede nothing in arena order, so walk ids backwards to
    // fold children into parents.
    for id in tree.ids().collect::<Vec<_>>().into_iter().rev() {
        let own = !bound[id.index()].is_empty();
        let from_children = tree
            .children(id)
            .iter()
            .any(|child| populated[child.index()]);
        populated[id.index()] = own || from_children;
    }
    populated
}

struct Splitter<'a> {
    tree: &'a CategoryTree,
    weights: &'a EffectiveWeights,
    subset_cap: u32,
    depth_cap: u32,
    bound: Vec<Vec<LeafTicker>>,
    populated: Vec<bool>,
    /// Current proposed values, aligned with `bound` per node.
    values: Vec<Vec<Money>>,
    /// Amount last allocated at each node's bound set.
    node_amount: Vec<Money>,
    realloc_used: Vec<u8>,
}

impl Splitter<'_> {
    /// Distribute `amount` into the subtree at `node`; returns whatever
    /// could not be placed.
    fn distribute(
        &mut self,
        node: NodeId,
        amount: Money,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Money {
        let mut remaining = amount;

        // Bound tickers first.
        if !self.bound[node.index()].is_empty() {
            let alloc = allocate(remaining, &self.bound[node.index()], self.subset_cap);
            if alloc.exhausted && !alloc.residual.is_negligible() {
                diagnostics.push(Diagnostic::BudgetExhausted {
                    leaf: self.tree.kind(node).name(),
                    examined: alloc.examined,
                });
            }
            if alloc.placed_nothing() && !remaining.is_negligible() {
                diagnostics.push(Diagnostic::UnallocableLeaf {
                    leaf: self.tree.kind(node).name(),
                    amount: remaining,
                });
            }
            self.node_amount[node.index()] = remaining;
            remaining = alloc.residual;
            self.values[node.index()] = alloc.values;
        }

        // Weight split over populated children.
        let shares = self.child_shares(node, remaining);
        if shares.is_empty() {
            return remaining;
        }

        let mut leftover = Money::ZERO;
        for (child, share) in shares {
            leftover += self.distribute(child, share, diagnostics);
        }

        if !leftover.is_zero() {
            leftover = self.absorb(node, leftover);
        }
        leftover
    }

    /// Split an amount among the populated, positively weighted children,
    /// with the cent drift from rounding assigned to the heaviest child.
    fn child_shares(&self, node: NodeId, amount: Money) -> Vec<(NodeId, Money)> {
        let kids: Vec<(NodeId, f64)> = self
            .tree
            .children(node)
            .iter()
            .copied()
            .filter(|child| self.populated[child.index()])
            .map(|child| (child, self.weights.get(child)))
            .filter(|&(_, w)| w > 0.0)
            .collect();
        let weight_sum: f64 = kids.iter().map(|&(_, w)| w).sum();
        if kids.is_empty() || weight_sum <= 0.0 {
            return Vec::new();
        }

        let mut shares: Vec<(NodeId, Money)> = kids
            .iter()
            .map(|&(child, w)| (child, Money::from_f64(amount.as_f64() * w / weight_sum)))
            .collect();
        let drift = amount - shares.iter().map(|&(_, s)| s).sum::<Money>();
        if !drift.is_zero() {
            // First child of maximal weight takes the cent drift.
            let mut heaviest = 0;
            for (i, &(_, w)) in kids.iter().enumerate().skip(1) {
                if w > kids[heaviest].1 {
                    heaviest = i;
                }
            }
            shares[heaviest].1 += drift;
        }
        shares
    }

    /// Try to place a residual somewhere in the subtree at `node`. Returns
    /// what still could not be placed.
    fn absorb(&mut self, node: NodeId, residual: Money) -> Money {
        let Some(leaf) = self.find_absorber(node) else {
            return residual;
        };
        debug!(
            "absorbing {residual} at {} (level {})",
            self.tree.kind(leaf).name(),
            self.tree.level(leaf)
        );

        let new_amount = self.node_amount[leaf.index()] + residual;
        let absorber = self.absorber_index(leaf);

        // Baseline: keep the current allocation and hand the residual to
        // the absorber ticker outright.
        let mut direct = self.values[leaf.index()].clone();
        direct[absorber] += residual;

        // Within the depth budget a leaf may instead re-run its allocation
        // at the combined amount, if that reduces deviation.
        let may_iterate = u32::from(self.tree.level(leaf)) <= self.depth_cap
            && self.realloc_used[leaf.index()] < MAX_REALLOC;
        if may_iterate {
            let rerun = allocate(new_amount, &self.bound[leaf.index()], self.subset_cap);
            if rerun.residual.is_negligible()
                && rerun.deviation < self.deviation_of(leaf, &direct, new_amount)
            {
                self.realloc_used[leaf.index()] += 1;
                self.values[leaf.index()] = rerun.values;
                self.node_amount[leaf.index()] = new_amount;
                return Money::ZERO;
            }
        }

        self.values[leaf.index()] = direct;
        self.node_amount[leaf.index()] = new_amount;
        Money::ZERO
    }

    /// First node in subtree DFS order whose bound set contains an
    /// absorber ticker.
    fn find_absorber(&self, node: NodeId) -> Option<NodeId> {
        if self.bound[node.index()].iter().any(|t| t.is_absorber()) {
            return Some(node);
        }
        for &child in self.tree.children(node) {
            if !self.populated[child.index()] {
                continue;
            }
            if let Some(found) = self.find_absorber(child) {
                return Some(found);
            }
        }
        None
    }

    /// Index of the absorber with the smallest symbol at a node.
    fn absorber_index(&self, node: NodeId) -> usize {
        self.bound[node.index()]
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_absorber())
            .min_by_key(|(_, t)| t.symbol)
            .map(|(i, _)| i)
            .expect("absorber node has an absorber ticker")
    }

    /// Weighted squared deviation of candidate values against the ideal
    /// proportional allocation of `amount` at a node.
    fn deviation_of(&self, node: NodeId, values: &[Money], amount: Money) -> f64 {
        let tickers = &self.bound[node.index()];
        let weight_sum: f64 = tickers.iter().map(|t| t.weight).sum();
        if weight_sum <= 0.0 {
            return 0.0;
        }
        tickers
            .iter()
            .zip(values)
            .map(|(t, v)| {
                let ideal = amount.as_f64() * t.weight / weight_sum;
                let d = v.as_f64() - ideal;
                t.weight * d * d
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Subcode;
    use crate::weights::EffectiveWeights;

    fn ticker(symbol: &str) -> LeafTicker {
        LeafTicker {
            symbol: Symbol::new(symbol),
            price: Money(1_00),
            weight: 1.0,
            minimum: Money::ZERO,
            rounding: 0.0,
        }
    }

    fn etf(symbol: &str, price: Money, rounding: f64) -> LeafTicker {
        LeafTicker {
            symbol: Symbol::new(symbol),
            price,
            weight: 1.0,
            minimum: Money::ZERO,
            rounding,
        }
    }

    fn bind(tree: &CategoryTree, entries: &[(NodeId, LeafTicker)]) -> Vec<Vec<LeafTicker>> {
        let mut bound: Vec<Vec<LeafTicker>> = vec![Vec::new(); tree.len()];
        for (node, t) in entries {
            bound[node.index()].push(t.clone());
        }
        bound
    }

    fn codes(tree: &CategoryTree, s: &str) -> NodeId {
        let parsed: Vec<Subcode> = s
            .chars()
            .filter_map(|c| Subcode::from_char(c).unwrap())
            .collect();
        tree.classify(&parsed).unwrap()
    }

    #[test]
    fn lone_leaf_receives_everything() {
        // A single Cash ticker takes the full amount even though Cash's
        // level-1 weight is only 10: unpopulated siblings take no part.
        let tree = CategoryTree::new();
        let weights = EffectiveWeights::defaults(&tree);
        let leaf = codes(&tree, "CU");
        let bound = bind(&tree, &[(leaf, ticker("MM"))]);
        let mut diags = Vec::new();
        let out = split_account(&tree, &weights, bound, Money(10_000_00), 4096, 2, &mut diags);
        assert_eq!(out.proposed[&Symbol::new("MM")], Money(10_000_00));
        assert_eq!(out.residual, Money::ZERO);
        assert!(diags.is_empty());
    }

    #[test]
    fn two_level1_categories_split_by_weight() {
        let tree = CategoryTree::new();
        let mut weights = EffectiveWeights::defaults(&tree);
        weights.set(tree.stock(), 50.0);
        weights.set(tree.bond(), 50.0);
        let stock_leaf = codes(&tree, "SDLW");
        let bond_leaf = codes(&tree, "BE");
        let bound = bind(
            &tree,
            &[(stock_leaf, ticker("VTSAX")), (bond_leaf, ticker("VBSP"))],
        );
        let mut diags = Vec::new();
        let out = split_account(&tree, &weights, bound, Money(10_000_00), 4096, 2, &mut diags);
        assert_eq!(out.proposed[&Symbol::new("VTSAX")], Money(5000_00));
        assert_eq!(out.proposed[&Symbol::new("VBSP")], Money(5000_00));
        assert_eq!(out.residual, Money::ZERO);
    }

    #[test]
    fn root_bound_ticker_allocates_before_children() {
        // An unclassified ETF binds at the root and takes the whole amount;
        // the rounding remainder descends into the populated Cash subtree.
        let tree = CategoryTree::new();
        let weights = EffectiveWeights::defaults(&tree);
        let cash_leaf = codes(&tree, "CU");
        let bound = bind(
            &tree,
            &[
                (tree.root(), etf("SPY", Money(100_00), 5.0)),
                (cash_leaf, ticker("MM")),
            ],
        );
        let mut diags = Vec::new();
        let out = split_account(&tree, &weights, bound, Money(10_050_00), 4096, 2, &mut diags);
        assert_eq!(out.proposed[&Symbol::new("SPY")], Money(10_000_00));
        assert_eq!(out.proposed[&Symbol::new("MM")], Money(50_00));
        assert_eq!(out.residual, Money::ZERO);
    }

    #[test]
    fn leaf_residual_absorbed_by_money_market_sibling_subtree() {
        // The ETF sits in a stock leaf; its rounding residual climbs to the
        // root and lands in the money market fund.
        let tree = CategoryTree::new();
        let mut weights = EffectiveWeights::defaults(&tree);
        weights.set(tree.stock(), 80.0);
        weights.set(tree.cash(), 20.0);
        let stock_leaf = codes(&tree, "SDLW");
        let cash_leaf = codes(&tree, "CU");
        let bound = bind(
            &tree,
            &[
                (stock_leaf, etf("VV", Money(300_00), 1.0)),
                (cash_leaf, ticker("MM")),
            ],
        );
        let mut diags = Vec::new();
        let out = split_account(&tree, &weights, bound, Money(10_000_00), 4096, 2, &mut diags);
        // Stock gets 8 000 -> 26.67 shares snaps to 27 = 8 100; cash gets
        // 2 000 and then absorbs the -100 overshoot.
        assert_eq!(out.proposed[&Symbol::new("VV")], Money(8100_00));
        assert_eq!(out.proposed[&Symbol::new("MM")], Money(1900_00));
        assert_eq!(out.residual, Money::ZERO);
    }

    #[test]
    fn residual_with_no_absorber_surfaces() {
        let tree = CategoryTree::new();
        let weights = EffectiveWeights::defaults(&tree);
        let stock_leaf = codes(&tree, "SDLW");
        let bound = bind(&tree, &[(stock_leaf, etf("VV", Money(300_00), 1.0))]);
        let mut diags = Vec::new();
        let out = split_account(&tree, &weights, bound, Money(10_000_00), 4096, 2, &mut diags);
        // 33.33 shares snaps to 33 = 9 900; nothing can take the 100.
        assert_eq!(out.proposed[&Symbol::new("VV")], Money(9900_00));
        assert_eq!(out.residual, Money(100_00));
    }

    #[test]
    fn unallocable_leaf_diagnosed() {
        let tree = CategoryTree::new();
        let weights = EffectiveWeights::defaults(&tree);
        let leaf = codes(&tree, "SDLW");
        let mut t = ticker("BIGMIN");
        t.minimum = Money(50_000_00);
        let bound = bind(&tree, &[(leaf, t)]);
        let mut diags = Vec::new();
        let out = split_account(&tree, &weights, bound, Money(1000_00), 4096, 2, &mut diags);
        assert_eq!(out.residual, Money(1000_00));
        assert!(diags
            .iter()
            .any(|d| matches!(d, Diagnostic::UnallocableLeaf { .. })));
    }

    #[test]
    fn empty_tree_returns_amount() {
        let tree = CategoryTree::new();
        let weights = EffectiveWeights::defaults(&tree);
        let bound = vec![Vec::new(); tree.len()];
        let mut diags = Vec::new();
        let out = split_account(&tree, &weights, bound, Money(500_00), 4096, 2, &mut diags);
        assert!(out.proposed.is_empty());
        assert_eq!(out.residual, Money(500_00));
    }

    #[test]
    fn weight_zero_child_takes_nothing() {
        let tree = CategoryTree::new();
        let mut weights = EffectiveWeights::defaults(&tree);
        weights.set(tree.stock(), 0.0);
        let stock_leaf = codes(&tree, "SDLW");
        let cash_leaf = codes(&tree, "CU");
        let bound = bind(
            &tree,
            &[(stock_leaf, ticker("VTSAX")), (cash_leaf, ticker("MM"))],
        );
        let mut diags = Vec::new();
        let out = split_account(&tree, &weights, bound, Money(6000_00), 4096, 2, &mut diags);
        assert_eq!(out.proposed[&Symbol::new("VTSAX")], Money::ZERO);
        assert_eq!(out.proposed[&Symbol::new("MM")], Money(6000_00));
    }
}
