//! The rebalancing engine: per-account orchestration and the portfolio
//! closure pass.
//!
//! Accounts run one at a time in declared order. For each account the
//! engine resolves effective weights, classifies and binds the holdings,
//! pushes the rebalanceable total down the tree, and assembles an outcome.
//! The last account of a portfolio additionally receives level-1 weight
//! overrides from the closure pass so that the portfolio as a whole lands
//! on its declared level-1 targets.

use log::{info, warn};
use rustc_hash::FxHashMap;

use crate::allocate::LeafTicker;
use crate::category::{CategoryTree, NodeId};
use crate::config::EngineConfig;
use crate::diag::{AccountOutcome, AccountStatus, Diagnostic, PortfolioOutcome};
use crate::error::Result;
use crate::model::{Account, AccountKey, Holding, Level1Weights, Portfolio, RebalanceProcedure, Ticker};
use crate::node::split_account;
use crate::synth::synthesize;
use crate::types::{Money, Symbol};
use crate::weights;

/// Immutable ticker definitions with their tree bindings.
pub struct TickerTable {
    tickers: FxHashMap<Symbol, Ticker>,
    bindings: FxHashMap<Symbol, NodeId>,
    diagnostics: Vec<Diagnostic>,
}

impl TickerTable {
    /// Classify every ticker. Inconsistent subcode sets become
    /// classification diagnostics; the ticker stays in the table unbound
    /// and is treated as non-rebalanceable.
    pub fn new(tree: &CategoryTree, tickers: Vec<Ticker>) -> Self {
        let mut map = FxHashMap::default();
        let mut bindings = FxHashMap::default();
        let mut diagnostics = Vec::new();
        for ticker in tickers {
            match tree.classify(&ticker.subcodes) {
                Ok(node) => {
                    bindings.insert(ticker.symbol, node);
                }
                Err(conflict) => {
                    warn!("ticker {}: {conflict}", ticker.symbol);
                    diagnostics.push(Diagnostic::Classification {
                        symbol: ticker.symbol,
                        detail: conflict.to_string(),
                    });
                }
            }
            map.insert(ticker.symbol, ticker);
        }
        Self {
            tickers: map,
            bindings,
            diagnostics,
        }
    }

    /// Like [`new`](Self::new), but duplicate symbols and classification
    /// conflicts are hard errors instead of diagnostics.
    pub fn strict(tree: &CategoryTree, tickers: Vec<Ticker>) -> crate::error::Result<Self> {
        let mut seen = FxHashMap::default();
        for ticker in &tickers {
            if seen.insert(ticker.symbol, ()).is_some() {
                return Err(crate::error::Error::Ticker(format!(
                    "duplicate symbol: {}",
                    ticker.symbol
                )));
            }
            if let Err(conflict) = tree.classify(&ticker.subcodes) {
                return Err(crate::error::Error::SubcodeConflict {
                    symbol: ticker.symbol,
                    first: conflict.first.as_char(),
                    second: conflict.second.as_char(),
                });
            }
        }
        Ok(Self::new(tree, tickers))
    }

    pub fn get(&self, symbol: Symbol) -> Option<&Ticker> {
        self.tickers.get(&symbol)
    }

    /// The tree node a ticker is bound to, if it classified.
    pub fn binding(&self, symbol: Symbol) -> Option<NodeId> {
        self.bindings.get(&symbol).copied()
    }

    /// Classification problems found at construction.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

/// The rebalancing engine. Construction fixes the configuration, the
/// category tree, and the ticker table for the whole run.
pub struct Engine {
    config: EngineConfig,
    tree: CategoryTree,
    tickers: TickerTable,
}

impl Engine {
    pub fn new(config: EngineConfig, tickers: Vec<Ticker>) -> Result<Engine> {
        config.validate()?;
        let tree = CategoryTree::new();
        let tickers = TickerTable::new(&tree, tickers);
        Ok(Engine {
            config,
            tree,
            tickers,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tree(&self) -> &CategoryTree {
        &self.tree
    }

    pub fn tickers(&self) -> &TickerTable {
        &self.tickers
    }

    /// Rebalance every account of a portfolio in declared order, closing
    /// the portfolio's level-1 targets on the last account.
    pub fn rebalance_portfolio(&self, portfolio: &Portfolio) -> PortfolioOutcome {
        let ordered = portfolio.ordered_accounts();
        info!(
            "rebalancing portfolio {} ({} accounts)",
            portfolio.key,
            ordered.len()
        );

        let (synthesized, mut pending) = self.resolve_synthesized(portfolio, &ordered);

        let mut outcomes: Vec<AccountOutcome> = Vec::with_capacity(ordered.len());
        for (index, account) in ordered.iter().enumerate() {
            let mut diagnostics = pending.remove(&account.key).unwrap_or_default();
            let is_last = index + 1 == ordered.len();
            let closure = if is_last {
                self.closure_weights(portfolio, &ordered, &outcomes, &mut diagnostics)
            } else {
                None
            };
            let outcome = self.run_account(
                portfolio,
                account,
                closure.as_ref(),
                synthesized.get(&account.key).copied(),
                diagnostics,
            );
            outcomes.push(outcome);
        }

        PortfolioOutcome {
            key: portfolio.key.clone(),
            accounts: outcomes,
        }
    }

    /// Rebalance a single account in isolation (no closure override).
    pub fn rebalance_account(&self, portfolio: &Portfolio, account: &Account) -> AccountOutcome {
        self.run_account(portfolio, account, None, None, Vec::new())
    }

    // === Internals ===

    fn run_account(
        &self,
        portfolio: &Portfolio,
        account: &Account,
        closure: Option<&Level1Weights>,
        synthesized: Option<Money>,
        mut diagnostics: Vec<Diagnostic>,
    ) -> AccountOutcome {
        let partition = self.partition(account, &mut diagnostics);
        let rebalanceable: Money = partition
            .participating
            .iter()
            .map(|(h, _, _)| h.value)
            .sum();
        info!(
            "rebalancing {}: {} across {} tickers",
            account.key,
            rebalanceable,
            partition.participating.len()
        );

        let effective = weights::resolve(
            &self.tree,
            &self.config,
            portfolio,
            account,
            closure,
            &mut diagnostics,
        );

        let mut bound: Vec<Vec<LeafTicker>> = vec![Vec::new(); self.tree.len()];
        for (holding, ticker, node) in &partition.participating {
            bound[node.index()].push(LeafTicker {
                symbol: holding.symbol,
                price: holding.price,
                weight: holding.weight,
                minimum: ticker.minimum,
                rounding: ticker.rounding,
            });
        }

        let split = split_account(
            &self.tree,
            &effective,
            bound,
            rebalanceable,
            self.config.subset_cap,
            self.config.depth_cap,
            &mut diagnostics,
        );

        let mut proposed: Vec<(Symbol, Money)> = partition
            .participating
            .iter()
            .map(|(h, _, _)| (h.symbol, split.proposed.get(&h.symbol).copied().unwrap_or(Money::ZERO)))
            .chain(partition.withheld.iter().map(|h| (h.symbol, Money::ZERO)))
            .collect();
        proposed.sort_by_key(|&(s, _)| s);

        let mut passed_through: Vec<(Symbol, Money)> = partition
            .passed
            .iter()
            .map(|h| (h.symbol, h.value))
            .collect();
        passed_through.sort_by_key(|&(s, _)| s);

        let placed_nothing = proposed.iter().all(|&(_, v)| v.is_zero());
        let status = if split.residual.is_negligible() {
            AccountStatus::Ok
        } else if placed_nothing && !rebalanceable.is_negligible() {
            AccountStatus::Infeasible
        } else {
            AccountStatus::Partial
        };

        AccountOutcome {
            key: account.key.clone(),
            status,
            proposed,
            passed_through,
            rebalanceable,
            residual: split.residual,
            synthesized,
            diagnostics,
        }
    }

    /// Partition an account's holdings into allocation participants,
    /// withheld holdings, and pass-throughs.
    fn partition<'a>(
        &'a self,
        account: &'a Account,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Partition<'a> {
        let mut partition = Partition::default();
        for holding in &account.holdings {
            let Some(ticker) = self.tickers.get(holding.symbol) else {
                diagnostics.push(Diagnostic::Validation {
                    entity: holding.symbol.as_str().to_owned(),
                    detail: "holding references an unknown ticker".to_owned(),
                });
                partition.passed.push(holding);
                continue;
            };
            if !ticker.kind.balanceable() || holding.is_debt() {
                partition.passed.push(holding);
                continue;
            }
            let Some(node) = self.tickers.binding(holding.symbol) else {
                diagnostics.push(Diagnostic::Classification {
                    symbol: holding.symbol,
                    detail: "unclassifiable ticker held; passed through".to_owned(),
                });
                partition.passed.push(holding);
                continue;
            };
            let redistribute_only = account.procedure == RebalanceProcedure::Redistribute;
            if holding.weight == 0.0 || (redistribute_only && holding.value.is_zero()) {
                partition.withheld.push(holding);
                continue;
            }
            partition.participating.push((holding, ticker, node));
        }
        partition
    }

    /// Sum of an account's rebalanceable holding values.
    fn rebalanceable_total(&self, account: &Account) -> Money {
        let mut scratch = Vec::new();
        self.partition(account, &mut scratch)
            .participating
            .iter()
            .map(|(h, _, _)| h.value)
            .sum()
    }

    /// Compute the closure level-1 override for the last account.
    ///
    /// Categories already past their portfolio-wide target get weight 0 and
    /// an overshoot diagnostic. All-zero portfolio weights skip the
    /// override entirely and leave allocation to the holding weights.
    fn closure_weights(
        &self,
        portfolio: &Portfolio,
        ordered: &[&Account],
        earlier: &[AccountOutcome],
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<Level1Weights> {
        if portfolio.weights.is_all_zero() {
            return None;
        }
        let balanceable: Money = ordered
            .iter()
            .map(|account| self.rebalanceable_total(account))
            .sum();
        let weight_sum = portfolio.weights.total();

        let mut placed = [Money::ZERO; 4]; // stock, bond, cash, real-estate
        for outcome in earlier {
            for &(symbol, value) in &outcome.proposed {
                let Some(node) = self.tickers.binding(symbol) else {
                    continue;
                };
                let Some(level1) = self.tree.level1_of(node) else {
                    // Root-bound tickers belong to no level-1 category.
                    continue;
                };
                let slot = if level1 == self.tree.stock() {
                    0
                } else if level1 == self.tree.bond() {
                    1
                } else if level1 == self.tree.cash() {
                    2
                } else {
                    3
                };
                placed[slot] += value;
            }
        }

        let targets = [
            ("Stock", portfolio.weights.stock),
            ("Bond", portfolio.weights.bond),
            ("Cash", portfolio.weights.cash),
            ("Real Estate", portfolio.weights.real_estate),
        ];
        let mut closed = [0.0; 4];
        for (slot, &(name, weight)) in targets.iter().enumerate() {
            let target = balanceable.as_f64() * weight / weight_sum;
            let residual = target - placed[slot].as_f64();
            if residual < 0.0 {
                let excess = Money::from_f64(-residual);
                warn!(
                    "portfolio {}: level-1 target for {name} overshot by {excess}",
                    portfolio.key
                );
                diagnostics.push(Diagnostic::Overshoot {
                    category: name,
                    excess,
                });
                closed[slot] = 0.0;
            } else {
                closed[slot] = residual;
            }
        }

        Some(Level1Weights::new(closed[0], closed[1], closed[2], closed[3]))
    }

    /// Resolve synthesized values for holdings-free synthesizer accounts.
    ///
    /// Averaging and Negation read the values of their referenced accounts:
    /// stated values for ordinary accounts, already-synthesized values for
    /// synthesizer accounts earlier in the order.
    fn resolve_synthesized(
        &self,
        portfolio: &Portfolio,
        ordered: &[&Account],
    ) -> (FxHashMap<AccountKey, Money>, FxHashMap<AccountKey, Vec<Diagnostic>>) {
        let mut values: FxHashMap<AccountKey, Money> = ordered
            .iter()
            .filter(|a| a.synthesizer.is_none() || !a.holdings.is_empty())
            .map(|a| (a.key.clone(), a.stated_value()))
            .collect();
        let mut synthesized = FxHashMap::default();
        let mut pending: FxHashMap<AccountKey, Vec<Diagnostic>> = FxHashMap::default();

        for account in ordered {
            let Some(synth) = &account.synthesizer else {
                continue;
            };
            if !account.holdings.is_empty() {
                // A stated value wins over synthesis.
                continue;
            }
            let mut referenced = Vec::with_capacity(synth.referenced.len());
            for key in &synth.referenced {
                match values.get(key) {
                    Some(&v) => referenced.push(v),
                    None => pending.entry(account.key.clone()).or_default().push(
                        Diagnostic::Validation {
                            entity: account.key.to_string(),
                            detail: format!("synthesizer references unresolved account {key}"),
                        },
                    ),
                }
            }
            let value = synthesize(synth.kind, portfolio, &self.config, &referenced);
            values.insert(account.key.clone(), value);
            synthesized.insert(account.key.clone(), value);
        }
        (synthesized, pending)
    }
}

#[derive(Default)]
struct Partition<'a> {
    participating: Vec<(&'a Holding, &'a Ticker, NodeId)>,
    withheld: Vec<&'a Holding>,
    passed: Vec<&'a Holding>,
}
