// Allow our dollar.cents digit grouping convention (e.g., 100_00 = $100.00)
#![allow(clippy::inconsistent_digit_grouping)]

//! Property-based tests for allocation and engine invariants.
//!
//! These tests use proptest to verify that conservation, constraint, and
//! determinism invariants hold across randomly generated scenarios.

use canopy::{
    allocate, Account, AccountKey, Engine, EngineConfig, FilingStatus, Holding, HyperbolicAdjuster,
    LeafTicker, Level1Weights, Money, Portfolio, Subcode, Symbol, TaxType, Ticker, TickerKind,
};
use chrono::NaiveDate;
use proptest::prelude::*;

/// Generate a positive currency amount (up to $100 000).
fn amount_strategy() -> impl Strategy<Value = Money> {
    (0i64..=10_000_000).prop_map(Money)
}

/// Generate a holding-weight.
fn weight_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![Just(1.0), 0.1f64..10.0]
}

/// Generate a share price in cents.
fn price_strategy() -> impl Strategy<Value = Money> {
    (1_00i64..=500_00).prop_map(Money)
}

/// Generate a preferred rounding step.
fn rounding_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![Just(0.0), Just(1.0), Just(5.0), Just(10.0)]
}

/// Generate a minimum investment.
fn minimum_strategy() -> impl Strategy<Value = Money> {
    prop_oneof![
        Just(Money::ZERO),
        (1_00i64..=5000_00).prop_map(Money),
        (-5000_00i64..=-1_00).prop_map(Money),
    ]
}

fn leaf_ticker_strategy(index: usize) -> impl Strategy<Value = LeafTicker> {
    (
        price_strategy(),
        weight_strategy(),
        minimum_strategy(),
        rounding_strategy(),
    )
        .prop_map(move |(price, weight, minimum, rounding)| LeafTicker {
            symbol: Symbol::new(&format!("T{index:02}")),
            price,
            weight,
            minimum,
            rounding,
        })
}

fn leaf_strategy(max: usize) -> impl Strategy<Value = Vec<LeafTicker>> {
    (1..=max).prop_flat_map(|n| (0..n).map(leaf_ticker_strategy).collect::<Vec<_>>())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    // ========================================================================
    // CONSERVATION INVARIANTS
    // ========================================================================

    /// Placed values plus residual always reconstruct the amount exactly.
    #[test]
    fn leaf_conservation(amount in amount_strategy(), tickers in leaf_strategy(5)) {
        let alloc = allocate(amount, &tickers, 4096);
        let placed: Money = alloc.values.iter().copied().sum();
        prop_assert_eq!(placed + alloc.residual, amount);
    }

    /// Every non-zero proposed value is a whole number of share steps and
    /// meets the ticker's positive minimum.
    #[test]
    fn leaf_constraints_honoured(amount in amount_strategy(), tickers in leaf_strategy(5)) {
        let alloc = allocate(amount, &tickers, 4096);
        for (ticker, &value) in tickers.iter().zip(&alloc.values) {
            if value.is_zero() {
                continue;
            }
            if ticker.rounding > 0.0 {
                let shares = value.as_f64() / ticker.price.as_f64();
                let steps = shares / ticker.rounding;
                prop_assert!(
                    (steps - steps.round()).abs() < 1e-6,
                    "{}: {} shares not a multiple of {}",
                    ticker.symbol, shares, ticker.rounding
                );
                if ticker.minimum > Money::ZERO {
                    prop_assert!(value >= ticker.minimum);
                }
            } else if ticker.minimum > Money::ZERO {
                prop_assert!(value >= ticker.minimum);
            } else {
                // Credit limit bounds the downside.
                prop_assert!(value >= ticker.minimum.min(Money::ZERO));
            }
        }
    }

    /// Fully flexible leaves allocate exactly proportionally (up to cent
    /// rounding drift soaked by one ticker).
    #[test]
    fn flexible_leaf_is_proportional(
        amount in (1_000_00i64..=10_000_000).prop_map(Money),
        weights in prop::collection::vec(weight_strategy(), 1..6),
    ) {
        let tickers: Vec<LeafTicker> = weights
            .iter()
            .enumerate()
            .map(|(i, &w)| LeafTicker {
                symbol: Symbol::new(&format!("T{i:02}")),
                price: Money(1_00),
                weight: w,
                minimum: Money::ZERO,
                rounding: 0.0,
            })
            .collect();
        let alloc = allocate(amount, &tickers, 4096);
        prop_assert_eq!(alloc.residual, Money::ZERO);
        let weight_sum: f64 = weights.iter().sum();
        let tolerance = tickers.len() as i64;
        for (ticker, &value) in tickers.iter().zip(&alloc.values) {
            let ideal = amount.as_f64() * ticker.weight / weight_sum;
            prop_assert!(
                (value.as_f64() - ideal).abs() <= tolerance as f64,
                "{}: {} vs ideal {}",
                ticker.symbol, value, ideal
            );
        }
    }

    /// Reordering a leaf's tickers never changes what each symbol gets.
    #[test]
    fn leaf_allocation_is_order_independent(
        amount in amount_strategy(),
        tickers in leaf_strategy(5),
        rotation in 0usize..5,
    ) {
        let one = allocate(amount, &tickers, 4096);
        let mut rotated = tickers.clone();
        rotated.rotate_left(rotation % tickers.len().max(1));
        let two = allocate(amount, &rotated, 4096);

        for (i, ticker) in tickers.iter().enumerate() {
            let j = rotated
                .iter()
                .position(|t| t.symbol == ticker.symbol)
                .unwrap();
            prop_assert_eq!(one.values[i], two.values[j], "symbol {}", ticker.symbol);
        }
        prop_assert_eq!(one.residual, two.residual);
    }

    // ========================================================================
    // ADJUSTER INVARIANTS
    // ========================================================================

    /// The fitted hyperbola passes through all three anchors.
    #[test]
    fn adjuster_hits_anchors(
        x_high in 100.0f64..10_000.0,
        y_high in 0.2f64..0.6,
        increase_at_zero in 0.05f64..0.3,
        bear_fraction in 0.3f64..0.9,
    ) {
        let y_bear = y_high + increase_at_zero * bear_fraction;
        let y_zero = y_high + increase_at_zero;
        let adjuster = HyperbolicAdjuster::new(x_high, y_high, y_bear, y_zero);
        prop_assert!((adjuster.value_at(x_high) - y_high).abs() < 1e-9);
        prop_assert!((adjuster.value_at(0.8 * x_high) - y_bear).abs() < 1e-9);
        prop_assert!((adjuster.value_at(0.0) - y_zero).abs() < 1e-9);
    }

    /// With sane parameters the curve decreases across the market range.
    #[test]
    fn adjuster_monotone_for_sane_parameters(
        x_high in 100.0f64..10_000.0,
        y_high in 0.2f64..0.6,
        increase_at_zero in 0.05f64..0.3,
        bear_fraction in 0.4f64..0.75,
    ) {
        let y_bear = y_high + increase_at_zero * bear_fraction;
        let y_zero = y_high + increase_at_zero;
        let adjuster = HyperbolicAdjuster::new(x_high, y_high, y_bear, y_zero);
        prop_assert!(adjuster.is_monotone_decreasing());
        let mut last = adjuster.value_at(0.0);
        for step in 1..=50 {
            let x = x_high * step as f64 / 50.0;
            let y = adjuster.value_at(x);
            prop_assert!(y <= last + 1e-12, "curve increased at x={x}");
            last = y;
        }
    }

    // ========================================================================
    // ENGINE INVARIANTS
    // ========================================================================

    /// Account-level conservation with a money fund present: everything is
    /// placed, and proposed plus residual equals the rebalanceable total.
    #[test]
    fn account_conservation(
        stock_value in amount_strategy(),
        bond_value in amount_strategy(),
        cash_value in amount_strategy(),
        stock_weight in 1.0f64..100.0,
        bond_weight in 1.0f64..100.0,
        cash_weight in 1.0f64..100.0,
    ) {
        let engine = test_engine();
        let weights = Level1Weights::new(stock_weight, bond_weight, cash_weight, 0.0);
        let portfolio = test_portfolio(
            weights,
            vec![test_account(
                weights,
                vec![
                    Holding::from_value(Symbol::new("VTSAX"), Money(100_00), stock_value),
                    Holding::from_value(Symbol::new("VBSP"), Money(10_00), bond_value),
                    Holding::from_value(Symbol::new("MM"), Money(1_00), cash_value),
                ],
            )],
        );
        let out = engine.rebalance_portfolio(&portfolio);
        let account = &out.accounts[0];
        let placed: Money = account.proposed.iter().map(|&(_, v)| v).sum();
        prop_assert_eq!(placed + account.residual, account.rebalanceable);
        prop_assert!(account.residual.is_negligible());
    }

    /// A withheld holding (weight 0) never receives value.
    #[test]
    fn withheld_holding_gets_nothing(
        value_a in amount_strategy(),
        value_b in amount_strategy(),
    ) {
        let engine = test_engine();
        let weights = Level1Weights::new(0.0, 0.0, 100.0, 0.0);
        let portfolio = test_portfolio(
            weights,
            vec![test_account(
                weights,
                vec![
                    Holding::from_value(Symbol::new("MM"), Money(1_00), value_a).with_weight(0.0),
                    Holding::from_value(Symbol::new("CASHX"), Money(1_00), value_b),
                ],
            )],
        );
        let out = engine.rebalance_portfolio(&portfolio);
        prop_assert_eq!(
            out.accounts[0].proposed_for(Symbol::new("MM")),
            Some(Money::ZERO)
        );
    }

    /// Closure on a single-account portfolio reproduces the portfolio's
    /// level-1 fractions.
    #[test]
    fn closure_single_account_matches_fractions(
        total in (10_000_00i64..=10_000_000).prop_map(Money),
        stock_weight in 1.0f64..100.0,
        bond_weight in 1.0f64..100.0,
    ) {
        let engine = test_engine();
        let weights = Level1Weights::new(stock_weight, bond_weight, 0.0, 0.0);
        // The account's own weights disagree on purpose; closure wins.
        let account_weights = Level1Weights::new(50.0, 50.0, 0.0, 0.0);
        let portfolio = test_portfolio(
            weights,
            vec![test_account(
                account_weights,
                vec![
                    Holding::from_value(Symbol::new("VTSAX"), Money(100_00), total),
                    Holding::from_value(Symbol::new("VBSP"), Money(10_00), Money::ZERO),
                ],
            )],
        );
        let out = engine.rebalance_portfolio(&portfolio);
        let account = &out.accounts[0];
        let stock = account.proposed_for(Symbol::new("VTSAX")).unwrap();
        let expected = total.as_f64() * stock_weight / (stock_weight + bond_weight);
        prop_assert!(
            (stock.as_f64() - expected).abs() <= 1.0,
            "stock {} vs expected {}",
            stock,
            expected
        );
        prop_assert!(account.residual.is_negligible());
    }
}

// === Helpers ===

fn codes(s: &str) -> Vec<Subcode> {
    s.chars()
        .filter_map(|c| Subcode::from_char(c).unwrap())
        .collect()
}

fn test_engine() -> Engine {
    let config = EngineConfig::new(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
    Engine::new(
        config,
        vec![
            Ticker::new(
                Symbol::new("VTSAX"),
                TickerKind::FundRebalanceable,
                &codes("SDLW"),
            ),
            Ticker::new(
                Symbol::new("VBSP"),
                TickerKind::FundRebalanceable,
                &codes("BE"),
            ),
            Ticker::new(
                Symbol::new("MM"),
                TickerKind::FundRebalanceable,
                &codes("CU"),
            ),
            Ticker::new(
                Symbol::new("CASHX"),
                TickerKind::FundRebalanceable,
                &codes("CU"),
            ),
        ],
    )
    .unwrap()
}

fn test_account(weights: Level1Weights, holdings: Vec<Holding>) -> Account {
    Account::new(AccountKey::new("vanguard", 1), 0, TaxType::Taxable, weights)
        .with_holdings(holdings)
}

fn test_portfolio(weights: Level1Weights, accounts: Vec<Account>) -> Portfolio {
    Portfolio::new(
        "prop",
        FilingStatus::Single,
        NaiveDate::from_ymd_opt(1962, 4, 18).unwrap(),
        NaiveDate::from_ymd_opt(2052, 4, 18).unwrap(),
        weights,
    )
    .with_accounts(accounts)
}
