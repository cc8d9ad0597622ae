//! Leaf-level ticker set allocation.
//!
//! A leaf holds a set of tickers, each with a holding-weight, a minimum
//! investment, and a preferred share-rounding step. The allocator searches
//! subsets of the set for an allocation that sums exactly to the received
//! amount, honours every per-ticker constraint, and minimises the weighted
//! squared deviation from the ideal weight-proportional split. Within a
//! subset, one flexible ticker (no rounding step, no positive minimum)
//! soaks up whatever the snapping of its partners left over.
//!
//! Enumeration visits the full set first (the ideal-proportional
//! candidate), then subsets by increasing size. The `subset_cap` budget
//! stops the search; once it is hit, a zero-residual best-seen is returned
//! immediately, otherwise the remaining search is restricted to subsets of
//! at most two tickers, which has quadratic cost and terminates
//! predictably.
//!
//! Tie-breaks are strict so that results are reproducible regardless of
//! ticker order or parallel evaluation: zero residual first, then smaller
//! |residual|, then smaller deviation, then smaller subset, then
//! lexicographically smaller sorted symbol list.

use crate::types::{Money, Symbol};

/// One ticker participating in a leaf allocation.
#[derive(Debug, Clone)]
pub struct LeafTicker {
    pub symbol: Symbol,
    pub price: Money,
    /// Holding-weight; callers only pass tickers with weight > 0.
    pub weight: f64,
    /// Minimum investment. Negative values are credit limits.
    pub minimum: Money,
    /// Preferred share-quantity step; 0 permits fractional shares.
    pub rounding: f64,
}

impl LeafTicker {
    /// True if the ticker can take an arbitrary amount on top of any
    /// allocation (no rounding step, no positive minimum).
    pub fn is_absorber(&self) -> bool {
        self.rounding == 0.0 && self.minimum <= Money::ZERO && self.weight > 0.0
    }
}

/// Outcome of allocating one amount across one leaf's tickers.
#[derive(Debug, Clone)]
pub struct LeafAllocation {
    /// Proposed value per ticker, aligned with the input slice. Excluded
    /// tickers hold zero.
    pub values: Vec<Money>,
    /// Amount minus the sum of proposed values.
    pub residual: Money,
    /// Weighted squared deviation from the ideal proportional allocation.
    pub deviation: f64,
    /// Subsets examined by the search.
    pub examined: u32,
    /// True if the subset budget stopped the full search.
    pub exhausted: bool,
}

impl LeafAllocation {
    /// True if the search could not place anything at all.
    pub fn placed_nothing(&self) -> bool {
        self.values.iter().all(|v| v.is_zero())
    }
}

/// Allocate `amount` across the leaf's tickers.
///
/// Tickers with holding-weight 0 must be filtered out by the caller; an
/// empty slice returns the whole amount as residual.
pub fn allocate(amount: Money, tickers: &[LeafTicker], subset_cap: u32) -> LeafAllocation {
    let n = tickers.len();
    if n == 0 {
        return LeafAllocation {
            values: Vec::new(),
            residual: amount,
            deviation: 0.0,
            examined: 0,
            exhausted: false,
        };
    }
    debug_assert!(
        tickers.iter().all(|t| t.weight > 0.0),
        "withheld tickers must not reach the allocator"
    );

    let amount_f = amount.as_f64();
    let weight_sum: f64 = tickers.iter().map(|t| t.weight).sum();
    let ideal_full: Vec<f64> = tickers
        .iter()
        .map(|t| amount_f * t.weight / weight_sum)
        .collect();

    let (best, examined, exhausted) = search(amount, tickers, &ideal_full, subset_cap);

    match best {
        Some(candidate) => LeafAllocation {
            values: candidate.values,
            residual: candidate.residual,
            deviation: candidate.deviation,
            examined,
            exhausted,
        },
        None => LeafAllocation {
            values: vec![Money::ZERO; n],
            residual: amount,
            deviation: ideal_full.iter().zip(tickers).map(|(v, t)| t.weight * v * v).sum(),
            examined,
            exhausted,
        },
    }
}

// === Candidate evaluation ===

#[derive(Debug, Clone)]
struct Candidate {
    values: Vec<Money>,
    residual: Money,
    deviation: f64,
    size: u32,
    /// Sorted symbols of the subset, for the final tie-break.
    key: Vec<Symbol>,
}

fn evaluate(amount: Money, tickers: &[LeafTicker], ideal_full: &[f64], mask: u64) -> Candidate {
    let amount_f = amount.as_f64();
    let subset_weight: f64 = tickers
        .iter()
        .enumerate()
        .filter(|&(i, _)| mask & (1 << i) != 0)
        .map(|(_, t)| t.weight)
        .sum();

    let mut values = vec![Money::ZERO; tickers.len()];
    let mut placed = Money::ZERO;
    for (i, ticker) in tickers.iter().enumerate() {
        if mask & (1 << i) == 0 {
            continue;
        }
        let ideal = amount_f * ticker.weight / subset_weight;
        let v = snap(ticker, ideal);
        placed += v;
        values[i] = v;
    }

    // A flexible ticker in the subset soaks up whatever the snapping left
    // over, bounded below by its credit limit.
    if placed != amount {
        let absorber = tickers
            .iter()
            .enumerate()
            .filter(|&(i, t)| mask & (1 << i) != 0 && t.rounding == 0.0 && t.minimum <= Money::ZERO)
            .min_by_key(|(_, t)| t.symbol)
            .map(|(i, _)| i);
        if let Some(i) = absorber {
            let limit = tickers[i].minimum.min(Money::ZERO);
            let target = (values[i] + (amount - placed)).max(limit);
            placed += target - values[i];
            values[i] = target;
        }
    }

    let deviation = tickers
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let d = values[i].as_f64() - ideal_full[i];
            t.weight * d * d
        })
        .sum();

    let mut key: Vec<Symbol> = tickers
        .iter()
        .enumerate()
        .filter(|&(i, _)| mask & (1 << i) != 0)
        .map(|(_, t)| t.symbol)
        .collect();
    key.sort_unstable();

    Candidate {
        values,
        residual: amount - placed,
        deviation,
        size: mask.count_ones(),
        key,
    }
}

/// Snap an ideal value to the nearest feasible value for the ticker.
///
/// Feasible values are 0 and, for positive minimums, values of at least the
/// minimum; rounded tickers are additionally restricted to whole multiples
/// of the share step. Negative minimums act as credit limits bounding how
/// far below zero a value may go.
fn snap(ticker: &LeafTicker, ideal: f64) -> Money {
    let min_f = ticker.minimum.as_f64();

    if ticker.rounding > 0.0 && ticker.price > Money::ZERO {
        let step = ticker.rounding * ticker.price.as_f64();
        let mut v = (ideal / step).round().max(0.0) * step;
        if ticker.minimum > Money::ZERO && v != 0.0 && v < min_f {
            // Nearest of dropping the ticker or funding it at the smallest
            // step meeting the minimum; ties fund.
            let up = (min_f / step).ceil() * step;
            v = if ideal.abs() < (up - ideal).abs() { 0.0 } else { up };
        }
        return Money::from_f64(v);
    }

    let v = if ticker.minimum > Money::ZERO && ideal < min_f {
        if ideal.abs() < min_f - ideal {
            0.0
        } else {
            min_f
        }
    } else if ideal < 0.0 {
        ideal.max(min_f.min(0.0))
    } else {
        ideal
    };
    Money::from_f64(v)
}

/// Strict total order: `true` if `a` beats `b`.
fn beats(a: &Candidate, b: &Candidate) -> bool {
    let a_zero = a.residual.is_negligible();
    let b_zero = b.residual.is_negligible();
    if a_zero != b_zero {
        return a_zero;
    }
    if !a_zero {
        match a.residual.abs().cmp(&b.residual.abs()) {
            std::cmp::Ordering::Less => return true,
            std::cmp::Ordering::Greater => return false,
            std::cmp::Ordering::Equal => {}
        }
    }
    if a.deviation != b.deviation {
        return a.deviation < b.deviation;
    }
    if a.size != b.size {
        return a.size < b.size;
    }
    a.key < b.key
}

// === Subset enumeration ===

/// Yields the full mask first, then non-empty proper subsets by increasing
/// size (Gosper's hack within each size).
struct SubsetMasks {
    n: u32,
    full: u64,
    size: u32,
    current: u64,
    emitted_full: bool,
}

impl SubsetMasks {
    fn new(n: usize) -> Self {
        let n = n as u32;
        SubsetMasks {
            n,
            full: if n == 64 { u64::MAX } else { (1u64 << n) - 1 },
            size: 0,
            current: 0,
            emitted_full: false,
        }
    }
}

impl Iterator for SubsetMasks {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if !self.emitted_full {
            self.emitted_full = true;
            return Some(self.full);
        }
        loop {
            if self.current == 0 {
                // Advance to the next size tier.
                self.size += 1;
                if self.size >= self.n {
                    return None;
                }
                self.current = (1u64 << self.size) - 1;
                return Some(self.current);
            }
            // Gosper's hack: next mask with the same popcount.
            let c = self.current & self.current.wrapping_neg();
            let r = self.current + c;
            let next = (((r ^ self.current) >> 2) / c) | r;
            if next > self.full {
                self.current = 0;
                continue;
            }
            self.current = next;
            return Some(next);
        }
    }
}

// === Search driver ===

#[cfg(not(feature = "parallel"))]
fn search(
    amount: Money,
    tickers: &[LeafTicker],
    ideal_full: &[f64],
    subset_cap: u32,
) -> (Option<Candidate>, u32, bool) {
    let full = SubsetMasks::new(tickers.len()).next().unwrap();
    let mut best: Option<Candidate> = None;
    let mut examined = 0u32;
    let mut exhausted = false;
    let mut restricted = false;

    for mask in SubsetMasks::new(tickers.len()) {
        if !restricted && examined >= subset_cap {
            exhausted = true;
            if best.as_ref().is_some_and(|b| b.residual.is_negligible()) {
                break;
            }
            // Keep searching, but only tiny subsets.
            restricted = true;
        }
        if restricted && mask.count_ones() > 2 {
            if mask == full {
                continue;
            }
            // Sizes ascend past 2; nothing small remains.
            break;
        }
        let candidate = evaluate(amount, tickers, ideal_full, mask);
        examined += 1;
        if best.as_ref().map_or(true, |b| beats(&candidate, b)) {
            best = Some(candidate);
        }
    }

    (best, examined, exhausted)
}

#[cfg(feature = "parallel")]
fn search(
    amount: Money,
    tickers: &[LeafTicker],
    ideal_full: &[f64],
    subset_cap: u32,
) -> (Option<Candidate>, u32, bool) {
    use rayon::prelude::*;

    // The sequential driver examines exactly the first `subset_cap` masks.
    // When none of those hits zero residual, it also examines every
    // remaining mask of size <= 2. Reproduce that candidate set and reduce
    // under the same total order.
    let head: Vec<u64> = SubsetMasks::new(tickers.len())
        .take(subset_cap as usize)
        .collect();
    let total = if tickers.len() >= 64 {
        u64::MAX
    } else {
        (1u64 << tickers.len()) - 1
    };
    let exhausted = (head.len() as u64) < total;

    let pick = |a: Candidate, b: Candidate| if beats(&b, &a) { b } else { a };

    let best_head = head
        .par_iter()
        .map(|&mask| evaluate(amount, tickers, ideal_full, mask))
        .reduce_with(pick);
    let mut examined = head.len() as u32;

    let have_zero = best_head
        .as_ref()
        .is_some_and(|b| b.residual.is_negligible());
    if !exhausted || have_zero {
        return (best_head, examined, exhausted);
    }

    // Position 0 is the full mask; skipping at least one keeps the
    // take_while on the ascending-size suffix.
    let tail_skip = (subset_cap as usize).max(1);
    let tail: Vec<u64> = SubsetMasks::new(tickers.len())
        .skip(tail_skip)
        .take_while(|m| m.count_ones() <= 2)
        .collect();
    examined += tail.len() as u32;
    let best_tail = tail
        .par_iter()
        .map(|&mask| evaluate(amount, tickers, ideal_full, mask))
        .reduce_with(pick);

    let best = match (best_head, best_tail) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, b) => a.or(b),
    };
    (best, examined, exhausted)
}
