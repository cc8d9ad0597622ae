//! Account-value synthesis.
//!
//! Accounts that state no holding value but declare a synthesizer derive
//! one before rebalancing: annuity streams are summed over the months to
//! the mortality date (optionally decayed for inflation), Social Security
//! starts no earlier than age 62, and Averaging/Negation combine the values
//! of referenced accounts. The synthesized value is opaque to the
//! rebalancer beyond its sign and magnitude.

use chrono::{Datelike, NaiveDate};

use crate::config::EngineConfig;
use crate::model::{Portfolio, SynthesizerKind};
use crate::types::Money;

/// Derive a value for one synthesizer kind. `referenced_values` carries the
/// already-resolved values of the accounts the synthesizer references (used
/// by Averaging and Negation).
pub(crate) fn synthesize(
    kind: SynthesizerKind,
    portfolio: &Portfolio,
    config: &EngineConfig,
    referenced_values: &[Money],
) -> Money {
    match kind {
        SynthesizerKind::CpiAnnuity => cpi_annuity(
            portfolio.annuity_monthly,
            config.valuation_date,
            portfolio.mortality,
        ),
        SynthesizerKind::NoCpiAnnuity => no_cpi_annuity(
            portfolio.annuity_monthly,
            config.valuation_date,
            portfolio.mortality,
            config.inflation_pct,
        ),
        SynthesizerKind::SocialSecurity => social_security(
            portfolio.social_security_monthly,
            config.valuation_date,
            portfolio.birth,
            portfolio.mortality,
        ),
        SynthesizerKind::Averaging => average(referenced_values),
        SynthesizerKind::Negation => negation(referenced_values),
    }
}

/// Whole calendar months from `from` to `to`; zero when `to` is not after
/// `from`. A partial trailing month does not count.
pub fn months_between(from: NaiveDate, to: NaiveDate) -> u32 {
    if to <= from {
        return 0;
    }
    let mut months =
        (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    if to.day() < from.day() {
        months -= 1;
    }
    months.max(0) as u32
}

/// A COLA-protected annuity is worth its monthly income times the months
/// left to the mortality date.
pub fn cpi_annuity(monthly: Money, valuation: NaiveDate, mortality: NaiveDate) -> Money {
    Money(monthly.0 * i64::from(months_between(valuation, mortality)))
}

/// An annuity without COLA decays by inflation: each year of payments is
/// discounted by a further (1 + inflation) factor, summed monthly.
pub fn no_cpi_annuity(
    monthly: Money,
    valuation: NaiveDate,
    mortality: NaiveDate,
    inflation_pct: f64,
) -> Money {
    let months = months_between(valuation, mortality);
    let annual = 1.0 + inflation_pct / 100.0;
    let mut total = 0.0;
    for m in 0..months {
        total += monthly.as_f64() * annual.powi(-((m / 12) as i32));
    }
    Money::from_f64(total)
}

/// Social Security is worth the monthly benefit over the months from the
/// later of the valuation date and the age-62 date to the mortality date.
pub fn social_security(
    monthly: Money,
    valuation: NaiveDate,
    birth: NaiveDate,
    mortality: NaiveDate,
) -> Money {
    let eligible = add_years(birth, 62);
    let start = eligible.max(valuation);
    Money(monthly.0 * i64::from(months_between(start, mortality)))
}

/// Mean of the referenced account values.
pub fn average(values: &[Money]) -> Money {
    if values.is_empty() {
        return Money::ZERO;
    }
    let sum: Money = values.iter().copied().sum();
    Money::from_f64(sum.as_f64() / values.len() as f64)
}

/// Negated sum of the referenced account values. Combined with an
/// Averaging sibling this turns a set of negative estimates into a single
/// positive average.
pub fn negation(values: &[Money]) -> Money {
    -values.iter().copied().sum::<Money>()
}

fn add_years(date: NaiveDate, years: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year() + years, date.month(), date.day())
        // Feb 29 birthdays land on Feb 28.
        .unwrap_or_else(|| {
            NaiveDate::from_ymd_opt(date.year() + years, date.month(), 28)
                .expect("day 28 exists in every month")
        })
}
