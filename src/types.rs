//! Core types: Money, Symbol.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// A currency amount in smallest units (e.g., cents).
///
/// `Money(10050)` represents $100.50 if the minor unit is $0.01.
/// Fixed-point storage avoids floating-point drift in sums; conversions
/// from `f64` use banker's rounding at the minor-unit boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Money(pub i64);

impl Money {
    pub const ZERO: Money = Money(0);
    pub const MAX: Money = Money(i64::MAX);
    pub const MIN: Money = Money(i64::MIN);

    /// One minor unit, the engine-wide comparison tolerance.
    pub const MINOR_UNIT: Money = Money(1);

    /// Convert from a float amount of minor units, rounding half to even.
    ///
    /// ```
    /// use canopy::Money;
    ///
    /// assert_eq!(Money::from_f64(250.5), Money(250));
    /// assert_eq!(Money::from_f64(251.5), Money(252));
    /// assert_eq!(Money::from_f64(-250.5), Money(-250));
    /// ```
    pub fn from_f64(units: f64) -> Money {
        let floor = units.floor();
        let frac = units - floor;
        let n = if (frac - 0.5).abs() < f64::EPSILON {
            // Exactly halfway: pick the even neighbour.
            let lo = floor as i64;
            if lo % 2 == 0 { lo } else { lo + 1 }
        } else {
            units.round() as i64
        };
        Money(n)
    }

    /// The amount as a float count of minor units.
    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }

    /// Magnitude.
    #[inline]
    pub fn abs(self) -> Money {
        Money(self.0.abs())
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// True if the magnitude is within the minor-unit tolerance.
    #[inline]
    pub fn is_negligible(self) -> bool {
        self.0.abs() <= Money::MINOR_UNIT.0
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Money;
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        Money(iter.map(|m| m.0).sum())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Display as dollars.cents assuming cents
        let dollars = self.0 / 100;
        let cents = (self.0 % 100).abs();
        if self.0 < 0 {
            write!(f, "-${}.{:02}", dollars.abs(), cents)
        } else {
            write!(f, "${}.{:02}", dollars, cents)
        }
    }
}

/// A ticker symbol: one to eight bytes of uppercase ASCII letters, digits,
/// dots, or dashes (share classes like "BRK.B" included).
///
/// Stored inline, NUL-padded, so symbols are `Copy`, hash without
/// allocation, and compare in the same order as the strings they hold. The
/// allocator's final tie-break sorts on this ordering, so it must agree
/// with string ordering; NUL padding keeps a short symbol ahead of any
/// extension of it.
///
/// ```
/// use canopy::Symbol;
///
/// let sym = Symbol::new("VTSAX");
/// assert_eq!(sym.as_str(), "VTSAX");
/// assert!(Symbol::new("MM") < Symbol::new("VBSP"));
/// ```
const SYMBOL_CAPACITY: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol {
    bytes: [u8; SYMBOL_CAPACITY],
}

impl Symbol {
    /// Longest representable symbol, in bytes.
    pub const CAPACITY: usize = SYMBOL_CAPACITY;

    /// Parse a symbol. Panics on anything [`try_new`](Self::try_new)
    /// rejects.
    pub fn new(s: &str) -> Self {
        Self::try_new(s).expect("not a valid ticker symbol")
    }

    /// Parse a symbol. Rejects the empty string, anything longer than
    /// [`CAPACITY`](Self::CAPACITY) bytes, and characters outside the
    /// ticker alphabet.
    pub fn try_new(s: &str) -> Option<Self> {
        if s.is_empty() || s.len() > Self::CAPACITY {
            return None;
        }
        let mut bytes = [0u8; Self::CAPACITY];
        for (slot, &b) in bytes.iter_mut().zip(s.as_bytes()) {
            if !matches!(b, b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-') {
                return None;
            }
            *slot = b;
        }
        Some(Self { bytes })
    }

    fn len(&self) -> usize {
        self.bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(Self::CAPACITY)
    }

    /// The symbol as a string slice.
    pub fn as_str(&self) -> &str {
        // try_new admits only ASCII, which is always valid UTF-8.
        std::str::from_utf8(&self.bytes[..self.len()]).unwrap_or("")
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // pad() honours width/alignment flags, for columnar reports.
        f.pad(self.as_str())
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.as_str())
    }
}

impl serde::Serialize for Symbol {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Symbol {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        Symbol::try_new(&s).ok_or_else(|| D::Error::custom(format!("invalid ticker symbol {s:?}")))
    }
}
