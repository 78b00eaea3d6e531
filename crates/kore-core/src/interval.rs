//! Inclusive integer intervals, used both for buffer bounds and for quantized
//! clamp ranges.

use std::fmt;
use std::ops::{Add, AddAssign};

/// Floor division (rounds toward negative infinity).
pub fn floor_div(a: i32, b: i32) -> i32 {
    debug_assert!(b > 0);
    let q = a / b;
    if (a % b != 0) && (a < 0) {
        q - 1
    } else {
        q
    }
}

/// Ceiling division (rounds toward positive infinity).
pub fn ceil_div(a: i32, b: i32) -> i32 {
    debug_assert!(b > 0);
    -floor_div(-a, b)
}

/// Round `x` up to the next multiple of `align`.
pub fn align_up(x: i32, align: i32) -> i32 {
    ceil_div(x, align) * align
}

/// An inclusive `[min, max]` range. Empty when `max < min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Interval {
    pub min: i32,
    pub max: i32,
}

impl Interval {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// The single point `[x, x]`.
    pub fn point(x: i32) -> Self {
        Self { min: x, max: x }
    }

    /// `[0, extent - 1]`.
    pub fn from_extent(extent: i32) -> Self {
        Self { min: 0, max: extent - 1 }
    }

    pub fn empty() -> Self {
        Self { min: 0, max: -1 }
    }

    pub fn extent(&self) -> i32 {
        self.max - self.min + 1
    }

    pub fn is_empty(&self) -> bool {
        self.max < self.min
    }

    pub fn contains(&self, other: &Interval) -> bool {
        other.is_empty() || (self.min <= other.min && other.max <= self.max)
    }

    pub fn contains_point(&self, x: i32) -> bool {
        self.min <= x && x <= self.max
    }

    pub fn intersect(&self, other: &Interval) -> Interval {
        Interval::new(self.min.max(other.min), self.max.min(other.max))
    }

    /// Smallest interval containing both.
    pub fn union(&self, other: &Interval) -> Interval {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Interval::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Widen outward so both ends sit on multiples of `alignment`.
    pub fn aligned(&self, alignment: i32) -> Interval {
        if alignment <= 1 || self.is_empty() {
            return *self;
        }
        let min = floor_div(self.min, alignment) * alignment;
        let max = align_up(self.max + 1, alignment) - 1;
        Interval::new(min, max)
    }

    /// Clamp `x` into the interval.
    pub fn clamp(&self, x: i32) -> i32 {
        x.max(self.min).min(self.max)
    }
}

impl Add<i32> for Interval {
    type Output = Interval;

    fn add(self, delta: i32) -> Interval {
        Interval::new(self.min + delta, self.max + delta)
    }
}

impl AddAssign<i32> for Interval {
    fn add_assign(&mut self, delta: i32) {
        self.min += delta;
        self.max += delta;
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}
