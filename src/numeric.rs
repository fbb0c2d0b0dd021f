//! Arithmetic on pipelines of plain numbers.

use std::ops::Add;

use serde::{Deserialize, Serialize};

use crate::collective;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::transport::Data;

/// The number types `sum()`, `average()` and `summary()` work with. Integer sums wrap around
/// on overflow.
pub trait Numeric: Data + Copy + PartialOrd + Add<Output = Self> {
    const ZERO: Self;
    fn to_f64(self) -> f64;
    /// `self + other`, wrapping for integers.
    fn sum_with(self, other: Self) -> Self;
}

macro_rules! numeric {
    (int: $($t:ty),*; float: $($f:ty),*) => {
        $(
            impl Numeric for $t {
                const ZERO: $t = 0;
                fn to_f64(self) -> f64 {
                    self as f64
                }
                fn sum_with(self, other: $t) -> $t {
                    self.wrapping_add(other)
                }
            }
        )*
        $(
            impl Numeric for $f {
                const ZERO: $f = 0.0;
                fn to_f64(self) -> f64 {
                    self as f64
                }
                fn sum_with(self, other: $f) -> $f {
                    self + other
                }
            }
        )*
    }
}

numeric!(int: i32, i64, u32, u64, usize; float: f32, f64);

/// Count, sum and extremes of a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary<T> {
    pub count: u64,
    pub sum: T,
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T: Numeric> Summary<T> {
    pub fn new() -> Summary<T> {
        Summary {
            count: 0,
            sum: T::ZERO,
            min: None,
            max: None,
        }
    }

    pub fn accept(mut self, e: T) -> Summary<T> {
        self.count += 1;
        self.sum = self.sum.sum_with(e);
        self.min = Some(match self.min {
            Some(m) if m <= e => m,
            _ => e,
        });
        self.max = Some(match self.max {
            Some(m) if m >= e => m,
            _ => e,
        });
        self
    }

    pub fn merge(self, other: Summary<T>) -> Summary<T> {
        let min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(if b < a { b } else { a }),
            (a, b) => a.or(b),
        };
        let max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(if b > a { b } else { a }),
            (a, b) => a.or(b),
        };
        Summary {
            count: self.count + other.count,
            sum: self.sum.sum_with(other.sum),
            min: min,
            max: max,
        }
    }

    /// None if nothing was counted.
    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum.to_f64() / self.count as f64)
        }
    }
}

impl<T: Numeric> Default for Summary<T> {
    fn default() -> Summary<T> {
        Summary::new()
    }
}

impl<T: Numeric> Pipeline<T> {
    pub fn local_sum(self) -> T {
        self.local_fold(T::ZERO, T::sum_with)
    }

    pub fn sum(self) -> Result<T> {
        self.fold(T::ZERO, T::sum_with, T::sum_with)
    }

    pub fn summary(self) -> Result<Summary<T>> {
        let (cluster, group) = (self.cluster().clone(), self.group().clone());
        let local = self.local_fold(Summary::new(), Summary::accept);
        collective::reduce(&cluster, &group, local, Summary::merge)
    }

    /// Mean over the whole dataset; None if it is empty.
    pub fn average(self) -> Result<Option<f64>> {
        Ok(self.summary()?.average())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Parameters;
    use crate::transport::local::run_local;

    #[test]
    fn test_summary_merge() {
        let a = vec![3, 9, 1].into_iter().fold(Summary::new(), Summary::accept);
        let b = Summary::<i64>::new();
        let m = a.merge(b);
        assert_eq!(m, Summary { count: 3, sum: 13, min: Some(1), max: Some(9) });
        assert_eq!(b.merge(a), m);
        assert_eq!(b.average(), None);
    }

    #[test]
    fn test_global_numbers() {
        let got = run_local(3, Parameters::new().set_workers(1), |c| {
            let local: Vec<f64> = (0..c.rank() + 1).map(|i| i as f64).collect();
            let sum = Pipeline::new(&c, local.clone()).sum()?;
            let avg = Pipeline::new(&c, local.clone()).average()?;
            let s = Pipeline::new(&c, local.clone()).summary()?;
            let ls = Pipeline::new(&c, local).local_sum();
            Ok((sum, avg, s.count, s.max, ls))
        })
        .unwrap();
        // 0 | 0 1 | 0 1 2
        assert_eq!(got[0], (4.0, Some(4.0 / 6.0), 6, Some(2.0), 0.0));
        assert_eq!(got[2].4, 3.0);
    }

    #[test]
    fn test_integer_sum_wraps() {
        let got = run_local(2, Parameters::new().set_workers(1), |c| {
            let local = vec![i32::MAX, c.rank() as i32];
            let sum = Pipeline::new(&c, local.clone()).sum()?;
            let s = Pipeline::new(&c, local).summary()?;
            Ok((sum, s.sum, s.max))
        })
        .unwrap();
        // 2 * MAX + 1 is u32::MAX, i.e. -1 after wrapping.
        assert!(got.iter().all(|r| *r == (-1, -1, Some(i32::MAX))));
    }
}
