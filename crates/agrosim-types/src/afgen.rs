//! Piecewise-linear interpolation tables (AFGEN).
//!
//! Crop and soil parameters frequently describe a response as a table of
//! `(x, y)` pairs. Tables are stored flat as `[x1, y1, x2, y2, ...]` in
//! parameter files. Lookups interpolate linearly between the surrounding
//! points and clamp to the first or last `y` outside the `x` range.

use serde::{Deserialize, Serialize};

/// Errors raised when constructing an interpolation table.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AfgenError {
    /// The flat list was empty or had an odd number of values.
    #[error("interpolation table needs an even, non-zero number of values, got {len}")]
    OddLength {
        /// Number of values supplied.
        len: usize,
    },

    /// The `x` values were not strictly increasing.
    #[error("interpolation table x values must be strictly increasing (at pair {position})")]
    NotAscending {
        /// Zero-based position of the offending pair.
        position: usize,
    },

    /// The `y` values are not strictly monotonic, so the table cannot be inverted.
    #[error("interpolation table is not strictly monotonic in y and cannot be inverted")]
    NotInvertible,

    /// An age-indexed table set contained no tables.
    #[error("age-indexed table set is empty")]
    EmptyTableSet,
}

/// A piecewise-linear interpolation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Afgen {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl Afgen {
    /// Build a table from a flat `[x1, y1, x2, y2, ...]` list.
    ///
    /// Trailing `(0, 0)` pairs after an increasing sequence are treated as
    /// padding and dropped, which is how fixed-width legacy tables are
    /// stored.
    pub fn new(flat: &[f64]) -> Result<Self, AfgenError> {
        if flat.is_empty() || flat.len() % 2 != 0 {
            return Err(AfgenError::OddLength { len: flat.len() });
        }

        let mut xs = Vec::with_capacity(flat.len() / 2);
        let mut ys = Vec::with_capacity(flat.len() / 2);
        for (position, pair) in flat.chunks_exact(2).enumerate() {
            let [x, y] = pair else {
                return Err(AfgenError::OddLength { len: flat.len() });
            };
            if let Some(&prev) = xs.last() {
                if *x <= prev {
                    if x.abs() < f64::EPSILON && y.abs() < f64::EPSILON {
                        break;
                    }
                    return Err(AfgenError::NotAscending { position });
                }
            }
            xs.push(*x);
            ys.push(*y);
        }

        Ok(Self { xs, ys })
    }

    /// Interpolate the table at `x`.
    pub fn eval(&self, x: f64) -> f64 {
        let (Some(&x_first), Some(&y_first)) = (self.xs.first(), self.ys.first()) else {
            return 0.0;
        };
        if x <= x_first {
            return y_first;
        }

        for (xw, yw) in self.xs.windows(2).zip(self.ys.windows(2)) {
            if let ([x0, x1], [y0, y1]) = (xw, yw) {
                if x <= *x1 {
                    let slope = (y1 - y0) / (x1 - x0);
                    return slope.mul_add(x - x0, *y0);
                }
            }
        }

        self.ys.last().copied().unwrap_or(y_first)
    }

    /// Build the inverse table (`y` becomes the lookup axis).
    ///
    /// Fails unless `y` is strictly monotonic. Decreasing tables are
    /// reversed so the new `x` axis ascends.
    pub fn inverted(&self) -> Result<Self, AfgenError> {
        let ascending = self.ys.windows(2).all(|w| matches!(w, [a, b] if b > a));
        let descending = self.ys.windows(2).all(|w| matches!(w, [a, b] if b < a));

        let mut pairs: Vec<(f64, f64)> =
            self.ys.iter().copied().zip(self.xs.iter().copied()).collect();
        if descending && !ascending {
            pairs.reverse();
        } else if !ascending {
            return Err(AfgenError::NotInvertible);
        }

        Ok(Self {
            xs: pairs.iter().map(|(x, _)| *x).collect(),
            ys: pairs.iter().map(|(_, y)| *y).collect(),
        })
    }

    /// Lookup axis values.
    pub fn xs(&self) -> &[f64] {
        &self.xs
    }

    /// Table values.
    pub fn ys(&self) -> &[f64] {
        &self.ys
    }

    /// Number of interpolation points.
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    /// Whether the table has no points (never true for a constructed table).
    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }
}

impl TryFrom<Vec<f64>> for Afgen {
    type Error = AfgenError;

    fn try_from(flat: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(&flat)
    }
}

impl From<Afgen> for Vec<f64> {
    fn from(table: Afgen) -> Self {
        table
            .xs
            .iter()
            .zip(table.ys.iter())
            .flat_map(|(x, y)| [*x, *y])
            .collect()
    }
}

/// A set of interpolation tables selected by crop age in years.
///
/// Perennial crops carry one table per age class. Ages beyond the last
/// class reuse the last table.
#[derive(Debug, Clone, PartialEq)]
pub struct AgeTables {
    tables: Vec<Afgen>,
}

impl AgeTables {
    /// Build from one flat list per age class.
    pub fn new(rows: &[Vec<f64>]) -> Result<Self, AfgenError> {
        if rows.is_empty() {
            return Err(AfgenError::EmptyTableSet);
        }
        let tables = rows
            .iter()
            .map(|row| Afgen::new(row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tables })
    }

    /// Table for the given age class.
    pub fn table(&self, age: u32) -> Option<&Afgen> {
        let index = usize::try_from(age).unwrap_or(usize::MAX);
        self.tables.get(index).or_else(|| self.tables.last())
    }

    /// Interpolate the table for `age` at `x`.
    pub fn eval(&self, age: u32, x: f64) -> f64 {
        self.table(age).map_or(0.0, |t| t.eval(x))
    }

    /// Number of age classes.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether no age classes exist (never true for a constructed set).
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn interpolates_between_points() {
        let t = Afgen::new(&[0.0, 0.0, 10.0, 1.0, 20.0, 3.0]).unwrap();
        assert!(approx(t.eval(5.0), 0.5));
        assert!(approx(t.eval(15.0), 2.0));
        assert!(approx(t.eval(10.0), 1.0));
    }

    #[test]
    fn clamps_outside_range() {
        let t = Afgen::new(&[0.0, 2.0, 1.0, 4.0]).unwrap();
        assert!(approx(t.eval(-5.0), 2.0));
        assert!(approx(t.eval(50.0), 4.0));
    }

    #[test]
    fn single_point_table_is_constant() {
        let t = Afgen::new(&[3.0, 7.0]).unwrap();
        assert!(approx(t.eval(0.0), 7.0));
        assert!(approx(t.eval(100.0), 7.0));
    }

    #[test]
    fn trailing_zero_padding_is_dropped() {
        let t = Afgen::new(&[0.0, 1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn rejects_descending_x() {
        let err = Afgen::new(&[0.0, 1.0, 2.0, 3.0, 1.0, 5.0]).unwrap_err();
        assert_eq!(err, AfgenError::NotAscending { position: 2 });
    }

    #[test]
    fn rejects_odd_length() {
        assert!(matches!(
            Afgen::new(&[0.0, 1.0, 2.0]),
            Err(AfgenError::OddLength { len: 3 })
        ));
        assert!(Afgen::new(&[]).is_err());
    }

    #[test]
    fn inverts_decreasing_table() {
        let retention = Afgen::new(&[-1.0, 0.4, 2.0, 0.3, 4.2, 0.1]).unwrap();
        let inverse = retention.inverted().unwrap();
        assert!(approx(inverse.eval(0.3), 2.0));
        assert!(approx(inverse.eval(0.2), 3.1));
    }

    #[test]
    fn non_monotonic_table_cannot_be_inverted() {
        let t = Afgen::new(&[0.0, 1.0, 1.0, 2.0, 2.0, 1.5]).unwrap();
        assert_eq!(t.inverted().unwrap_err(), AfgenError::NotInvertible);
    }

    #[test]
    fn deserializes_from_flat_list() {
        let t: Afgen = serde_json::from_str("[0.0, 0.0, 2.0, 4.0]").unwrap();
        assert!(approx(t.eval(1.0), 2.0));
        let back: Vec<f64> = t.into();
        assert_eq!(back.len(), 4);
    }

    #[test]
    fn age_tables_reuse_last_class() {
        let set = AgeTables::new(&[vec![0.0, 1.0, 1.0, 1.0], vec![0.0, 2.0, 1.0, 2.0]]).unwrap();
        assert!(approx(set.eval(0, 0.5), 1.0));
        assert!(approx(set.eval(1, 0.5), 2.0));
        assert!(approx(set.eval(9, 0.5), 2.0));
    }

    #[test]
    fn empty_age_tables_rejected() {
        assert_eq!(AgeTables::new(&[]).unwrap_err(), AfgenError::EmptyTableSet);
    }
}
