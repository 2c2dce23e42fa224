use ndarray::Array1;

use crate::error::{Error, Result};

/// Restricted (natural) cubic spline basis over log time, in the truncated
/// power form used by flexible parametric survival models:
/// `[1, u, v_1(u), ..., v_m(u)]` with
/// `v_j(u) = (u-k_j)+^3 - l_j (u-k_min)+^3 - (1-l_j)(u-k_max)+^3`,
/// `l_j = (k_max-k_j)/(k_max-k_min)`.
/// The cubic and quadratic terms cancel outside the boundary knots, so the
/// curve is linear in the tails.
#[derive(Debug, Clone, PartialEq)]
pub struct SplineBasis {
    boundary: (f64, f64),
    interior: Vec<f64>,
    constant_only: bool,
}

impl SplineBasis {
    /// basis with `df` degrees of freedom over the given observed values
    /// (event log-times): boundary knots at min/max, `df - 1` interior knots
    /// at quantiles. `df = 1` is a plain linear term.
    pub fn natural(values: &[f64], df: usize) -> Result<Self> {
        if df == 0 {
            return Err(Error::invalid_input("spline df must be at least 1"));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::invalid_input("knot source contains non-finite values"));
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite values"));

        let (min, max) = match (sorted.first(), sorted.last()) {
            (Some(&min), Some(&max)) if min < max => (min, max),
            _ => {
                return Err(Error::invalid_input(
                    "knot source needs at least two distinct values",
                ))
            }
        };

        let m = df - 1;
        let mut interior = Vec::with_capacity(m);
        for j in 1..=m {
            interior.push(quantile(&sorted, j as f64 / (m + 1) as f64));
        }

        // coincident or boundary-touching knots make the basis rank-deficient
        let mut previous = min;
        for &knot in &interior {
            if knot <= previous || knot >= max {
                return Err(Error::invalid_input(
                    "interior knots must be distinct and strictly inside the boundary",
                ));
            }
            previous = knot;
        }

        Ok(Self {
            boundary: (min, max),
            interior,
            constant_only: false,
        })
    }

    /// explicit interior knots instead of quantile placement
    pub fn with_knots(boundary: (f64, f64), interior: Vec<f64>) -> Result<Self> {
        if !(boundary.0.is_finite() && boundary.1.is_finite()) || boundary.0 >= boundary.1 {
            return Err(Error::invalid_input("boundary knots must be finite and ordered"));
        }
        let basis = Self {
            boundary,
            interior,
            constant_only: false,
        };
        let mut previous = boundary.0;
        for &knot in &basis.interior {
            if !knot.is_finite() || knot <= previous || knot >= boundary.1 {
                return Err(Error::invalid_input(
                    "interior knots must be finite, increasing and inside the boundary",
                ));
            }
            previous = knot;
        }
        Ok(basis)
    }

    /// degenerate single-term basis `[1]`; used for a time-constant
    /// treatment effect (tvc df = 0)
    pub fn constant() -> Self {
        Self {
            boundary: (0.0, 0.0),
            interior: Vec::new(),
            constant_only: true,
        }
    }

    pub fn n_terms(&self) -> usize {
        if self.constant_only {
            1
        } else {
            2 + self.interior.len()
        }
    }

    pub fn interior_knots(&self) -> &[f64] {
        &self.interior
    }

    pub fn boundary_knots(&self) -> (f64, f64) {
        self.boundary
    }

    /// basis values at `u`
    pub fn evaluate(&self, u: f64) -> Array1<f64> {
        let mut row = Array1::zeros(self.n_terms());
        row[0] = 1.0;
        if self.constant_only {
            return row;
        }
        row[1] = u;

        let (k_min, k_max) = self.boundary;
        let span = k_max - k_min;
        for (j, &k) in self.interior.iter().enumerate() {
            let lambda = (k_max - k) / span;
            row[2 + j] = plus(u - k).powi(3)
                - lambda * plus(u - k_min).powi(3)
                - (1.0 - lambda) * plus(u - k_max).powi(3);
        }
        row
    }

    /// first derivative of each basis term at `u`
    pub fn derivative(&self, u: f64) -> Array1<f64> {
        let mut row = Array1::zeros(self.n_terms());
        if self.constant_only {
            return row;
        }
        row[1] = 1.0;

        let (k_min, k_max) = self.boundary;
        let span = k_max - k_min;
        for (j, &k) in self.interior.iter().enumerate() {
            let lambda = (k_max - k) / span;
            row[2 + j] = 3.0
                * (plus(u - k).powi(2)
                    - lambda * plus(u - k_min).powi(2)
                    - (1.0 - lambda) * plus(u - k_max).powi(2));
        }
        row
    }
}

#[inline]
fn plus(x: f64) -> f64 {
    x.max(0.0)
}

/// linear-interpolated quantile of pre-sorted values
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let position = p * (sorted.len() - 1) as f64;
    let low = position.floor() as usize;
    let high = position.ceil() as usize;
    let weight = position - low as f64;
    sorted[low] * (1.0 - weight) + sorted[high] * weight
}
