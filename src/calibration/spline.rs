use serde::{Deserialize, Serialize};

/// Piecewise cubic fitted by the backend. Segment `i` covers `[knots[i], knots[i + 1]]`
/// and evaluates `a*dx^3 + b*dx^2 + c*dx + d` with `dx = x - knots[i]`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct SplineData {
    pub knots: Vec<f64>,
    pub coefficients: Vec<[f64; 4]>,
    #[serde(default)]
    pub n_segments: Option<usize>,
}

/// Measured points together with the spline fitted through them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct CurveData {
    pub points: Vec<[f64; 2]>,
    pub spline: SplineData,
    /// Mean squared error of the fit at the measured points.
    #[serde(default)]
    pub error: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct LimitPoints {
    pub points: Vec<[f64; 2]>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Fraction of the data range added on both sides when sampling for a plot.
const SAMPLE_PADDING: f64 = 0.1;

impl SplineData {
    pub fn is_valid(&self) -> bool {
        self.knots.len() >= 2 && self.coefficients.len() + 1 >= self.knots.len()
    }

    fn segment_for(&self, x: f64) -> usize {
        let last = self.knots.len() - 2;
        self.knots
            .windows(2)
            .position(|w| x >= w[0] && x <= w[1])
            .unwrap_or(if x < self.knots[0] { 0 } else { last })
    }

    /// Evaluates the spline at `x`. Outside the knot range the first or last segment is
    /// extrapolated. Returns `None` when the spline has fewer than two knots.
    pub fn evaluate(&self, x: f64) -> Option<f64> {
        if !self.is_valid() {
            return None;
        }
        let segment = self.segment_for(x);
        let [a, b, c, d] = self.coefficients[segment];
        let dx = x - self.knots[segment];
        Some(a * dx * dx * dx + b * dx * dx + c * dx + d)
    }
}

impl CurveData {
    /// Padded x range covering every measured point.
    pub fn x_range(&self) -> Option<(f64, f64)> {
        let (min, max) = self
            .points
            .iter()
            .map(|p| p[0])
            .fold(None, |acc: Option<(f64, f64)>, x| match acc {
                Some((lo, hi)) => Some((lo.min(x), hi.max(x))),
                None => Some((x, x)),
            })?;
        let padding = (max - min) * SAMPLE_PADDING;
        Some((min - padding, max + padding))
    }

    /// `count + 1` evenly spaced `(x, y)` samples of the spline over the padded range.
    pub fn sample(&self, count: usize) -> Vec<(f64, f64)> {
        let Some((start, end)) = self.x_range() else {
            return Vec::new();
        };
        if count == 0 {
            return Vec::new();
        }
        (0..=count)
            .filter_map(|i| {
                let x = start + (i as f64 / count as f64) * (end - start);
                self.spline.evaluate(x).map(|y| (x, y))
            })
            .collect()
    }
}
