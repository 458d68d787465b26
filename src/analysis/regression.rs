use anyhow::{bail, Result};
use serde::Serialize;

/// Ordinary least squares with an intercept
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinearRegression {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl LinearRegression {
    /// Fit `targets ~ features`, one row per observation
    pub fn fit(features: &[Vec<f64>], targets: &[f64]) -> Result<Self> {
        let n = features.len();
        if n == 0 || n != targets.len() {
            bail!("Regression needs matching, non-empty features ({}) and targets ({})", n, targets.len());
        }
        let d = features[0].len();
        if features.iter().any(|row| row.len() != d) {
            bail!("Regression feature rows have different widths");
        }

        let x_mean: Vec<f64> = (0..d)
            .map(|j| features.iter().map(|row| row[j]).sum::<f64>() / n as f64)
            .collect();
        let y_mean = targets.iter().sum::<f64>() / n as f64;

        // centered normal equations: Sxx * beta = Sxy
        let mut sxx = vec![vec![0.0; d]; d];
        let mut sxy = vec![0.0; d];
        for (row, y) in features.iter().zip(targets) {
            for a in 0..d {
                let xa = row[a] - x_mean[a];
                sxy[a] += xa * (y - y_mean);
                for b in 0..d {
                    sxx[a][b] += xa * (row[b] - x_mean[b]);
                }
            }
        }

        let coefficients = solve(sxx, sxy)?;
        let intercept = y_mean
            - coefficients
                .iter()
                .zip(&x_mean)
                .map(|(c, m)| c * m)
                .sum::<f64>();

        Ok(Self {
            intercept,
            coefficients,
        })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(row)
                .map(|(c, x)| c * x)
                .sum::<f64>()
    }
}

/// Gaussian elimination with partial pivoting
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            bail!("Regression features are collinear or constant");
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

fn variance(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let n = values.clone().count().max(1) as f64;
    let mean = values.clone().sum::<f64>() / n;
    values.map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// `1 - Var(y - y_pred) / Var(y)`
pub fn explained_variance_score(targets: &[f64], predictions: &[f64]) -> f64 {
    let residual = variance(targets.iter().zip(predictions).map(|(y, p)| y - p));
    let total = variance(targets.iter().copied());
    if total == 0.0 {
        return if residual == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - residual / total
}

/// Univariate F-test of each feature against the target
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FTest {
    pub f_statistic: f64,
    pub p_value: f64,
}

/// F statistic and p-value of each feature column
pub fn f_regression(features: &[Vec<f64>], targets: &[f64]) -> Vec<FTest> {
    let n = features.len();
    let d = features.first().map(Vec::len).unwrap_or(0);
    let dof = n as f64 - 2.0;

    (0..d)
        .map(|j| {
            let column: Vec<f64> = features.iter().map(|row| row[j]).collect();
            let r = correlation(&column, targets);
            let f_statistic = if dof > 0.0 {
                r * r / (1.0 - r * r).max(f64::MIN_POSITIVE) * dof
            } else {
                f64::NAN
            };
            let p_value = if dof > 0.0 {
                f_survival(f_statistic, 1.0, dof)
            } else {
                f64::NAN
            };
            FTest {
                f_statistic,
                p_value,
            }
        })
        .collect()
}

/// Pearson correlation
pub fn correlation(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len()) as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        0.0
    } else {
        sxy / (sxx * syy).sqrt()
    }
}

/// Upper tail of the F distribution with `d1`, `d2` degrees of freedom
pub fn f_survival(f: f64, d1: f64, d2: f64) -> f64 {
    if !f.is_finite() {
        return if f.is_nan() { f64::NAN } else { 0.0 };
    }
    if f <= 0.0 {
        return 1.0;
    }
    regularized_incomplete_beta(d2 / (d2 + d1 * f), d2 / 2.0, d1 / 2.0)
}

fn ln_gamma(x: f64) -> f64 {
    // Lanczos approximation, g = 7
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + 7.5;
    let series = COEFFICIENTS[1..]
        .iter()
        .enumerate()
        .fold(COEFFICIENTS[0], |acc, (i, c)| acc + c / (x + i as f64 + 1.0));
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

/// `I_x(a, b)`, continued-fraction evaluation
pub fn regularized_incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(x, a, b) / a
    } else {
        1.0 - front * beta_continued_fraction(1.0 - x, b, a) / b
    }
}

fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    const MAX_ITERATIONS: usize = 300;
    const EPSILON: f64 = 1e-14;
    const TINY: f64 = 1e-300;

    let clamp = |v: f64| if v.abs() < TINY { TINY } else { v };
    let mut c = 1.0;
    let mut d = 1.0 / clamp(1.0 - (a + b) * x / (a + 1.0));
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let even = m * (b - m) * x / ((a + 2.0 * m - 1.0) * (a + 2.0 * m));
        d = 1.0 / clamp(1.0 + even * d);
        c = clamp(1.0 + even / c);
        h *= d * c;

        let odd = -(a + m) * (a + b + m) * x / ((a + 2.0 * m) * (a + 2.0 * m + 1.0));
        d = 1.0 / clamp(1.0 + odd * d);
        c = clamp(1.0 + odd / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }
    h
}
