//! Descriptive statistics used by the bias aggregator.

/// Computes the arithmetic mean.
///
/// Returns `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Computes the sample (`n - 1`) standard deviation.
///
/// Returns `None` when fewer than two values are given.
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }

    let mean = mean(values)?;
    let sum_of_squares: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some((sum_of_squares / (values.len() - 1) as f64).sqrt())
}

/// Computes the Pearson correlation coefficient of two equally long series.
///
/// Returns `None` when the series differ in length, have fewer than two
/// points, or either has zero variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }

    let mean_x = mean(xs)?;
    let mean_y = mean(ys)?;

    let (mut covariance, mut variance_x, mut variance_y) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        covariance += dx * dy;
        variance_x += dx * dx;
        variance_y += dy * dy;
    }

    if is_constant(xs, variance_x) || is_constant(ys, variance_y) {
        return None;
    }

    let r = covariance / (variance_x.sqrt() * variance_y.sqrt());
    r.is_finite().then_some(r)
}

/// Whether a series is constant up to floating-point rounding.
///
/// `variance` is the sum of squared deviations from the series mean; it is
/// compared against the series' sum of squares.
fn is_constant(values: &[f64], variance: f64) -> bool {
    if values.windows(2).all(|w| w[0] == w[1]) {
        return true;
    }

    let sum_of_squares: f64 = values.iter().map(|v| v * v).sum();
    variance <= sum_of_squares * f64::EPSILON
}
