//! Indicator kernels over a single asset's closes, oldest first.
//!
//! Every function looks only at the trailing window it needs and returns
//! `None` when the history is shorter than that window.

fn tail(values: &[f64], n: usize) -> Option<&[f64]> {
    (n > 0 && values.len() >= n).then(|| &values[values.len() - n..])
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// Mean of close x volume over the last `window` bars. Any missing volume
/// in the window leaves the factor undefined.
pub fn average_dollar_volume(closes: &[f64], volumes: &[Option<f64>], window: usize) -> Option<f64> {
    if closes.len() != volumes.len() {
        return None;
    }
    let closes = tail(closes, window)?;
    let volumes = &volumes[volumes.len() - window..];
    let mut total = 0.0;
    for (c, v) in closes.iter().zip(volumes) {
        total += c * (*v)?;
    }
    finite(total / window as f64)
}

/// Fractional return across a window of `window_length` closes.
pub fn returns(closes: &[f64], window_length: usize) -> Option<f64> {
    let w = tail(closes, window_length.max(2))?;
    finite(w[w.len() - 1] / w[0] - 1.0)
}

/// Relative strength index with simple means of up and down moves.
pub fn rsi(closes: &[f64], window_length: usize) -> Option<f64> {
    let w = tail(closes, window_length.max(2))?;
    let diffs: Vec<f64> = w.windows(2).map(|p| p[1] - p[0]).collect();
    let ups = mean(&diffs.iter().map(|d| d.max(0.0)).collect::<Vec<_>>());
    let downs = mean(&diffs.iter().map(|d| (-d).max(0.0)).collect::<Vec<_>>());
    if downs == 0.0 {
        // Flat window has no defined strength
        return (ups > 0.0).then_some(100.0);
    }
    finite(100.0 - 100.0 / (1.0 + ups / downs))
}

/// Weighted average with weights `d^(n+1) .. d^2`, newest weighted most,
/// `d = 1 - 2/(n+1)`.
fn exponential_average(values: &[f64]) -> f64 {
    let n = values.len();
    let decay = 1.0 - 2.0 / (n as f64 + 1.0);
    let mut weighted = 0.0;
    let mut weights = 0.0;
    for (i, v) in values.iter().enumerate() {
        let w = decay.powi((n + 1 - i) as i32);
        weighted += w * v;
        weights += w;
    }
    weighted / weights
}

/// MACD signal line from windowed exponential averages.
///
/// Uses the last `slow + signal - 1` closes: each of the `signal` trailing
/// windows of length `slow` yields one MACD value (fast average over the
/// window's last `fast` closes minus slow average over the whole window).
pub fn macd_signal_windowed(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<f64> {
    if fast == 0 || fast > slow || signal == 0 {
        return None;
    }
    let w = tail(closes, slow + signal - 1)?;
    let macd: Vec<f64> = w
        .windows(slow)
        .map(|win| exponential_average(&win[slow - fast..]) - exponential_average(win))
        .collect();
    finite(exponential_average(&macd))
}

/// Recursive EMA seeded with the simple mean of its first `period` values.
fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = mean(&values[..period]);
    let mut out = vec![prev];
    for v in &values[period..] {
        prev += (v - prev) * k;
        out.push(prev);
    }
    out
}

/// MACD signal line in the recursive form: fast and slow EMAs both start at
/// the `slow`-th close (the fast one seeded on the `fast` closes ending
/// there), and the signal EMA is seeded on the first `signal` MACD values.
/// Computed over the last `window` closes.
pub fn macd_signal_recursive(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
    window: usize,
) -> Option<f64> {
    if fast == 0 || fast > slow || signal == 0 {
        return None;
    }
    let w = tail(closes, window)?;
    if w.len() < slow + signal - 1 {
        return None;
    }
    let slow_ema = ema_series(w, slow);
    let fast_ema = ema_series(&w[slow - fast..], fast);
    let macd: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    ema_series(&macd, signal).last().copied().and_then(finite)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub lower: f64,
    pub middle: f64,
    pub upper: f64,
}

/// Mean +/- `k` population standard deviations.
pub fn bollinger(closes: &[f64], window_length: usize, k: f64) -> Option<Bands> {
    let w = tail(closes, window_length)?;
    let middle = mean(w);
    let var = w.iter().map(|c| (c - middle).powi(2)).sum::<f64>() / w.len() as f64;
    let spread = k * var.sqrt();
    Some(Bands {
        lower: finite(middle - spread)?,
        middle: finite(middle)?,
        upper: finite(middle + spread)?,
    })
}

/// z-score of the latest `return_window` return against the last `window`
/// such returns (sample standard deviation).
pub fn mean_reversion(closes: &[f64], return_window: usize, window: usize) -> Option<f64> {
    if window < 2 || return_window < 2 {
        return None;
    }
    let w = tail(closes, window + return_window - 1)?;
    let rets: Vec<f64> = w
        .windows(return_window)
        .map(|r| r[return_window - 1] / r[0] - 1.0)
        .collect();
    let m = mean(&rets);
    let var = rets.iter().map(|r| (r - m).powi(2)).sum::<f64>() / (rets.len() - 1) as f64;
    let std = var.sqrt();
    if std == 0.0 {
        return None;
    }
    finite((rets[rets.len() - 1] - m) / std)
}
