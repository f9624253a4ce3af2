//! Technical and risk indicators over price series.
//!
//! Every function takes prices oldest-first. Functions that need a minimum
//! amount of history return a neutral value (or `None`) when it is missing.

use serde::{Deserialize, Serialize};

pub const TRADING_DAYS: f64 = 252.0;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator)
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Period-over-period fractional returns
pub fn pct_change(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

/// Mean of the last `window` prices
pub fn sma(prices: &[f64], window: usize) -> Option<f64> {
    if window == 0 || prices.len() < window {
        return None;
    }
    mean(&prices[prices.len() - window..])
}

/// Standard deviation of the last `window` prices
pub fn rolling_std(prices: &[f64], window: usize) -> Option<f64> {
    if window < 2 || prices.len() < window {
        return None;
    }
    std_dev(&prices[prices.len() - window..])
}

/// Exponential moving average seeded with the first value (no bias adjustment)
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            Some(p) => alpha * v + (1.0 - alpha) * p,
            None => v,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// Relative Strength Index using simple averages of the last `period` moves.
/// Returns 50 without enough history and 100 when there were no losses.
pub fn rsi(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period + 1 {
        return 50.0;
    }
    let recent = &prices[prices.len() - period - 1..];
    let (mut gains, mut losses) = (0.0, 0.0);
    for w in recent.windows(2) {
        let delta = w[1] - w[0];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    if avg_loss == 0.0 {
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD line, signal line and histogram at the latest price
pub fn macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if prices.len() < slow {
        return None;
    }
    let fast_ema = ema(prices, fast);
    let slow_ema = ema(prices, slow);
    let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let signal_line = ema(&line, signal);
    let macd = *line.last()?;
    let signal = *signal_line.last()?;
    Some(Macd {
        macd,
        signal,
        histogram: macd - signal,
    })
}

/// Where the latest price sits between the lower (0) and upper (1) band
pub fn bollinger_position(prices: &[f64], window: usize, num_std: f64) -> f64 {
    let (Some(mid), Some(sd), Some(&last)) = (sma(prices, window), rolling_std(prices, window), prices.last()) else {
        return 0.5;
    };
    let upper = mid + sd * num_std;
    let lower = mid - sd * num_std;
    if upper - lower <= 0.0 {
        return 0.5;
    }
    (last - lower) / (upper - lower)
}

/// Fractional change over `period` steps
pub fn momentum(prices: &[f64], period: usize) -> f64 {
    if prices.len() <= period {
        return 0.0;
    }
    let past = prices[prices.len() - 1 - period];
    let last = prices[prices.len() - 1];
    if past == 0.0 {
        return 0.0;
    }
    last / past - 1.0
}

/// Standard deviation of the last `window` returns
pub fn volatility(prices: &[f64], window: usize) -> f64 {
    let returns = pct_change(prices);
    if returns.len() < window.max(2) {
        return std_dev(&returns).unwrap_or(0.0);
    }
    std_dev(&returns[returns.len() - window..]).unwrap_or(0.0)
}

/// Linear-interpolated percentile (`q` in 0..=100)
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Historical VaR: the return at the (1 - confidence) percentile
pub fn value_at_risk(returns: &[f64], confidence: f64) -> f64 {
    percentile(returns, (1.0 - confidence) * 100.0).unwrap_or(0.0)
}

/// Annualised Sharpe ratio of periodic returns
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    let (Some(m), Some(sd)) = (mean(returns), std_dev(returns)) else {
        return 0.0;
    };
    if sd == 0.0 {
        return 0.0;
    }
    TRADING_DAYS.sqrt() * (m - risk_free_rate / TRADING_DAYS) / sd
}

pub fn annualized_volatility(returns: &[f64]) -> f64 {
    std_dev(returns).unwrap_or(0.0) * TRADING_DAYS.sqrt()
}

/// Deepest peak-to-trough decline as a non-positive fraction
pub fn max_drawdown(prices: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0f64;
    for &p in prices {
        peak = peak.max(p);
        if peak > 0.0 {
            worst = worst.min((p - peak) / peak);
        }
    }
    worst
}

/// Percent change between the latest price and the one `lookback` steps earlier
pub fn price_change_pct(prices: &[f64], lookback: usize) -> f64 {
    if lookback == 0 || prices.len() < lookback {
        return 0.0;
    }
    let past = prices[prices.len() - lookback];
    let last = prices[prices.len() - 1];
    if past == 0.0 {
        return 0.0;
    }
    (last - past) / past * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_std_dev_sample() {
        let sd = std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!(approx(sd, 2.138089935299395));
        assert!(std_dev(&[1.0]).is_none());
    }

    #[test]
    fn test_pct_change() {
        let r = pct_change(&[100.0, 110.0, 99.0]);
        assert!(approx(r[0], 0.1));
        assert!(approx(r[1], -0.1));
        assert_eq!(pct_change(&[0.0, 5.0]), vec![0.0]);
    }

    #[test]
    fn test_sma() {
        assert_eq!(sma(&[1.0, 2.0, 3.0, 4.0], 2), Some(3.5));
        assert_eq!(sma(&[1.0], 2), None);
    }

    #[test]
    fn test_ema_no_adjust() {
        let e = ema(&[1.0, 2.0, 3.0], 3);
        // alpha = 0.5
        assert_eq!(e, vec![1.0, 1.5, 2.25]);
    }

    #[test]
    fn test_rsi_bounds() {
        let rising: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&rising, 14), 100.0);

        let falling: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        assert!(approx(rsi(&falling, 14), 0.0));

        assert_eq!(rsi(&[1.0, 2.0], 14), 50.0);
        assert_eq!(rsi(&[5.0; 20], 14), 50.0);
    }

    #[test]
    fn test_rsi_mixed() {
        // 7 gains of 2, 7 losses of 1 -> rs = 2 -> rsi = 66.67
        let mut prices = vec![100.0];
        for i in 0..14 {
            let last = *prices.last().unwrap();
            prices.push(if i % 2 == 0 { last + 2.0 } else { last - 1.0 });
        }
        assert!((rsi(&prices, 14) - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_macd_trend() {
        let rising: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.5).collect();
        let m = macd(&rising, 12, 26, 9).unwrap();
        assert!(m.macd > 0.0);
        assert!(approx(m.histogram, m.macd - m.signal));
        assert!(macd(&rising[..10], 12, 26, 9).is_none());
    }

    #[test]
    fn test_bollinger_position() {
        let mut prices = vec![100.0; 19];
        prices.push(100.0);
        assert_eq!(bollinger_position(&prices, 20, 2.0), 0.5);

        let mut spiky: Vec<f64> = (0..19).map(|i| 100.0 + (i % 2) as f64).collect();
        spiky.push(110.0);
        assert!(bollinger_position(&spiky, 20, 2.0) > 1.0);

        assert_eq!(bollinger_position(&[1.0, 2.0], 20, 2.0), 0.5);
    }

    #[test]
    fn test_momentum() {
        let prices: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        assert!(approx(momentum(&prices, 14), 0.14));
        assert_eq!(momentum(&prices[..5], 14), 0.0);
    }

    #[test]
    fn test_volatility() {
        assert_eq!(volatility(&[100.0; 30], 20), 0.0);
        let zigzag: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 100.0 } else { 110.0 }).collect();
        assert!(volatility(&zigzag, 20) > 0.05);
        assert_eq!(volatility(&[100.0], 20), 0.0);
    }

    #[test]
    fn test_percentile_and_var() {
        let returns: Vec<f64> = (1..=100).map(|i| i as f64 / 100.0 - 0.5).collect();
        // numpy.percentile(x, 5) with linear interpolation
        assert!(approx(percentile(&returns, 5.0).unwrap(), -0.4405));
        assert!(approx(value_at_risk(&returns, 0.95), -0.4405));
        assert_eq!(value_at_risk(&[], 0.95), 0.0);
    }

    #[test]
    fn test_sharpe_ratio() {
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01], 0.0), 0.0);
        let returns = [0.01, 0.02, -0.005, 0.015];
        let expected = TRADING_DAYS.sqrt() * (0.01 - 0.03 / TRADING_DAYS) / std_dev(&returns).unwrap();
        assert!(approx(sharpe_ratio(&returns, 0.03), expected));
    }

    #[test]
    fn test_max_drawdown() {
        assert!(approx(max_drawdown(&[100.0, 120.0, 90.0, 130.0]), -0.25));
        assert_eq!(max_drawdown(&[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn test_price_change_pct() {
        let mut prices = vec![100.0];
        prices.extend(std::iter::repeat(105.0).take(23));
        assert_eq!(prices.len(), 24);
        assert!(approx(price_change_pct(&prices, 24), 5.0));
        assert_eq!(price_change_pct(&prices[..10], 24), 0.0);
    }
}
