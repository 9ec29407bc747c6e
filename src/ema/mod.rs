//! Incremental multi-span EMA vector and the band derived from it.
//!
//! Spans are configured in minutes and rescaled to sample counts before use;
//! the tick stream is expected to be uniformly sampled (see
//! [`crate::data::sample_ticks`]).

/// Rescale spans from minutes to sample-count units given the sample spacing.
pub fn spans_to_samples(spans_minutes: &[f64], sample_interval_ms: i64) -> Vec<f64> {
    let interval_minutes = sample_interval_ms as f64 / (1000.0 * 60.0);
    spans_minutes.iter().map(|s| s / interval_minutes).collect()
}

/// Number of warm-up samples needed to seed the longest span.
pub fn warmup_len(spans_samples: &[f64]) -> usize {
    spans_samples.iter().cloned().fold(0.0f64, f64::max).round() as usize
}

/// Band snapshot handed to the order constructors: the `[min, max]` envelope
/// over the EMA vector plus the MA-ratio feature vector
/// `[last_price, ema_0, …, ema_{n-2}] / emas`.
#[derive(Debug, Clone, PartialEq)]
pub struct BandSnapshot {
    pub lower: f64,
    pub upper: f64,
    pub ratios: Vec<f64>,
}

/// Build a [`BandSnapshot`] from a raw EMA vector.
pub fn band_snapshot(values: &[f64], last_price: f64) -> BandSnapshot {
    let mut lower = f64::INFINITY;
    let mut upper = f64::NEG_INFINITY;
    for &v in values {
        lower = lower.min(v);
        upper = upper.max(v);
    }
    let ratios = values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let numerator = if i == 0 { last_price } else { values[i - 1] };
            numerator / v
        })
        .collect();
    BandSnapshot { lower, upper, ratios }
}

/// EMA vector over N spans, advanced once per sample.
#[derive(Debug, Clone)]
pub struct EmaBand {
    alphas: Vec<f64>,
    values: Vec<f64>,
}

impl EmaBand {
    /// Seed the vector by folding the warm-up prices, starting every span
    /// from the first price.
    pub fn seed(prices: &[f64], spans_samples: &[f64]) -> Self {
        let alphas: Vec<f64> = spans_samples.iter().map(|s| 2.0 / (s + 1.0)).collect();
        let mut values = vec![prices.first().copied().unwrap_or(0.0); spans_samples.len()];
        for &price in &prices[prices.len().min(1)..] {
            for (v, &a) in values.iter_mut().zip(&alphas) {
                *v = *v * (1.0 - a) + price * a;
            }
        }
        Self { alphas, values }
    }

    /// The vector one sample ahead, without committing it.
    pub fn advanced(&self, price: f64) -> Vec<f64> {
        self.values
            .iter()
            .zip(&self.alphas)
            .map(|(&v, &a)| v * (1.0 - a) + price * a)
            .collect()
    }

    /// Commit a vector previously produced by [`EmaBand::advanced`].
    pub fn commit(&mut self, values: Vec<f64>) {
        self.values = values;
    }

    /// Advance and commit in one step.
    pub fn update(&mut self, price: f64) {
        self.values = self.advanced(price);
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn snapshot(&self, last_price: f64) -> BandSnapshot {
        band_snapshot(&self.values, last_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_rescaled_by_sample_spacing() {
        // 1 s samples: a 15 minute span covers 900 samples.
        let spans = spans_to_samples(&[15.0, 60.0], 1000);
        assert_eq!(spans, vec![900.0, 3600.0]);
        assert_eq!(warmup_len(&spans), 3600);
    }

    #[test]
    fn test_seed_matches_incremental_updates() {
        let spans = vec![5.0, 20.0];
        let prices = [100.0, 101.0, 99.0, 100.5, 102.0];
        let seeded = EmaBand::seed(&prices, &spans);

        let mut incremental = EmaBand::seed(&prices[..1], &spans);
        for &p in &prices[1..] {
            incremental.update(p);
        }
        for (a, b) in seeded.values().iter().zip(incremental.values()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_band_snapshot_ratios() {
        let band = band_snapshot(&[100.0, 104.0], 102.0);
        assert_eq!(band.lower, 100.0);
        assert_eq!(band.upper, 104.0);
        // [last, ema_0] / [ema_0, ema_1]
        assert!((band.ratios[0] - 102.0 / 100.0).abs() < 1e-12);
        assert!((band.ratios[1] - 100.0 / 104.0).abs() < 1e-12);
    }

    #[test]
    fn test_advanced_does_not_commit() {
        let mut band = EmaBand::seed(&[100.0], &[10.0]);
        let next = band.advanced(110.0);
        assert_eq!(band.values()[0], 100.0);
        band.commit(next);
        assert!(band.values()[0] > 100.0);
    }
}
