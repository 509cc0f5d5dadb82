//! Sentiment trend: split the recent window in halves and compare averages.

use cadence_core::analysis::{Sentiment, SentimentTrend};

const HOT_THRESHOLD: f64 = 1.5;
const COLD_THRESHOLD: f64 = -1.5;
const DELTA_THRESHOLD: f64 = 0.8;

/// Classify the conversation temperature from sentiments ordered oldest
/// first. Fewer than two data points can only be hot, cold, or stable —
/// there is no direction to read.
pub fn compute_trend(sentiments: &[Sentiment]) -> SentimentTrend {
    if sentiments.is_empty() {
        return SentimentTrend::Stable;
    }

    let mid = sentiments.len() / 2;
    let (earlier, recent) = sentiments.split_at(mid);
    let recent_avg = average(recent);

    if recent_avg >= HOT_THRESHOLD {
        return SentimentTrend::Hot;
    }
    if recent_avg <= COLD_THRESHOLD {
        return SentimentTrend::Cold;
    }
    if !earlier.is_empty() {
        let delta = recent_avg - average(earlier);
        if delta > DELTA_THRESHOLD {
            return SentimentTrend::Warming;
        }
        if delta < -DELTA_THRESHOLD {
            return SentimentTrend::Cooling;
        }
    }
    SentimentTrend::Stable
}

fn average(sentiments: &[Sentiment]) -> f64 {
    if sentiments.is_empty() {
        return 0.0;
    }
    sentiments.iter().map(|s| s.score()).sum::<f64>() / sentiments.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use Sentiment::*;

    #[test]
    fn empty_history_is_stable() {
        assert_eq!(compute_trend(&[]), SentimentTrend::Stable);
    }

    #[test]
    fn consistently_positive_is_hot() {
        assert_eq!(
            compute_trend(&[Interested, Positive, Positive, Interested]),
            SentimentTrend::Hot
        );
    }

    #[test]
    fn consistently_negative_is_cold() {
        assert_eq!(
            compute_trend(&[Negative, Negative, Negative, Negative]),
            SentimentTrend::Cold
        );
    }

    #[test]
    fn improving_conversation_is_warming() {
        // Earlier half averages -1, recent half averages 1: Δ = 2.
        assert_eq!(
            compute_trend(&[Objection, Negative, Interested, Neutral]),
            SentimentTrend::Warming
        );
    }

    #[test]
    fn declining_conversation_is_cooling() {
        // Earlier half averages 2 (hot), recent half 0: Δ = -2, and the
        // recent average is not cold enough for Cold.
        assert_eq!(
            compute_trend(&[Positive, Interested, Neutral, Neutral]),
            SentimentTrend::Cooling
        );
    }

    #[test]
    fn flat_neutral_is_stable() {
        assert_eq!(
            compute_trend(&[Neutral, Neutral, Confused, Neutral]),
            SentimentTrend::Stable
        );
    }

    #[test]
    fn single_positive_reply_is_hot() {
        assert_eq!(compute_trend(&[Positive]), SentimentTrend::Hot);
    }
}
