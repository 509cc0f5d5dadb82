//! Emotion-based delay multipliers: a hot conversation speeds the cadence
//! up, a cooling or hostile one backs off. Conditions are evaluated in
//! order; the first match wins.

use cadence_core::analysis::{EmotionalState, PrimaryEmotion, SentimentTrend};

pub fn delay_multiplier(state: &EmotionalState) -> f64 {
    if state.is_hot_lead && state.sentiment_trend == SentimentTrend::Hot {
        return 0.6;
    }
    if matches!(
        state.sentiment_trend,
        SentimentTrend::Warming | SentimentTrend::Hot
    ) {
        return 0.8;
    }
    if state.sentiment_trend == SentimentTrend::Cooling {
        return 1.5;
    }
    if state.sentiment_trend == SentimentTrend::Cold {
        return 2.0;
    }
    if matches!(
        state.last_emotion,
        Some(PrimaryEmotion::Angry) | Some(PrimaryEmotion::Frustrated)
    ) {
        return 1.8;
    }
    if state.is_at_risk {
        return 1.3;
    }
    1.0
}

/// Nominal step delay adjusted by the enrollment's emotional state.
pub fn adjusted_delay_secs(nominal_secs: u64, state: &EmotionalState) -> u64 {
    (nominal_secs as f64 * delay_multiplier(state)).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> EmotionalState {
        EmotionalState::default()
    }

    #[test]
    fn hot_lead_on_hot_trend_accelerates_most() {
        let s = EmotionalState {
            is_hot_lead: true,
            sentiment_trend: SentimentTrend::Hot,
            ..state()
        };
        assert_eq!(delay_multiplier(&s), 0.6);
        // Scenario: nominal 3600 s becomes 2160 s.
        assert_eq!(adjusted_delay_secs(3600, &s), 2160);
    }

    #[test]
    fn hot_trend_without_flag_still_accelerates() {
        let s = EmotionalState {
            sentiment_trend: SentimentTrend::Hot,
            ..state()
        };
        assert_eq!(delay_multiplier(&s), 0.8);
    }

    #[test]
    fn cooling_and_cold_back_off() {
        let cooling = EmotionalState {
            sentiment_trend: SentimentTrend::Cooling,
            ..state()
        };
        assert_eq!(delay_multiplier(&cooling), 1.5);

        let cold = EmotionalState {
            sentiment_trend: SentimentTrend::Cold,
            ..state()
        };
        assert_eq!(delay_multiplier(&cold), 2.0);
    }

    #[test]
    fn trend_outranks_emotion() {
        // Angry on a warming trend: the trend rule fires first.
        let s = EmotionalState {
            sentiment_trend: SentimentTrend::Warming,
            last_emotion: Some(PrimaryEmotion::Angry),
            ..state()
        };
        assert_eq!(delay_multiplier(&s), 0.8);
    }

    #[test]
    fn angry_on_stable_trend_backs_off() {
        let s = EmotionalState {
            last_emotion: Some(PrimaryEmotion::Angry),
            ..state()
        };
        assert_eq!(delay_multiplier(&s), 1.8);
    }

    #[test]
    fn at_risk_is_the_weakest_modifier() {
        let s = EmotionalState {
            is_at_risk: true,
            ..state()
        };
        assert_eq!(delay_multiplier(&s), 1.3);

        let angry_at_risk = EmotionalState {
            is_at_risk: true,
            last_emotion: Some(PrimaryEmotion::Frustrated),
            ..state()
        };
        assert_eq!(delay_multiplier(&angry_at_risk), 1.8);
    }

    #[test]
    fn neutral_state_is_identity() {
        assert_eq!(delay_multiplier(&state()), 1.0);
        assert_eq!(adjusted_delay_secs(3600, &state()), 3600);
    }
}
