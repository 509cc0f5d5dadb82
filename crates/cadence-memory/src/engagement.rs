//! Engagement score: a closed-form blend over the last K interactions.
//! Bounded 0–100 and used only for tone and timing, never for gating.

use chrono::{DateTime, Utc};

use cadence_store::types::Interaction;

/// Window size shared with the sentiment trend.
pub const RECENT_WINDOW: usize = 10;

const BASELINE: f64 = 50.0;
/// Recency decay applied per step back in history.
const SENTIMENT_DECAY: f64 = 0.8;
/// Staleness penalty starts after this many days of silence.
const STALE_AFTER_DAYS: f64 = 3.0;
const STALE_PENALTY_PER_DAY: f64 = 5.0;
const STALE_PENALTY_MAX: f64 = 15.0;

/// Compute the score from interactions ordered oldest first. `now` is
/// injected so the staleness decay is testable.
pub fn compute_engagement(interactions: &[Interaction], now: DateTime<Utc>) -> i64 {
    if interactions.is_empty() {
        return BASELINE as i64;
    }
    let recent: &[Interaction] = if interactions.len() > RECENT_WINDOW {
        &interactions[interactions.len() - RECENT_WINDOW..]
    } else {
        interactions
    };

    let mut score = BASELINE;

    // Inbound ratio: all-inbound +20, all-outbound -20.
    let inbound = recent
        .iter()
        .filter(|i| matches!(i.direction, cadence_core::types::Direction::Inbound))
        .count() as f64;
    let ratio = inbound / recent.len() as f64;
    score += (ratio - 0.5) * 2.0 * 20.0;

    // Recency-weighted sentiment, scaled to ±15.
    let mut weight = 1.0;
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for interaction in recent.iter().rev() {
        if let Some(s) = interaction
            .sentiment
            .as_deref()
            .and_then(|s| s.parse::<cadence_core::analysis::Sentiment>().ok())
        {
            weighted_sum += s.score() * weight;
            weight_total += weight;
        }
        weight *= SENTIMENT_DECAY;
    }
    if weight_total > 0.0 {
        score += (weighted_sum / weight_total / 2.0) * 15.0;
    }

    // Answered-call rate, scaled to ±10 (calls only).
    let calls: Vec<&Interaction> = recent
        .iter()
        .filter(|i| matches!(i.channel, cadence_core::types::Channel::Voice))
        .collect();
    if !calls.is_empty() {
        let answered = calls
            .iter()
            .filter(|i| i.outcome.as_deref() == Some("answered"))
            .count() as f64;
        score += (answered / calls.len() as f64 - 0.5) * 2.0 * 10.0;
    }

    // Appointment discussed anywhere in the window.
    let appointment = recent.iter().any(|i| {
        i.key_topics.iter().any(|t| t.contains("appointment"))
            || i.outcome.as_deref() == Some("booked")
    });
    if appointment {
        score += 10.0;
    }

    // Staleness decay after three quiet days.
    if let Some(last) = recent.last() {
        if let Ok(last_at) = DateTime::parse_from_rfc3339(&last.created_at) {
            let days = (now - last_at.with_timezone(&Utc)).num_hours() as f64 / 24.0;
            if days > STALE_AFTER_DAYS {
                score -= ((days - STALE_AFTER_DAYS) * STALE_PENALTY_PER_DAY).min(STALE_PENALTY_MAX);
            }
        }
    }

    // Per-interaction analysis flags.
    for interaction in recent {
        if let Some(a) = &interaction.analysis {
            if a.is_hot_lead {
                score += 5.0;
            }
            if a.is_at_risk {
                score -= 5.0;
            }
            score += 2.0 * a.buying_signals.len() as f64;
        }
    }

    (score.round() as i64).clamp(0, 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::analysis::{BuyingSignal, BuyingSignalStrength, EmotionalAnalysis};
    use cadence_core::types::{Channel, ContactId, Direction, TenantId};

    fn interaction(
        channel: Channel,
        direction: Direction,
        sentiment: Option<&str>,
        created_at: &str,
    ) -> Interaction {
        Interaction {
            id: "i".into(),
            tenant_id: TenantId("t1".into()),
            contact_id: ContactId("c1".into()),
            enrollment_id: None,
            channel,
            direction,
            content: String::new(),
            outcome: None,
            sentiment: sentiment.map(String::from),
            intent: None,
            call_duration_secs: None,
            call_disposition: None,
            objections: vec![],
            key_topics: vec![],
            provider_id: None,
            event_type: None,
            analysis: None,
            created_at: created_at.into(),
        }
    }

    fn now() -> DateTime<Utc> {
        "2025-03-10T12:00:00+00:00".parse().unwrap()
    }

    #[test]
    fn empty_history_is_baseline() {
        assert_eq!(compute_engagement(&[], now()), 50);
    }

    #[test]
    fn inbound_heavy_beats_outbound_heavy() {
        let fresh = "2025-03-10T11:00:00+00:00";
        let engaged: Vec<_> = (0..4)
            .map(|_| interaction(Channel::Sms, Direction::Inbound, Some("positive"), fresh))
            .collect();
        let ignored: Vec<_> = (0..4)
            .map(|_| interaction(Channel::Sms, Direction::Outbound, None, fresh))
            .collect();
        assert!(compute_engagement(&engaged, now()) > compute_engagement(&ignored, now()));
    }

    #[test]
    fn staleness_decays_after_three_days() {
        let fresh = vec![interaction(
            Channel::Sms,
            Direction::Inbound,
            Some("neutral"),
            "2025-03-10T11:00:00+00:00",
        )];
        let stale = vec![interaction(
            Channel::Sms,
            Direction::Inbound,
            Some("neutral"),
            "2025-03-01T11:00:00+00:00",
        )];
        let fresh_score = compute_engagement(&fresh, now());
        let stale_score = compute_engagement(&stale, now());
        assert_eq!(fresh_score - stale_score, 15);
    }

    #[test]
    fn hot_lead_flags_and_buying_signals_add_up() {
        let fresh = "2025-03-10T11:00:00+00:00";
        let mut with_flags = interaction(Channel::Sms, Direction::Inbound, Some("positive"), fresh);
        let mut analysis = EmotionalAnalysis::neutral(0.9);
        analysis.is_hot_lead = true;
        analysis.buying_signals.push(BuyingSignal {
            signal: "asked for quote".into(),
            strength: BuyingSignalStrength::Strong,
        });
        with_flags.analysis = Some(analysis);

        let plain = interaction(Channel::Sms, Direction::Inbound, Some("positive"), fresh);
        let delta = compute_engagement(&[with_flags], now()) - compute_engagement(&[plain], now());
        assert_eq!(delta, 7); // +5 hot lead, +2 one buying signal
    }

    #[test]
    fn score_is_clamped() {
        let fresh = "2025-03-10T11:00:00+00:00";
        let mut hot = interaction(Channel::Voice, Direction::Inbound, Some("positive"), fresh);
        hot.outcome = Some("answered".into());
        let mut analysis = EmotionalAnalysis::neutral(0.9);
        analysis.is_hot_lead = true;
        for _ in 0..30 {
            analysis.buying_signals.push(BuyingSignal {
                signal: "x".into(),
                strength: BuyingSignalStrength::Weak,
            });
        }
        hot.analysis = Some(analysis);
        let many: Vec<_> = (0..10).map(|_| hot.clone()).collect();
        assert_eq!(compute_engagement(&many, now()), 100);
    }
}
