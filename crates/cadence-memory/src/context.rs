use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::warn;

use cadence_core::analysis::Sentiment;
use cadence_core::types::{Channel, Direction};
use cadence_store::types::Interaction;
use cadence_store::Store;

use crate::engagement::RECENT_WINDOW;
use crate::trend::compute_trend;
use crate::types::ConversationContext;

/// Interactions pulled for assembly (timeline + histories).
const ASSEMBLY_WINDOW: usize = 50;
/// Maximum lines in the formatted timeline.
const TIMELINE_MAX_LINES: usize = 20;
/// Content snippet length inside timeline lines.
const SNIPPET_CHARS: usize = 80;
/// Cached contexts expire after this.
const CACHE_TTL: Duration = Duration::from_secs(300);

/// Builds and caches [`ConversationContext`] per enrollment.
///
/// Assembly is best-effort: a store failure logs a warning and yields an
/// empty context so the scheduler can still dispatch the step.
pub struct ConversationMemory {
    store: Arc<Store>,
    cache: DashMap<String, (ConversationContext, Instant)>,
    ttl: Duration,
}

impl ConversationMemory {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            ttl: CACHE_TTL,
        }
    }

    pub fn with_ttl(store: Arc<Store>, ttl: Duration) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Assemble (or serve cached) context for an enrollment.
    pub fn build(&self, enrollment_id: &str, contact_id: &str) -> ConversationContext {
        if let Some(entry) = self.cache.get(enrollment_id) {
            let (ctx, built_at) = entry.value();
            if built_at.elapsed() < self.ttl {
                return ctx.clone();
            }
        }

        let ctx = match self.assemble(enrollment_id, contact_id) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(enrollment_id, error = %e, "context assembly failed, using empty context");
                ConversationContext::default()
            }
        };
        self.cache
            .insert(enrollment_id.to_string(), (ctx.clone(), Instant::now()));
        ctx
    }

    /// Drop the cached context after the event processor records a new
    /// interaction.
    pub fn invalidate(&self, enrollment_id: &str) {
        self.cache.remove(enrollment_id);
    }

    fn assemble(
        &self,
        enrollment_id: &str,
        contact_id: &str,
    ) -> crate::error::Result<ConversationContext> {
        let interactions = self.store.recent_interactions(enrollment_id, ASSEMBLY_WINDOW)?;
        let counts = self.store.interaction_counts(enrollment_id)?;
        let first_at = self.store.first_interaction_at(contact_id)?;
        Ok(assemble_context(
            &interactions,
            counts,
            first_at.as_deref(),
            Utc::now(),
        ))
    }
}

/// Pure assembly from already-loaded rows (tested directly).
pub fn assemble_context(
    interactions: &[Interaction],
    counts: cadence_store::types::InteractionCounts,
    first_contact_at: Option<&str>,
    now: DateTime<Utc>,
) -> ConversationContext {
    let mut ctx = ConversationContext {
        counts,
        ..Default::default()
    };

    // Last interaction summary per channel.
    for interaction in interactions {
        ctx.last_by_channel
            .insert(interaction.channel, summary_line(interaction));
    }

    // Deduplicated histories, most recent first.
    ctx.objections_history = dedup_recent(interactions.iter().rev().flat_map(|i| {
        i.objections
            .iter()
            .cloned()
            .chain(i.analysis.iter().flat_map(|a| {
                a.objections
                    .iter()
                    .map(|o| format!("{}: {}", o.kind, o.detail))
            }))
    }));
    ctx.key_topics_history =
        dedup_recent(interactions.iter().rev().flat_map(|i| i.key_topics.iter().cloned()));

    // Overall sentiment: majority class across the last K.
    let sentiments: Vec<Sentiment> = interactions
        .iter()
        .rev()
        .take(RECENT_WINDOW)
        .filter_map(|i| i.sentiment.as_deref().and_then(|s| s.parse().ok()))
        .collect();
    ctx.overall_sentiment = majority_sentiment(&sentiments);

    // Trend wants oldest-first ordering.
    let mut oldest_first = sentiments.clone();
    oldest_first.reverse();
    let trend = compute_trend(&oldest_first);

    if let Some(first) = first_contact_at.and_then(|s| DateTime::parse_from_rfc3339(s).ok()) {
        ctx.days_since_first_contact = (now - first.with_timezone(&Utc)).num_days().max(0);
    }
    if let Some(last) = interactions
        .last()
        .and_then(|i| DateTime::parse_from_rfc3339(&i.created_at).ok())
    {
        ctx.days_since_last_contact = (now - last.with_timezone(&Utc)).num_days().max(0);
    }

    ctx.last_analysis = interactions.iter().rev().find_map(|i| i.analysis.clone());
    ctx.formatted_timeline = format_timeline(interactions);

    // Flat template variables.
    let mut vars = HashMap::new();
    if let Some(last) = interactions.last() {
        vars.insert("last_channel_used".into(), last.channel.to_string());
    }
    vars.insert(
        "days_since_contact".into(),
        ctx.days_since_last_contact.to_string(),
    );
    vars.insert(
        "days_since_first_contact".into(),
        ctx.days_since_first_contact.to_string(),
    );
    vars.insert("total_touches".into(), ctx.counts.total.to_string());
    vars.insert(
        "overall_sentiment".into(),
        ctx.overall_sentiment.to_string(),
    );
    if let Some(reply) = interactions
        .iter()
        .rev()
        .find(|i| matches!(i.direction, Direction::Inbound))
    {
        if let Some(intent) = &reply.intent {
            vars.insert("last_reply_intent".into(), intent.clone());
        }
        vars.insert("last_reply_snippet".into(), snippet(&reply.content));
    }
    if let Some(call) = interactions
        .iter()
        .rev()
        .find(|i| matches!(i.channel, Channel::Voice))
    {
        if let Some(d) = &call.call_disposition {
            vars.insert("last_call_disposition".into(), d.clone());
        }
    }
    vars.insert("conversation_trend".into(), trend.to_string());
    ctx.variables = vars;

    ctx
}

fn summary_line(interaction: &Interaction) -> String {
    let arrow = match interaction.direction {
        Direction::Inbound => "in",
        Direction::Outbound => "out",
    };
    let outcome = interaction
        .outcome
        .as_deref()
        .map(|o| format!(" [{o}]"))
        .unwrap_or_default();
    format!(
        "{} {arrow}{outcome}: {}",
        interaction.channel,
        snippet(&interaction.content)
    )
}

fn format_timeline(interactions: &[Interaction]) -> String {
    let start = interactions.len().saturating_sub(TIMELINE_MAX_LINES);
    interactions[start..]
        .iter()
        .map(|i| {
            let day = i.created_at.get(..10).unwrap_or(&i.created_at);
            format!("{day} · {}", summary_line(i))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn snippet(content: &str) -> String {
    let trimmed = content.trim().replace('\n', " ");
    if trimmed.chars().count() <= SNIPPET_CHARS {
        trimmed
    } else {
        let cut: String = trimmed.chars().take(SNIPPET_CHARS).collect();
        format!("{cut}…")
    }
}

fn dedup_recent<I: Iterator<Item = String>>(items: I) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

fn majority_sentiment(sentiments: &[Sentiment]) -> Sentiment {
    let mut counts: HashMap<Sentiment, usize> = HashMap::new();
    for s in sentiments {
        *counts.entry(*s).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(s, _)| s)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::types::{ContactId, TenantId};
    use cadence_store::types::InteractionCounts;

    fn interaction(
        channel: Channel,
        direction: Direction,
        content: &str,
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
            content: content.into(),
            outcome: None,
            sentiment: sentiment.map(String::from),
            intent: Some("question".into()),
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
    fn empty_history_yields_uninformative_context() {
        let ctx = assemble_context(&[], InteractionCounts::default(), None, now());
        assert!(!ctx.is_informative());
        assert!(ctx.formatted_timeline.is_empty());
    }

    #[test]
    fn variables_cover_the_renderer_contract() {
        let rows = vec![
            interaction(
                Channel::Sms,
                Direction::Outbound,
                "following up on your quote",
                None,
                "2025-03-01T10:00:00+00:00",
            ),
            interaction(
                Channel::Sms,
                Direction::Inbound,
                "yes, what would it cost?",
                Some("interested"),
                "2025-03-08T10:00:00+00:00",
            ),
        ];
        let counts = InteractionCounts {
            total: 2,
            sms: 2,
            inbound: 1,
            outbound: 1,
            ..Default::default()
        };
        let ctx = assemble_context(&rows, counts, Some("2025-03-01T10:00:00+00:00"), now());

        assert_eq!(ctx.variables["last_channel_used"], "sms");
        assert_eq!(ctx.variables["days_since_contact"], "2");
        assert_eq!(ctx.variables["days_since_first_contact"], "9");
        assert_eq!(ctx.variables["last_reply_intent"], "question");
        assert!(ctx.is_informative());
    }

    #[test]
    fn timeline_is_bounded_and_chronological() {
        let rows: Vec<Interaction> = (0..30)
            .map(|i| {
                interaction(
                    Channel::Sms,
                    Direction::Outbound,
                    &format!("touch {i}"),
                    None,
                    &format!("2025-03-01T10:{i:02}:00+00:00"),
                )
            })
            .collect();
        let ctx = assemble_context(&rows, InteractionCounts::default(), None, now());
        let lines: Vec<&str> = ctx.formatted_timeline.lines().collect();
        assert_eq!(lines.len(), TIMELINE_MAX_LINES);
        assert!(lines[0].contains("touch 10"));
        assert!(lines.last().unwrap().contains("touch 29"));
    }

    #[test]
    fn objection_history_dedupes_most_recent_first() {
        let mut a = interaction(
            Channel::Sms,
            Direction::Inbound,
            "a",
            Some("objection"),
            "2025-03-01T10:00:00+00:00",
        );
        a.objections = vec!["price".into()];
        let mut b = interaction(
            Channel::Sms,
            Direction::Inbound,
            "b",
            Some("objection"),
            "2025-03-02T10:00:00+00:00",
        );
        b.objections = vec!["timing".into(), "price".into()];

        let ctx = assemble_context(&[a, b], InteractionCounts::default(), None, now());
        assert_eq!(ctx.objections_history, vec!["timing", "price"]);
    }

    #[test]
    fn long_content_is_snipped() {
        let long = "x".repeat(500);
        let row = interaction(
            Channel::Email,
            Direction::Outbound,
            &long,
            None,
            "2025-03-01T10:00:00+00:00",
        );
        let ctx = assemble_context(&[row], InteractionCounts::default(), None, now());
        let line = &ctx.last_by_channel[&Channel::Email];
        assert!(line.chars().count() < 120);
        assert!(line.ends_with('…'));
    }
}
