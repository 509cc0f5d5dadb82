//! Template rendering: `{{key}}` substitution and the variable-binding
//! precedence chain.
//!
//! Rendering is deterministic, unicode-safe, and idempotent — substituted
//! values are never re-scanned, and unknown keys stay as literal
//! placeholders so a missing variable is visible in the output rather than
//! silently blanked.

use std::collections::HashMap;

use cadence_core::analysis::EmotionalState;
use cadence_core::types::StepContent;
use cadence_store::types::{Contact, Enrollment};

/// Substitute `{{key}}` placeholders from `vars`. Unknown keys are left
/// verbatim, `{{ key }}` spacing is tolerated.
pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find("}}") {
            Some(close) => {
                let raw_key = &after_open[..close];
                let key = raw_key.trim();
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(raw_key);
                        out.push_str("}}");
                    }
                }
                rest = &after_open[close + 2..];
            }
            None => {
                // Unterminated opener — emit the rest untouched.
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Render every text field of a content payload.
pub fn render_content(content: &StepContent, vars: &HashMap<String, String>) -> StepContent {
    match content {
        StepContent::Sms { body } => StepContent::Sms {
            body: render(body, vars),
        },
        StepContent::Email {
            subject,
            html,
            text,
        } => StepContent::Email {
            subject: render(subject, vars),
            html: render(html, vars),
            text: render(text, vars),
        },
        StepContent::Voice {
            first_message,
            system_prompt,
            assistant_id,
            overrides,
        } => StepContent::Voice {
            first_message: render(first_message, vars),
            system_prompt: render(system_prompt, vars),
            assistant_id: assistant_id.clone(),
            overrides: overrides.clone(),
        },
    }
}

/// Merge the variable sources in precedence order, lowest first: contact
/// core fields, contact custom fields, enrollment custom variables,
/// conversation-memory variables, tone variables from the cached emotional
/// state. Later sources overwrite earlier ones.
pub fn bind_variables(
    contact: &Contact,
    enrollment: &Enrollment,
    memory_vars: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut vars = HashMap::new();

    // 1. Contact core fields.
    vars.insert("name".into(), contact.display_name.clone());
    vars.insert("first_name".into(), first_name(&contact.display_name));
    if let Some(phone) = &contact.phone {
        vars.insert("phone".into(), phone.clone());
    }
    if let Some(email) = &contact.email {
        vars.insert("email".into(), email.clone());
    }
    if let Some(company) = &contact.company {
        vars.insert("company".into(), company.clone());
    }

    // 2. Contact custom fields.
    for (k, v) in &contact.custom_fields {
        vars.insert(k.clone(), v.clone());
    }

    // 3. Enrollment custom variables.
    for (k, v) in &enrollment.custom_variables {
        vars.insert(k.clone(), v.clone());
    }

    // 4. Conversation memory variables.
    for (k, v) in memory_vars {
        vars.insert(k.clone(), v.clone());
    }

    // 5. Tone variables from the cached emotional state.
    for (k, v) in tone_variables(&enrollment.emotional_state) {
        vars.insert(k, v);
    }

    vars
}

/// Tone directives the renderer and the voice prompt builder consume.
pub fn tone_variables(state: &EmotionalState) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert(
        "tone".into(),
        state
            .recommended_tone
            .map(|t| t.to_string())
            .unwrap_or_else(|| "professional".into()),
    );
    vars.insert("sentiment_trend".into(), state.sentiment_trend.to_string());
    vars.insert(
        "engagement_level".into(),
        match state.engagement_score {
            s if s >= 70 => "high",
            s if s >= 40 => "medium",
            _ => "low",
        }
        .into(),
    );
    if let Some(emotion) = state.last_emotion {
        vars.insert("last_emotion".into(), emotion.to_string());
    }
    vars
}

fn first_name(display_name: &str) -> String {
    display_name
        .split_whitespace()
        .next()
        .unwrap_or(display_name)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_known_keys() {
        let out = render(
            "Hi {{first_name}}, your {{thing}} is ready",
            &vars(&[("first_name", "Dana"), ("thing", "quote")]),
        );
        assert_eq!(out, "Hi Dana, your quote is ready");
    }

    #[test]
    fn unknown_keys_stay_literal() {
        let out = render("Hi {{first_name}}", &vars(&[]));
        assert_eq!(out, "Hi {{first_name}}");
    }

    #[test]
    fn spacing_inside_braces_is_tolerated() {
        let out = render("Hi {{ first_name }}", &vars(&[("first_name", "Dana")]));
        assert_eq!(out, "Hi Dana");
    }

    #[test]
    fn rendering_is_idempotent() {
        let v = vars(&[("a", "x")]);
        let once = render("{{a}} {{b}}", &v);
        let twice = render(&once, &v);
        assert_eq!(once, twice);
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        // A value containing a placeholder must not expand recursively.
        let v = vars(&[("a", "{{b}}"), ("b", "boom")]);
        assert_eq!(render("{{a}}", &v), "{{b}}");
    }

    #[test]
    fn unterminated_opener_is_left_alone() {
        let out = render("Hello {{first_name", &vars(&[("first_name", "Dana")]));
        assert_eq!(out, "Hello {{first_name");
    }

    #[test]
    fn unicode_content_survives() {
        let out = render(
            "¡Hola {{name}}! ☎ {{phone}}",
            &vars(&[("name", "José"), ("phone", "+34 600 000 000")]),
        );
        assert_eq!(out, "¡Hola José! ☎ +34 600 000 000");
    }

    #[test]
    fn tone_variables_reflect_state() {
        use cadence_core::analysis::{EmotionalState, RecommendedTone, SentimentTrend};
        let state = EmotionalState {
            sentiment_trend: SentimentTrend::Warming,
            recommended_tone: Some(RecommendedTone::Casual),
            engagement_score: 75,
            ..Default::default()
        };
        let v = tone_variables(&state);
        assert_eq!(v["tone"], "casual");
        assert_eq!(v["sentiment_trend"], "warming");
        assert_eq!(v["engagement_level"], "high");
    }
}
