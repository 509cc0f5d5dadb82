//! Webhook ingress. The handlers' only responsibilities are signature
//! verification, payload normalization, and enqueueing onto the events
//! queue — with two exceptions the contract makes synchronous: the
//! concurrency sync (clamps UCM counters in place) and the inbound
//! assistant request (must answer with an assistant config).

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, warn};

use cadence_bus::{EventJob, ProviderEvent, QueueName};
use cadence_core::config::WebhookAuthMode;

use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

type HandlerResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

// ── Voice call events ─────────────────────────────────────────────────────

/// POST /webhooks/voice/call-events
///
/// Recognized `message.type` values: `status-update` (status `ended`
/// triggers an outcome), `end-of-call-report`, `function-call`
/// (`book_appointment` fast path), `assistant-request` (synchronous
/// response for inbound calls).
pub async fn voice_call_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    authenticate(&state, &headers, &body)?;
    let payload = parse_json(&body)?;

    let message = &payload["message"];
    let message_type = message["type"].as_str().unwrap_or_default();
    debug!(message_type, "voice webhook arrived");

    match message_type {
        "status-update" => {
            if message["status"].as_str() == Some("ended")
                || message["call"]["status"].as_str() == Some("ended")
            {
                let event = call_outcome_from(message);
                enqueue_event(&state, event).await?;
            }
            Ok(Json(json!({"ok": true})))
        }
        "end-of-call-report" => {
            let event = call_outcome_from(message);
            enqueue_event(&state, event).await?;
            Ok(Json(json!({"ok": true})))
        }
        "function-call" => {
            let name = message["functionCall"]["name"].as_str().unwrap_or_default();
            if name == "book_appointment" {
                let mut event = call_outcome_from(message);
                if let ProviderEvent::CallOutcome {
                    ref mut appointment_booked,
                    ref mut disposition,
                    ..
                } = event
                {
                    *appointment_booked = true;
                    if disposition.is_empty() {
                        *disposition = "answered".into();
                    }
                }
                enqueue_event(&state, event).await?;
            }
            Ok(Json(json!({"ok": true})))
        }
        "assistant-request" => assistant_request(&state, message),
        other => {
            debug!(message_type = other, "unrecognized voice event type, acknowledging");
            Ok(Json(json!({"ok": true, "ignored": true})))
        }
    }
}

/// Build a normalized call outcome from either the status-update or the
/// end-of-call-report shape.
fn call_outcome_from(message: &Value) -> ProviderEvent {
    let call = &message["call"];
    let metadata = &call["metadata"];
    let duration = message["durationSeconds"]
        .as_i64()
        .or_else(|| call["durationSeconds"].as_i64())
        .unwrap_or(0);
    let booked = message["analysis"]["structuredData"]["appointment_booked"]
        .as_bool()
        .unwrap_or(false);

    ProviderEvent::CallOutcome {
        call_id: call["id"].as_str().unwrap_or_default().to_string(),
        disposition: message["analysis"]["disposition"]
            .as_str()
            .or_else(|| message["disposition"].as_str())
            .unwrap_or_default()
            .to_string(),
        duration_secs: duration,
        transcript: message["transcript"].as_str().unwrap_or_default().to_string(),
        appointment_booked: booked,
        ended_reason: message["endedReason"].as_str().unwrap_or_default().to_string(),
        tenant_id: metadata["tenantId"].as_str().map(String::from),
        umbrella_id: metadata["umbrellaId"].as_str().map(String::from),
        enrollment_id: metadata["enrollmentId"].as_str().map(String::from),
    }
}

/// Synchronous assistant config for an inbound call: org → umbrella →
/// contact by caller number.
fn assistant_request(state: &Arc<AppState>, message: &Value) -> HandlerResult {
    let org_id = message["call"]["orgId"].as_str().unwrap_or_default();
    let caller = message["call"]["customer"]["number"]
        .as_str()
        .unwrap_or_default();

    let umbrella = state
        .store
        .umbrella_by_org(org_id)
        .map_err(internal_error)?
        .ok_or_else(|| {
            warn!(org_id, "assistant request for unknown org");
            (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "unknown organization"})),
            )
        })?;

    let contact = state
        .store
        .contact_by_phone_for_umbrella(caller, umbrella.id.as_str())
        .map_err(internal_error)?;

    let (greeting, context) = match &contact {
        Some(c) => (
            format!(
                "Hi{}! Thanks for calling back.",
                if c.display_name.is_empty() {
                    String::new()
                } else {
                    format!(" {}", first_name(&c.display_name))
                }
            ),
            c.conversation_summary.clone().unwrap_or_default(),
        ),
        None => ("Hi! Thanks for calling.".to_string(), String::new()),
    };

    let mut system_prompt = String::from(
        "You are a friendly assistant handling an inbound call from a \
         contact in an active follow-up conversation. Help them book or \
         reschedule, and answer their questions.",
    );
    if !context.is_empty() {
        system_prompt.push_str("\n\n## What we know\n");
        system_prompt.push_str(&context);
    }

    info!(org_id, known_contact = contact.is_some(), "assistant request served");
    Ok(Json(json!({
        "assistant": {
            "firstMessage": greeting,
            "model": { "systemPrompt": system_prompt },
        }
    })))
}

// ── Concurrency sync ──────────────────────────────────────────────────────

/// POST /webhooks/voice/concurrency-sync — `{orgId, current, limit,
/// timestamp}`. Maps the org to an umbrella (404 when unknown) and clamps
/// the UCM counters to provider truth.
pub async fn voice_concurrency_sync(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    authenticate(&state, &headers, &body)?;
    let payload = parse_json(&body)?;

    let org_id = payload["orgId"].as_str().unwrap_or_default();
    let current = payload["current"].as_u64().unwrap_or(0) as u32;
    let limit = payload["limit"].as_u64().unwrap_or(0) as u32;

    let umbrella = state
        .store
        .umbrella_by_org(org_id)
        .map_err(internal_error)?
        .ok_or_else(|| {
            warn!(org_id, "concurrency sync for unknown org");
            (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "unknown organization"})),
            )
        })?;

    state
        .coordinator
        .sync_from_webhook(umbrella.id.as_str(), current, limit)
        .await
        .map_err(internal_error)?;
    state
        .store
        .record_umbrella_sync(umbrella.id.as_str(), current, limit)
        .map_err(internal_error)?;

    Ok(Json(json!({"ok": true})))
}

// ── SMS and email ─────────────────────────────────────────────────────────

/// POST /webhooks/sms — inbound messages and delivery reports, told apart
/// by shape: a delivery report carries `status`, an inbound message a
/// `body`.
pub async fn sms_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    authenticate(&state, &headers, &body)?;
    let payload = parse_json(&body)?;
    let metadata = &payload["metadata"];

    let event = if payload["status"].is_string() {
        ProviderEvent::SmsDelivery {
            provider_id: payload["messageId"]
                .as_str()
                .or_else(|| payload["id"].as_str())
                .unwrap_or_default()
                .to_string(),
            status: payload["status"].as_str().unwrap_or_default().to_string(),
            tenant_id: metadata["tenantId"].as_str().map(String::from),
            enrollment_id: metadata["enrollmentId"].as_str().map(String::from),
            step_order: metadata["stepOrder"].as_u64().map(|v| v as u32),
        }
    } else if payload["body"].is_string() {
        ProviderEvent::SmsReply {
            provider_id: payload["messageId"]
                .as_str()
                .or_else(|| payload["id"].as_str())
                .unwrap_or_default()
                .to_string(),
            from_phone: payload["from"].as_str().unwrap_or_default().to_string(),
            body: payload["body"].as_str().unwrap_or_default().to_string(),
            tenant_id: metadata["tenantId"].as_str().map(String::from),
            enrollment_id: metadata["enrollmentId"].as_str().map(String::from),
        }
    } else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unrecognized sms webhook shape"})),
        ));
    };

    enqueue_event(&state, event).await?;
    Ok(Json(json!({"ok": true})))
}

/// POST /webhooks/email — opens, clicks, bounces.
pub async fn email_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    authenticate(&state, &headers, &body)?;
    let payload = parse_json(&body)?;
    let metadata = &payload["metadata"];

    let provider_id = payload["messageId"]
        .as_str()
        .or_else(|| payload["id"].as_str())
        .unwrap_or_default()
        .to_string();
    let tenant_id = metadata["tenantId"].as_str().map(String::from);
    let enrollment_id = metadata["enrollmentId"].as_str().map(String::from);

    let event = match payload["event"].as_str().unwrap_or_default() {
        "opened" => ProviderEvent::EmailOpened {
            provider_id,
            tenant_id,
            enrollment_id,
        },
        "clicked" => ProviderEvent::EmailClicked {
            provider_id,
            tenant_id,
            enrollment_id,
        },
        "bounced" => ProviderEvent::EmailBounced {
            provider_id,
            tenant_id,
            enrollment_id,
            step_order: metadata["stepOrder"].as_u64().map(|v| v as u32),
        },
        other => {
            debug!(event = other, "unrecognized email event, acknowledging");
            return Ok(Json(json!({"ok": true, "ignored": true})));
        }
    };

    enqueue_event(&state, event).await?;
    Ok(Json(json!({"ok": true})))
}

// ── Shared helpers ────────────────────────────────────────────────────────

async fn enqueue_event(
    state: &Arc<AppState>,
    event: ProviderEvent,
) -> Result<(), (StatusCode, Json<Value>)> {
    state
        .bus
        .enqueue(QueueName::Events, &EventJob { event }, 5, 0)
        .await
        .map_err(internal_error)?;
    Ok(())
}

fn parse_json(body: &Bytes) -> Result<Value, (StatusCode, Json<Value>)> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "invalid JSON in webhook body");
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid JSON body"})),
        )
    })
}

/// Authenticate the request according to the configured mode.
fn authenticate(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<(), (StatusCode, Json<Value>)> {
    let cfg = &state.config.webhooks;
    let result = match cfg.auth_mode {
        WebhookAuthMode::HmacSha256 => verify_hmac_sha256(headers, body, cfg.secret.as_deref()),
        WebhookAuthMode::BearerToken => verify_bearer_token(headers, cfg.secret.as_deref()),
        WebhookAuthMode::None => Ok(()),
    };
    result.map_err(|reason| {
        warn!(reason = %reason, "webhook authentication failed");
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "authentication failed", "reason": reason})),
        )
    })
}

/// Verify `sha256=<hex>` in x-cadence-signature over the raw body.
fn verify_hmac_sha256(headers: &HeaderMap, body: &Bytes, secret: Option<&str>) -> Result<(), String> {
    let secret = secret.ok_or_else(|| "no signing secret configured".to_string())?;

    let sig_header = headers
        .get("x-cadence-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing x-cadence-signature header".to_string())?;

    let sig_hex = sig_header
        .strip_prefix("sha256=")
        .ok_or_else(|| "malformed x-cadence-signature header".to_string())?;

    let expected =
        hex::decode(sig_hex).map_err(|_| "x-cadence-signature is not valid hex".to_string())?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| "invalid HMAC key length".to_string())?;
    mac.update(body);

    mac.verify_slice(&expected)
        .map_err(|_| "HMAC signature mismatch".to_string())
}

/// Verify a static bearer token in the `Authorization: Bearer <token>` header.
fn verify_bearer_token(headers: &HeaderMap, secret: Option<&str>) -> Result<(), String> {
    let expected = secret.ok_or_else(|| "no bearer token configured".to_string())?;

    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing Authorization header".to_string())?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| "Authorization header must use Bearer scheme".to_string())?;

    if token == expected {
        Ok(())
    } else {
        Err("bearer token mismatch".to_string())
    }
}

fn internal_error<E: std::fmt::Display>(e: E) -> (StatusCode, Json<Value>) {
    warn!(error = %e, "webhook handler internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal error"})),
    )
}

fn first_name(display_name: &str) -> &str {
    display_name.split_whitespace().next().unwrap_or(display_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_outcome_parses_end_of_call_report() {
        let message = json!({
            "type": "end-of-call-report",
            "endedReason": "hangup",
            "durationSeconds": 95,
            "transcript": "hello ... yes Tuesday works",
            "analysis": { "structuredData": { "appointment_booked": true } },
            "call": {
                "id": "call-42",
                "metadata": {
                    "tenantId": "t1",
                    "umbrellaId": "u1",
                    "enrollmentId": "e1"
                }
            }
        });
        let event = call_outcome_from(&message);
        match event {
            ProviderEvent::CallOutcome {
                call_id,
                duration_secs,
                appointment_booked,
                tenant_id,
                umbrella_id,
                enrollment_id,
                ..
            } => {
                assert_eq!(call_id, "call-42");
                assert_eq!(duration_secs, 95);
                assert!(appointment_booked);
                assert_eq!(tenant_id.as_deref(), Some("t1"));
                assert_eq!(umbrella_id.as_deref(), Some("u1"));
                assert_eq!(enrollment_id.as_deref(), Some("e1"));
            }
            other => panic!("expected call outcome, got {other:?}"),
        }
    }

    #[test]
    fn call_outcome_tolerates_missing_fields() {
        let message = json!({ "type": "status-update", "call": { "id": "call-1" } });
        let event = call_outcome_from(&message);
        match event {
            ProviderEvent::CallOutcome {
                call_id,
                duration_secs,
                appointment_booked,
                tenant_id,
                ..
            } => {
                assert_eq!(call_id, "call-1");
                assert_eq!(duration_secs, 0);
                assert!(!appointment_booked);
                assert!(tenant_id.is_none());
            }
            other => panic!("expected call outcome, got {other:?}"),
        }
    }

    #[test]
    fn hmac_verification_round_trip() {
        let secret = "webhook-secret";
        let body = Bytes::from_static(b"{\"ok\":true}");

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(&body);
        let sig = hex::encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-cadence-signature",
            format!("sha256={sig}").parse().unwrap(),
        );
        assert!(verify_hmac_sha256(&headers, &body, Some(secret)).is_ok());

        // Tampered body fails.
        let tampered = Bytes::from_static(b"{\"ok\":false}");
        assert!(verify_hmac_sha256(&headers, &tampered, Some(secret)).is_err());
    }

    #[test]
    fn bearer_verification() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer tok-1".parse().unwrap());
        assert!(verify_bearer_token(&headers, Some("tok-1")).is_ok());
        assert!(verify_bearer_token(&headers, Some("tok-2")).is_err());
        assert!(verify_bearer_token(&HeaderMap::new(), Some("tok-1")).is_err());
    }
}
