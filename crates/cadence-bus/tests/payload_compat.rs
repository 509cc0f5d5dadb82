// Verify queue payload wire formats stay stable. Workers on older builds
// must keep decoding jobs enqueued by newer schedulers and vice versa.

use cadence_bus::types::{EventJob, HealingJob, JobEnvelope, ProviderEvent, VoiceJob};
use cadence_core::types::{Channel, FailureType, StepContent};

#[test]
fn voice_job_wire_shape() {
    let json = r#"{
        "id": "7e6c1f9a-0000-4000-8000-000000000001",
        "priority": 1,
        "attempt": 1,
        "enqueued_at": "2025-01-01T00:00:00+00:00",
        "payload": {
            "tenant_id": "t1",
            "enrollment_id": "e1",
            "step_id": "st3",
            "step_order": 3,
            "contact_id": "c1",
            "phone": "+15551234567",
            "content": {
                "channel": "voice",
                "first_message": "Hi Dana, following up on the roof quote.",
                "system_prompt": "You are a scheduling assistant."
            },
            "priority": 1
        }
    }"#;

    let envelope: JobEnvelope<VoiceJob> = serde_json::from_str(json).unwrap();
    assert_eq!(envelope.priority, 1);
    assert_eq!(envelope.payload.step_order, 3);
    // retry is additive with a default — old producers omit it.
    assert_eq!(envelope.payload.retry, 0);
    assert!(matches!(envelope.payload.content, StepContent::Voice { .. }));
}

#[test]
fn voice_content_never_leaks_sms_fields() {
    // An sms body masquerading as voice content must fail to decode.
    let json = r#"{"channel":"voice","body":"hi"}"#;
    assert!(serde_json::from_str::<StepContent>(json).is_err());
}

#[test]
fn call_outcome_event_wire_shape() {
    let json = r#"{
        "kind": "call-outcome",
        "call_id": "call-42",
        "disposition": "answered",
        "duration_secs": 95,
        "transcript": "hello ... yes, Tuesday works",
        "appointment_booked": true,
        "ended_reason": "hangup",
        "tenant_id": "t1",
        "umbrella_id": "u1",
        "enrollment_id": "e1"
    }"#;

    let event: ProviderEvent = serde_json::from_str(json).unwrap();
    match event {
        ProviderEvent::CallOutcome {
            call_id,
            appointment_booked,
            duration_secs,
            ..
        } => {
            assert_eq!(call_id, "call-42");
            assert!(appointment_booked);
            assert_eq!(duration_secs, 95);
        }
        other => panic!("expected call-outcome, got {other:?}"),
    }
}

#[test]
fn sms_reply_event_minimal_fields() {
    // Inbound SMS webhooks may lack the metadata envelope entirely.
    let json = r#"{
        "kind": "sms-reply",
        "provider_id": "msg-9",
        "from_phone": "+15551234567",
        "body": "STOP",
        "tenant_id": null,
        "enrollment_id": null
    }"#;
    let event: ProviderEvent = serde_json::from_str(json).unwrap();
    assert!(matches!(event, ProviderEvent::SmsReply { .. }));
}

#[test]
fn event_job_envelope_round_trip() {
    let job = EventJob {
        event: ProviderEvent::EmailBounced {
            provider_id: "em-1".into(),
            tenant_id: Some("t1".into()),
            enrollment_id: Some("e1".into()),
            step_order: Some(2),
        },
    };
    let json = serde_json::to_string(&job).unwrap();
    assert!(json.contains(r#""kind":"email-bounced""#));
    let back: EventJob = serde_json::from_str(&json).unwrap();
    assert!(matches!(back.event, ProviderEvent::EmailBounced { .. }));
}

#[test]
fn healing_job_carries_typed_failure() {
    let job = HealingJob {
        enrollment_id: "e1".into(),
        step_order: 2,
        channel: Channel::Voice,
        failure_type: FailureType::LandlineDetected,
        detail: "provider lookup: line_type=landline".into(),
        context: Default::default(),
    };
    let json = serde_json::to_string(&job).unwrap();
    assert!(json.contains(r#""failure_type":"landline_detected""#));
    assert!(json.contains(r#""channel":"voice""#));

    let back: HealingJob = serde_json::from_str(&json).unwrap();
    assert_eq!(back.failure_type, FailureType::LandlineDetected);
}
