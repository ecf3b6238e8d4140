use healwatch_core::types::MonitoringEvent;
use std::collections::BTreeSet;

/// Width of a `service-time` bucket.
pub const SERVICE_TIME_BUCKET_MINUTES: i64 = 5;

/// Weak correlation keys carried by an event, sorted and deduplicated.
pub fn correlation_keys(event: &MonitoringEvent) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();

    if let Some(cid) = non_empty(event.correlation_id.as_deref()) {
        keys.insert(format!("correlation:{cid}"));
    }
    if let Some(tid) = non_empty(event.trace_id.as_deref()) {
        keys.insert(format!("trace:{tid}"));
    }
    if let Some(session) = context_value(event, &["sessionId"]) {
        keys.insert(format!("session:{session}"));
    }
    if let Some(user) = context_value(event, &["userEmail", "userId"]) {
        keys.insert(format!("user:{user}"));
    }
    if let Some(tx) = context_value(event, &["transactionId"]) {
        keys.insert(format!("transaction:{tx}"));
    }
    if !event.service_name.is_empty() {
        let bucket = event.timestamp.timestamp().div_euclid(60 * SERVICE_TIME_BUCKET_MINUTES);
        keys.insert(format!("service-time:{}:{bucket}", event.service_name));
    }
    if let Some(sig) = non_empty(event.error_signature.as_deref()) {
        keys.insert(format!("error:{sig}"));
    }
    keys
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// First present, non-empty business-context value among `names`.
fn context_value(event: &MonitoringEvent, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        event
            .business_context
            .get(*name)
            .map(|v| v.to_string())
            .filter(|v| !v.trim().is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use healwatch_core::types::{EventSource, Severity};

    #[test]
    fn test_keys_from_all_fields() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 10, 7, 30).unwrap();
        let mut event = MonitoringEvent::new(EventSource::Frontend, "js_error", Severity::High, "cart-service")
            .with_timestamp(ts)
            .with_trace("t-1", None)
            .with_business_context("sessionId", "S1")
            .with_business_context("userId", "u-9")
            .with_business_context("transactionId", "tx-4");
        event.error_signature = Some("abc".into());
        event.correlation_id = Some("c-1".into());

        let keys: Vec<String> = correlation_keys(&event).into_iter().collect();
        let bucket = ts.timestamp() / 300;
        assert_eq!(
            keys,
            vec![
                "correlation:c-1".to_string(),
                "error:abc".to_string(),
                format!("service-time:cart-service:{bucket}"),
                "session:S1".to_string(),
                "trace:t-1".to_string(),
                "transaction:tx-4".to_string(),
                "user:u-9".to_string(),
            ]
        );
    }

    #[test]
    fn test_user_email_preferred_over_id() {
        let event = MonitoringEvent::new(EventSource::Frontend, "page_view", Severity::Info, "web")
            .with_business_context("userId", "u-1")
            .with_business_context("userEmail", "a@shop.test");
        assert!(correlation_keys(&event).contains("user:a@shop.test"));
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let mut event = MonitoringEvent::new(EventSource::LoadTest, "latency", Severity::Low, "api")
            .with_business_context("sessionId", "  ");
        event.trace_id = Some(String::new());
        let keys = correlation_keys(&event);
        assert_eq!(keys.len(), 1);
        assert!(keys.iter().next().unwrap().starts_with("service-time:api:"));
    }
}
