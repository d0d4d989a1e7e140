//! Wire shapes: decoding of the client-features response and encoding of the context and metrics
//! request bodies.
//!
//! Decoding is deliberately tolerant. A malformed toggle entry is skipped rather than failing the
//! whole response, and wrong-typed scalar fields fall back to their defaults. This per-field
//! fallback is stricter than what a derived `Deserialize` can express, so the response is walked
//! as a [`serde_json::Value`] tree.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::context::Context;
use crate::metrics::MetricList;
use crate::toggles::{Toggle, ToggleSet, Variant, VariantPayload};

/// Decode a client-features response body into a [`ToggleSet`].
///
/// Unparseable text and parseable-but-malformed payloads both yield an empty set; empty is the
/// designed fallback, not an error. Entries without a non-empty string `"name"` are skipped.
/// `"enabled"` and `"impressionData"` default to `false` when absent or wrong-typed. A disabled
/// toggle is always recorded with the disabled variant, even when the response carries a variant
/// for it; this matches what the server's other SDKs do and is required for wire compatibility.
pub fn decode_client_features(body: &str) -> ToggleSet {
    let root: Value = match serde_json::from_str(body) {
        Ok(root) => root,
        Err(err) => {
            log::warn!(target: "unleash", "features response is not valid json: {err}");
            return ToggleSet::new();
        }
    };

    let Some(toggles) = root.get("toggles") else {
        log::warn!(target: "unleash", "features response has no \"toggles\" field");
        return ToggleSet::new();
    };
    let Some(toggles) = toggles.as_array() else {
        log::warn!(target: "unleash", "features response \"toggles\" field is not an array");
        return ToggleSet::new();
    };

    toggles.iter().filter_map(decode_toggle).collect()
}

fn decode_toggle(entry: &Value) -> Option<Toggle> {
    let entry = entry.as_object()?;

    let name = entry.get("name")?.as_str().filter(|name| !name.is_empty())?;
    let enabled = entry
        .get("enabled")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let impression_data = entry
        .get("impressionData")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    // A disabled toggle keeps the disabled variant regardless of any variant in the response.
    if !enabled {
        return Some(Toggle::new(name, false, impression_data, None));
    }

    let variant = entry.get("variant").and_then(decode_variant);
    Some(Toggle::new(name, enabled, impression_data, variant))
}

fn decode_variant(value: &Value) -> Option<Variant> {
    let variant = value.as_object()?;

    let name = variant
        .get("name")?
        .as_str()
        .filter(|name| !name.is_empty())?;
    let enabled = variant.get("enabled")?.as_bool().filter(|enabled| *enabled)?;

    let payload = variant.get("payload").and_then(decode_payload);
    Some(Variant::new(name, enabled, payload))
}

fn decode_payload(value: &Value) -> Option<VariantPayload> {
    let payload = value.as_object()?;

    let payload_type = payload
        .get("type")?
        .as_str()
        .filter(|payload_type| !payload_type.is_empty())?;
    let payload_value = payload.get("value")?.as_str()?;

    Some(VariantPayload::new(payload_type, payload_value))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextPayload<'a> {
    app_name: &'a str,
    session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_address: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_time: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<BTreeMap<&'a str, &'a str>>,
}

#[derive(Serialize)]
struct ContextEnvelope<'a> {
    context: ContextPayload<'a>,
}

/// Encode the evaluation context as a features request body. Absent optional fields are omitted
/// entirely, not emitted as null.
pub fn encode_context(context: &Context) -> String {
    let properties = (!context.properties().is_empty()).then(|| {
        context
            .properties()
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect()
    });

    let envelope = ContextEnvelope {
        context: ContextPayload {
            app_name: context.app_name(),
            session_id: context.session_id(),
            environment: context.environment(),
            user_id: context.user_id(),
            remote_address: context.remote_address(),
            current_time: context.current_time(),
            properties,
        },
    };

    // String-keyed structs cannot fail to serialize.
    serde_json::to_string(&envelope).expect("context payload serialization should not fail")
}

#[derive(Serialize)]
struct ToggleCounters<'a> {
    yes: u64,
    no: u64,
    variants: BTreeMap<&'a str, u64>,
}

#[derive(Serialize)]
struct MetricsBucket<'a> {
    start: &'a str,
    stop: &'a str,
    toggles: BTreeMap<&'a str, ToggleCounters<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsEnvelope<'a> {
    bucket: MetricsBucket<'a>,
    app_name: &'a str,
    instance_id: &'a str,
}

/// Encode a drained metrics bucket as a metrics request body.
pub fn encode_metrics(
    metrics: &MetricList,
    start: &str,
    stop: &str,
    app_name: &str,
    instance_id: &str,
) -> String {
    let toggles = metrics
        .iter()
        .map(|(name, toggle)| {
            let counters = ToggleCounters {
                yes: toggle.yes_count(),
                no: toggle.no_count(),
                variants: toggle
                    .variant_stats()
                    .iter()
                    .map(|(variant, count)| (variant.as_str(), *count))
                    .collect(),
            };
            (name, counters)
        })
        .collect();

    let envelope = MetricsEnvelope {
        bucket: MetricsBucket { start, stop, toggles },
        app_name,
        instance_id,
    };

    // String-keyed structs cannot fail to serialize.
    serde_json::to_string(&envelope).expect("metrics payload serialization should not fail")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{decode_client_features, encode_context, encode_metrics};
    use crate::context::Context;
    use crate::metrics::MetricList;
    use crate::toggles::{Variant, VariantPayload};

    #[test]
    fn unparseable_text_yields_an_empty_set() {
        assert!(decode_client_features("not json at all").is_empty());
    }

    #[test]
    fn missing_or_wrong_typed_toggles_field_yields_an_empty_set() {
        assert!(decode_client_features(r#"{"version":1}"#).is_empty());
        assert!(decode_client_features(r#"{"toggles":{"a":1}}"#).is_empty());
        assert!(decode_client_features(r#"[1,2,3]"#).is_empty());
    }

    #[test]
    fn entries_without_a_name_are_skipped() {
        let set = decode_client_features(
            r#"{"toggles":[
                {"enabled":true},
                {"name":"","enabled":true},
                {"name":7,"enabled":true},
                "not-an-object",
                {"name":"kept","enabled":true}
            ]}"#,
        );

        assert_eq!(set.len(), 1);
        assert!(set.is_enabled("kept"));
    }

    #[test]
    fn scalar_fields_default_to_false_when_absent_or_wrong_typed() {
        let set = decode_client_features(
            r#"{"toggles":[
                {"name":"a"},
                {"name":"b","enabled":"yes","impressionData":1}
            ]}"#,
        );

        assert!(!set.is_enabled("a"));
        assert!(!set.is_enabled("b"));
        assert!(!set.impression_data("b"));
    }

    #[test]
    fn disabled_toggle_forces_the_disabled_variant() {
        let set = decode_client_features(
            r#"{"toggles":[{"name":"f","enabled":false,"variant":{"name":"v","enabled":true}}]}"#,
        );

        assert!(!set.is_enabled("f"));
        assert_eq!(set.variant("f"), Variant::disabled());
    }

    #[test]
    fn duplicate_names_keep_the_first_entry() {
        let set = decode_client_features(
            r#"{"toggles":[
                {"name":"dup","enabled":true,"variant":{"name":"A","enabled":true}},
                {"name":"dup","enabled":false}
            ]}"#,
        );

        assert_eq!(set.len(), 1);
        assert!(set.is_enabled("dup"));
        assert_eq!(set.variant("dup").name(), "A");
    }

    #[test]
    fn malformed_variants_fall_back_to_the_disabled_variant() {
        let set = decode_client_features(
            r#"{"toggles":[
                {"name":"no-name","enabled":true,"variant":{"enabled":true}},
                {"name":"empty-name","enabled":true,"variant":{"name":"","enabled":true}},
                {"name":"not-enabled","enabled":true,"variant":{"name":"v","enabled":false}},
                {"name":"wrong-type","enabled":true,"variant":{"name":"v","enabled":"true"}},
                {"name":"not-object","enabled":true,"variant":"v"}
            ]}"#,
        );

        for name in ["no-name", "empty-name", "not-enabled", "wrong-type", "not-object"] {
            assert!(set.is_enabled(name), "{name} should be enabled");
            assert_eq!(set.variant(name), Variant::disabled(), "{name} variant");
        }
    }

    #[test]
    fn malformed_payloads_keep_the_variant_without_a_payload() {
        let set = decode_client_features(
            r#"{"toggles":[
                {"name":"a","enabled":true,
                 "variant":{"name":"v","enabled":true,"payload":{"type":"","value":"x"}}},
                {"name":"b","enabled":true,
                 "variant":{"name":"v","enabled":true,"payload":{"type":"string"}}},
                {"name":"c","enabled":true,
                 "variant":{"name":"v","enabled":true,"payload":"raw"}},
                {"name":"d","enabled":true,
                 "variant":{"name":"v","enabled":true,"payload":{"type":"string","value":"on"}}}
            ]}"#,
        );

        for name in ["a", "b", "c"] {
            let variant = set.variant(name);
            assert_eq!(variant.name(), "v");
            assert_eq!(variant.payload(), None, "{name} payload");
        }
        assert_eq!(
            set.variant("d").payload(),
            Some(&VariantPayload::new("string", "on"))
        );
    }

    #[test]
    fn context_encoding_omits_absent_fields() {
        let context = Context::new("my-app", "", "session-1");
        let encoded: serde_json::Value = serde_json::from_str(&encode_context(&context)).unwrap();

        assert_eq!(
            encoded,
            json!({"context": {"appName": "my-app", "sessionId": "session-1"}})
        );
    }

    #[test]
    fn context_encoding_includes_present_fields() {
        let mut context = Context::new("my-app", "production", "session-1");
        context
            .set_user_id("user-1")
            .set_remote_address("10.0.0.1")
            .set_current_time("2024-05-01T10:00:00+00:00")
            .set_property("plan", "premium");

        let encoded: serde_json::Value = serde_json::from_str(&encode_context(&context)).unwrap();

        assert_eq!(
            encoded,
            json!({"context": {
                "appName": "my-app",
                "sessionId": "session-1",
                "environment": "production",
                "userId": "user-1",
                "remoteAddress": "10.0.0.1",
                "currentTime": "2024-05-01T10:00:00+00:00",
                "properties": {"plan": "premium"}
            }})
        );
    }

    #[test]
    fn metrics_encoding_matches_the_wire_shape() {
        let mut metrics = MetricList::new();
        metrics.add_enable("flag", true);
        metrics.add_enable("flag", false);
        metrics.add_variant("flag", true, "blue");

        let encoded = encode_metrics(
            &metrics,
            "2024-05-01T10:00:00.000Z",
            "2024-05-01T10:01:00.000Z",
            "my-app",
            "instance-1",
        );
        let encoded: serde_json::Value = serde_json::from_str(&encoded).unwrap();

        assert_eq!(
            encoded,
            json!({
                "bucket": {
                    "start": "2024-05-01T10:00:00.000Z",
                    "stop": "2024-05-01T10:01:00.000Z",
                    "toggles": {
                        "flag": {"yes": 2, "no": 1, "variants": {"blue": 1}}
                    }
                },
                "appName": "my-app",
                "instanceId": "instance-1"
            })
        );
    }
}
