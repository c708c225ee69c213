//! Mirrors canonical events into a per-run Redis Stream (`stream:{run_id}`)
//! so multiple concurrent readers can follow a run and reconnect without
//! losing history.
//!
//! Mirroring is pure side effect: failures are logged and swallowed, never
//! propagated to the client-facing event stream (distilled §4.8).

use ic_domain::stream::CanonicalEvent;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;

/// Approximate cap enforced with `MAXLEN ~`.
const STREAM_MAXLEN: usize = 1000;

pub struct StreamFanOut {
    conn: Option<ConnectionManager>,
    ttl_seconds: u64,
}

impl StreamFanOut {
    pub async fn connect(url: &str, ttl_seconds: u64) -> Result<Self, redis::RedisError> {
        if url.is_empty() {
            return Ok(Self {
                conn: None,
                ttl_seconds,
            });
        }
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn: Some(conn),
            ttl_seconds,
        })
    }

    pub fn disabled() -> Self {
        Self {
            conn: None,
            ttl_seconds: 3600,
        }
    }

    fn stream_key(run_id: &str) -> String {
        format!("stream:{run_id}")
    }

    fn ttl_set_key(run_id: &str) -> String {
        format!("stream:{run_id}::ttl_set")
    }

    /// Mirror one canonical event. Never propagates a failure — a broken
    /// Redis mirror must not take down the client-facing turn.
    pub async fn publish(&self, run_id: &str, event: &CanonicalEvent) {
        let Some(conn) = &self.conn else {
            return;
        };
        if let Err(e) = self.publish_inner(conn, run_id, event).await {
            tracing::warn!(run_id, error = %e, "stream fan-out publish failed");
        }
    }

    async fn publish_inner(
        &self,
        conn: &ConnectionManager,
        run_id: &str,
        event: &CanonicalEvent,
    ) -> Result<(), redis::RedisError> {
        let mut conn = conn.clone();
        let key = Self::stream_key(run_id);
        let fields = flatten_event(event);

        let field_refs: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let _: String = redis::cmd("XADD")
            .arg(&key)
            .arg("MAXLEN")
            .arg("~")
            .arg(STREAM_MAXLEN)
            .arg("*")
            .arg(&field_refs)
            .query_async(&mut conn)
            .await?;

        self.ensure_ttl(&mut conn, run_id, &key).await?;
        Ok(())
    }

    /// Issues `EXPIRE` on the stream exactly once per stream, guarded by
    /// the `stream:{run_id}::ttl_set` sentinel.
    async fn ensure_ttl(
        &self,
        conn: &mut ConnectionManager,
        run_id: &str,
        stream_key: &str,
    ) -> Result<(), redis::RedisError> {
        let sentinel = Self::ttl_set_key(run_id);
        let already_set: bool = conn.exists(&sentinel).await?;
        if already_set {
            return Ok(());
        }
        let _: () = conn.expire(stream_key, self.ttl_seconds as i64).await?;
        let _: () = conn.set_ex(&sentinel, "1", self.ttl_seconds).await?;
        Ok(())
    }
}

/// Flattens a [`CanonicalEvent`] into string fields for `XADD`.
///
/// Rules: nested objects/arrays are JSON-encoded to strings; `null` becomes
/// `""`; booleans become the Rust-idiomatic `"true"`/`"false"` (a deliberate
/// deviation from the Python reference's capitalized `"True"`/`"False"`);
/// other scalars pass through via their natural string form.
fn flatten_event(event: &CanonicalEvent) -> Vec<(String, String)> {
    let value = serde_json::to_value(event).unwrap_or(Value::Null);
    let Value::Object(map) = value else {
        return Vec::new();
    };
    map.into_iter()
        .map(|(k, v)| (k, flatten_value(v)))
        .collect()
}

fn flatten_value(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        obj @ (Value::Object(_) | Value::Array(_)) => {
            serde_json::to_string(&obj).unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ic_domain::stream::RunPhase;

    #[test]
    fn flatten_status_event_has_scalar_fields() {
        let event = CanonicalEvent::Status {
            status: RunPhase::Started,
            run_id: "run_1".into(),
        };
        let fields = flatten_event(&event);
        let map: std::collections::HashMap<_, _> = fields.into_iter().collect();
        assert_eq!(map.get("type").unwrap(), "status");
        assert_eq!(map.get("status").unwrap(), "started");
        assert_eq!(map.get("run_id").unwrap(), "run_1");
    }

    #[test]
    fn flatten_tool_call_event_json_encodes_arguments() {
        let event = CanonicalEvent::ToolCall {
            name: "code_interpreter".into(),
            arguments: serde_json::json!({"code": "print(1)", "timeout": null}),
        };
        let fields = flatten_event(&event);
        let map: std::collections::HashMap<_, _> = fields.into_iter().collect();
        let args = map.get("arguments").unwrap();
        assert!(args.contains("\"code\":\"print(1)\""));
        // nested null stays a JSON null inside the encoded object, only the
        // top-level flatten maps bare null to "".
        assert!(args.contains("null"));
    }

    #[test]
    fn flatten_value_uses_lowercase_booleans() {
        assert_eq!(flatten_value(Value::Bool(true)), "true");
        assert_eq!(flatten_value(Value::Bool(false)), "false");
    }

    #[test]
    fn flatten_value_maps_null_to_empty_string() {
        assert_eq!(flatten_value(Value::Null), "");
    }

    #[test]
    fn stream_key_and_ttl_sentinel_format() {
        assert_eq!(StreamFanOut::stream_key("run_9"), "stream:run_9");
        assert_eq!(
            StreamFanOut::ttl_set_key("run_9"),
            "stream:run_9::ttl_set"
        );
    }

    #[tokio::test]
    async fn disabled_fanout_publish_is_a_noop() {
        let fanout = StreamFanOut::disabled();
        let event = CanonicalEvent::Content { text: "hi".into() };
        // Must not panic and must not block on any network I/O.
        fanout.publish("run_1", &event).await;
    }
}
