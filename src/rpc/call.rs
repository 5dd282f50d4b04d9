//! Declarative outbound calls bound to a topic and a record type.

use std::future::Future;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::error;

use crate::agent::ExtensibleAgent;
use crate::error::RpcError;
use crate::extensions::get_state;
use crate::rpc::RPC_HELPER;
use crate::rpc::helper::RpcHelper;
use crate::rpc::payload::ensure_id;

/// Input accepted by [`RpcCall::invoke`] besides keyword fields.
#[derive(Debug, Clone)]
pub enum CallInput<T> {
    Record(T),
    Mapping(Map<String, Value>),
}

/// An outbound call to `topic` carrying a record of type `T`.
///
/// Each invocation builds the payload, assigns an identifier to the id
/// field when it is unset, sends it through the agent's RPC helper and then
/// runs the caller's body with the id-populated record.
#[derive(Debug, Clone)]
pub struct RpcCall<T = Map<String, Value>> {
    topic: String,
    id_field: Option<String>,
    _record: PhantomData<fn() -> T>,
}

impl<T> RpcCall<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(topic: impl Into<String>) -> Result<Self, RpcError> {
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(RpcError::EmptyTopic);
        }
        Ok(Self {
            topic,
            id_field: Some("id".to_string()),
            _record: PhantomData,
        })
    }

    /// Field that receives a generated identifier. `None` disables it.
    pub fn with_id_field(mut self, field: Option<String>) -> Self {
        self.id_field = field.filter(|f| !f.is_empty());
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn id_field(&self) -> Option<&str> {
        self.id_field.as_deref()
    }

    /// Build the record and the wire mapping for one call.
    pub fn prepare(
        &self,
        input: Option<CallInput<T>>,
        fields: Map<String, Value>,
    ) -> Result<(T, Map<String, Value>), RpcError> {
        if input.is_some() && !fields.is_empty() {
            return Err(RpcError::PayloadConflict);
        }

        let (original, mut mapping) = match input {
            Some(CallInput::Record(record)) => {
                let mapping = match serde_json::to_value(&record)? {
                    Value::Object(mapping) => mapping,
                    other => {
                        return Err(RpcError::UnsupportedPayload(format!(
                            "record for {} must serialize to a JSON object, got {other}",
                            self.topic
                        )));
                    }
                };
                (Some(record), mapping)
            }
            Some(CallInput::Mapping(mapping)) => (None, mapping),
            None => (None, fields),
        };

        if let Some(field) = &self.id_field {
            ensure_id(&mut mapping, field);
        }

        let record = match (serde_json::from_value(Value::Object(mapping.clone())), original) {
            (Ok(record), _) => record,
            // Record type does not accept the id field.
            (Err(_), Some(original)) => original,
            (Err(e), None) => return Err(e.into()),
        };
        Ok((record, mapping))
    }

    /// Send the payload through `agent`'s RPC helper, then run `body`.
    pub async fn invoke<A, B, Fut, R>(
        &self,
        agent: &A,
        input: Option<CallInput<T>>,
        fields: Map<String, Value>,
        body: B,
    ) -> Result<R, RpcError>
    where
        A: ExtensibleAgent + ?Sized,
        B: FnOnce(T) -> Fut,
        Fut: Future<Output = R>,
    {
        let helper = get_state(agent)
            .helpers
            .get::<RpcHelper>(RPC_HELPER)
            .ok_or(RpcError::NotInstalled)?;

        let (record, mapping) = self.prepare(input, fields)?;
        if let Err(e) = helper.send(&self.topic, mapping, None).await {
            error!(topic = %self.topic, error = %e, "Failed to send RPC payload");
            return Err(e);
        }
        Ok(body(record).await)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Transcript {
        #[serde(default)]
        id: String,
        text: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Strict {
        text: String,
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_empty_topic_rejected() {
        assert!(matches!(
            RpcCall::<Transcript>::new("  "),
            Err(RpcError::EmptyTopic)
        ));
    }

    #[test]
    fn test_record_gets_id_mirrored() {
        let call = RpcCall::<Transcript>::new("agent.transcript").unwrap();
        let (record, mapping) = call
            .prepare(
                Some(CallInput::Record(Transcript {
                    id: String::new(),
                    text: "hi".to_string(),
                })),
                Map::new(),
            )
            .unwrap();

        assert_eq!(record.id.len(), 36);
        assert_eq!(mapping["id"], json!(record.id));
        assert_eq!(mapping["text"], json!("hi"));
    }

    #[test]
    fn test_each_call_gets_a_distinct_id() {
        let call = RpcCall::<Transcript>::new("agent.transcript").unwrap();
        let ids: HashSet<String> = (0..1000)
            .map(|_| {
                let record = Transcript {
                    id: String::new(),
                    text: "hi".to_string(),
                };
                let (record, _) = call
                    .prepare(Some(CallInput::Record(record)), Map::new())
                    .unwrap();
                record.id
            })
            .collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_existing_id_kept() {
        let call = RpcCall::<Transcript>::new("agent.transcript").unwrap();
        let (record, _) = call
            .prepare(None, fields(json!({"id": "fixed", "text": "x"})))
            .unwrap();
        assert_eq!(record.id, "fixed");
    }

    #[test]
    fn test_record_without_id_field_is_kept() {
        let call = RpcCall::<Strict>::new("strict").unwrap();
        let original = Strict {
            text: "x".to_string(),
        };
        let (record, mapping) = call
            .prepare(Some(CallInput::Record(original.clone())), Map::new())
            .unwrap();
        assert_eq!(record, original);
        assert!(mapping.contains_key("id"));
    }

    #[test]
    fn test_input_and_fields_conflict() {
        let call = RpcCall::<Map<String, Value>>::new("t").unwrap();
        let err = call
            .prepare(
                Some(CallInput::Mapping(fields(json!({"a": 1})))),
                fields(json!({"b": 2})),
            )
            .unwrap_err();
        assert!(matches!(err, RpcError::PayloadConflict));
    }

    #[test]
    fn test_id_field_can_be_disabled() {
        let call = RpcCall::<Map<String, Value>>::new("t")
            .unwrap()
            .with_id_field(None);
        let (record, mapping) = call.prepare(None, fields(json!({"a": 1}))).unwrap();
        assert_eq!(record, mapping);
        assert!(!mapping.contains_key("id"));

        let call = RpcCall::<Map<String, Value>>::new("t")
            .unwrap()
            .with_id_field(Some("request_id".to_string()));
        let (_, mapping) = call.prepare(None, Map::new()).unwrap();
        assert!(mapping.contains_key("request_id"));
    }

    #[test]
    fn test_non_object_record_rejected() {
        let call = RpcCall::<String>::new("t").unwrap();
        let err = call
            .prepare(Some(CallInput::Record("plain".to_string())), Map::new())
            .unwrap_err();
        assert!(matches!(err, RpcError::UnsupportedPayload(_)));
    }

    #[tokio::test]
    async fn test_invoke_requires_installed_helper() {
        let agent = crate::agent::Agent::new("bare");
        let call = RpcCall::<Map<String, Value>>::new("t").unwrap();
        let err = call
            .invoke(&agent, None, Map::new(), |_| async {})
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::NotInstalled));
    }
}
