use serde_json::{Map, Value};

/// A single chat send: the prompt, who it is addressed to, and any extra
/// fields the server understands.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRequest {
    prompt: String,
    recipient: String,
    extra: Map<String, Value>,
}

impl StreamRequest {
    pub fn new(prompt: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            recipient: recipient.into(),
            extra: Map::new(),
        }
    }

    /// Adds an extra body field. `text`, `to` and `stream` are reserved and
    /// always overwritten when the payload is built.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// JSON body sent to the server, with streaming forced on.
    pub fn to_payload(&self) -> Value {
        let mut body = self.extra.clone();
        body.insert("text".into(), Value::String(self.prompt.clone()));
        body.insert("to".into(), Value::String(self.recipient.clone()));
        body.insert("stream".into(), Value::Bool(true));
        Value::Object(body)
    }
}
