use serde_json::{json, Value};

use crate::error::{ProtocolError, Result};

fn expect_array<'a>(value: &'a Value, kind: &str) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| ProtocolError::Malformed(format!("{} envelope is not an array", kind)))
}

fn expect_kind(array: &[Value], kind: &str) -> Result<()> {
    let found = array
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed(format!("{} envelope missing kind", kind)))?;
    if found != kind {
        return Err(ProtocolError::Malformed(format!(
            "expected {} envelope, got {}",
            kind, found
        )));
    }
    Ok(())
}

fn string_field(array: &[Value], index: usize, what: &str) -> Result<String> {
    array
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::Malformed(format!("{} is not a string", what)))
}

/// `["NEG-OPEN", sub, filter, init_hex]`, optionally with an id-size hint
/// as a fifth element. Client to server: open a reconciliation session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegOpen {
    pub subscription_id: String,
    pub filter: Value,
    pub initial_message: String,
    pub id_size: Option<u8>,
}

impl NegOpen {
    pub fn new(subscription_id: String, filter: Value, initial_message: String) -> Self {
        Self {
            subscription_id,
            filter,
            initial_message,
            id_size: None,
        }
    }

    pub fn with_id_size(mut self, id_size: u8) -> Self {
        self.id_size = Some(id_size);
        self
    }

    pub fn to_json(&self) -> Value {
        match self.id_size {
            Some(id_size) => json!([
                "NEG-OPEN",
                self.subscription_id,
                self.filter,
                self.initial_message,
                { "idSize": id_size }
            ]),
            None => json!([
                "NEG-OPEN",
                self.subscription_id,
                self.filter,
                self.initial_message
            ]),
        }
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let array = expect_array(value, "NEG-OPEN")?;
        expect_kind(array, "NEG-OPEN")?;
        if array.len() != 4 && array.len() != 5 {
            return Err(ProtocolError::Malformed(format!(
                "NEG-OPEN envelope has {} elements",
                array.len()
            )));
        }

        let id_size = match array.get(4) {
            None => None,
            Some(options) => Some(
                options
                    .get("idSize")
                    .and_then(Value::as_u64)
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| {
                        ProtocolError::Malformed("NEG-OPEN idSize is not a small integer".into())
                    })?,
            ),
        };

        Ok(Self {
            subscription_id: string_field(array, 1, "NEG-OPEN subscription id")?,
            filter: array[2].clone(),
            initial_message: string_field(array, 3, "NEG-OPEN initial message")?,
            id_size,
        })
    }
}

/// `["NEG-MSG", sub, msg_hex]`. Bidirectional protocol blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegMsg {
    pub subscription_id: String,
    pub message: String,
}

impl NegMsg {
    pub fn new(subscription_id: String, message: String) -> Self {
        Self {
            subscription_id,
            message,
        }
    }

    pub fn to_json(&self) -> Value {
        json!(["NEG-MSG", self.subscription_id, self.message])
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let array = expect_array(value, "NEG-MSG")?;
        expect_kind(array, "NEG-MSG")?;
        if array.len() != 3 {
            return Err(ProtocolError::Malformed(format!(
                "NEG-MSG envelope has {} elements",
                array.len()
            )));
        }
        Ok(Self {
            subscription_id: string_field(array, 1, "NEG-MSG subscription id")?,
            message: string_field(array, 2, "NEG-MSG message")?,
        })
    }
}

/// `["NEG-ERR", sub, "code[: details]"]`. Server to client, terminal for
/// the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegErr {
    pub subscription_id: String,
    pub reason: String,
}

impl NegErr {
    pub fn new(subscription_id: String, reason: String) -> Self {
        Self {
            subscription_id,
            reason,
        }
    }

    /// Machine-readable part of the reason: everything before the first
    /// colon.
    pub fn code(&self) -> &str {
        match self.reason.split_once(':') {
            Some((code, _)) => code.trim(),
            None => self.reason.trim(),
        }
    }

    /// Free-text remainder after the first colon, if any.
    pub fn details(&self) -> &str {
        match self.reason.split_once(':') {
            Some((_, details)) => details.trim(),
            None => "",
        }
    }

    pub fn to_json(&self) -> Value {
        json!(["NEG-ERR", self.subscription_id, self.reason])
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let array = expect_array(value, "NEG-ERR")?;
        expect_kind(array, "NEG-ERR")?;
        if array.len() != 3 {
            return Err(ProtocolError::Malformed(format!(
                "NEG-ERR envelope has {} elements",
                array.len()
            )));
        }
        Ok(Self {
            subscription_id: string_field(array, 1, "NEG-ERR subscription id")?,
            reason: string_field(array, 2, "NEG-ERR reason")?,
        })
    }
}

/// `["NEG-CLOSE", sub]`. Client to server: terminate the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegClose {
    pub subscription_id: String,
}

impl NegClose {
    pub fn new(subscription_id: String) -> Self {
        Self { subscription_id }
    }

    pub fn to_json(&self) -> Value {
        json!(["NEG-CLOSE", self.subscription_id])
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let array = expect_array(value, "NEG-CLOSE")?;
        expect_kind(array, "NEG-CLOSE")?;
        if array.len() != 2 {
            return Err(ProtocolError::Malformed(format!(
                "NEG-CLOSE envelope has {} elements",
                array.len()
            )));
        }
        Ok(Self {
            subscription_id: string_field(array, 1, "NEG-CLOSE subscription id")?,
        })
    }
}
