//! Wire records returned by the ledger RPC methods and their domain forms

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

use crate::rpc::TransportError;

/// Width, in hex characters, of the trailing field key segment of an object id.
pub const FIELD_KEY_HEX_LEN: usize = 64;

/// One page of a paginated listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    /// Opaque cursor to pass back for the next page.
    #[serde(default)]
    pub next_cursor: Option<Value>,
    #[serde(default)]
    pub has_next_page: bool,
}

/// Stable identifier of one field inside an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey(String);

impl FieldKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive the field key from a full field object id.
    ///
    /// The key is the trailing fixed-width hex segment, prefixed with `0x`.
    /// Returns `None` if the id is too short to carry one.
    pub fn from_object_id(object_id: &str) -> Option<Self> {
        let hex = object_id.strip_prefix("0x").unwrap_or(object_id);
        if hex.len() < FIELD_KEY_HEX_LEN || !hex.is_ascii() {
            return None;
        }
        Some(Self(format!("0x{}", &hex[hex.len() - FIELD_KEY_HEX_LEN..])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// An entry of `rooch_listFieldStates`.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldStateRecord {
    pub field_key: String,
    #[serde(default)]
    pub state: Option<ObjectStateRecord>,
}

impl FieldStateRecord {
    /// Hex-encoded value of the field, if the server sent one.
    pub fn value_hex(&self) -> Option<&str> {
        self.state
            .as_ref()
            .and_then(|state| state.value.as_deref())
            .filter(|value| !value.is_empty())
    }
}

/// Object state as embedded in listing records.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStateRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub object_type: Option<String>,
    #[serde(default)]
    pub state_root: Option<String>,
    /// Binary value as hex, `0x` prefixed.
    #[serde(default)]
    pub value: Option<String>,
}

/// An entry of `rooch_syncStates`: every state change made by one transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct StateChangeSetRecord {
    #[serde(deserialize_with = "deserialize_u64")]
    pub tx_order: u64,
    pub state_change_set: StateChangeSetBody,
    #[serde(default, deserialize_with = "deserialize_opt_u64")]
    pub created_at: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StateChangeSetBody {
    /// Object changes; sent either as a list or as a map keyed by object id.
    #[serde(default, deserialize_with = "deserialize_changes")]
    pub changes: Vec<ObjectChangeRecord>,
}

/// Change to one object and to its dynamic fields.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectChangeRecord {
    pub metadata: ObjectMetaRecord,
    #[serde(default)]
    pub value: Option<FieldValueRecord>,
    #[serde(default)]
    pub fields: Vec<ObjectChangeRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectMetaRecord {
    pub id: String,
    #[serde(default)]
    pub object_type: Option<String>,
}

/// Operation tag of a change as it appears on the wire: exactly one of
/// `new`, `modify` or `delete` is expected to be present.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FieldValueRecord {
    #[serde(default)]
    pub new: Option<String>,
    #[serde(default)]
    pub modify: Option<String>,
    /// Present (even as `null`) when the field was deleted.
    #[serde(default, deserialize_with = "deserialize_present")]
    pub delete: Option<Value>,
}

impl FieldValueRecord {
    pub fn op(&self) -> Option<FieldOp> {
        if let Some(value) = &self.new {
            Some(FieldOp::New(value.clone()))
        } else if let Some(value) = &self.modify {
            Some(FieldOp::Modify(value.clone()))
        } else if self.delete.is_some() {
            Some(FieldOp::Delete)
        } else {
            None
        }
    }
}

/// A single field operation, value still hex encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOp {
    New(String),
    Modify(String),
    Delete,
}

/// Field operation addressed by its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub key: FieldKey,
    pub op: FieldOp,
}

/// Field-level changes of one transaction, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub tx_order: u64,
    pub changes: Vec<FieldChange>,
    /// Field entries dropped for lacking a usable key or operation.
    pub skipped: usize,
}

impl StateChangeSetRecord {
    /// Flatten `changes[].fields[]` into addressed field operations.
    pub fn into_change_set(self) -> ChangeSet {
        let mut changes = Vec::new();
        let mut skipped = 0;

        for object_change in self.state_change_set.changes {
            for field in object_change.fields {
                let key = FieldKey::from_object_id(&field.metadata.id);
                let op = field.value.as_ref().and_then(FieldValueRecord::op);
                match (key, op) {
                    (Some(key), Some(op)) => changes.push(FieldChange { key, op }),
                    _ => skipped += 1,
                }
            }
        }

        ChangeSet {
            tx_order: self.tx_order,
            changes,
            skipped,
        }
    }
}

/// An entry of `rooch_getTransactionsByOrder`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionWithInfoRecord {
    pub transaction: LedgerTransactionRecord,
    #[serde(default)]
    pub execution_info: Option<ExecutionInfoRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerTransactionRecord {
    pub sequence_info: SequenceInfoRecord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SequenceInfoRecord {
    #[serde(deserialize_with = "deserialize_u64")]
    pub tx_order: u64,
    #[serde(default, deserialize_with = "deserialize_opt_u64")]
    pub tx_timestamp: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionInfoRecord {
    pub state_root: String,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub status: Option<Value>,
}

/// Response of `rooch_executeRawTransaction`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteTxRecord {
    pub sequence_info: SequenceInfoRecord,
    #[serde(default)]
    pub execution_info: Option<ExecutionInfoRecord>,
}

/// Latest known ledger position: a state root and the order that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerHead {
    pub state_root: String,
    pub tx_order: u64,
}

impl TransactionWithInfoRecord {
    pub fn head(&self) -> Option<LedgerHead> {
        self.execution_info.as_ref().map(|info| LedgerHead {
            state_root: info.state_root.clone(),
            tx_order: self.transaction.sequence_info.tx_order,
        })
    }
}

/// Error types for ledger RPC calls
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Transport error: {0}")]
    TransportError(#[from] TransportError),

    #[error("Unexpected response shape: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Page reported more data but carried no cursor")]
    MissingCursor,

    #[error("No data returned")]
    NoData,
}

/// Accept a `u64` sent either as a JSON number or as a decimal string.
fn deserialize_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom(format!("invalid u64: {}", number))),
        Value::String(text) => text
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid u64: {}", text))),
        other => Err(serde::de::Error::custom(format!("invalid u64: {}", other))),
    }
}

fn deserialize_opt_u64<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u64>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(number) => Ok(number.as_u64()),
        Value::String(text) => Ok(text.parse::<u64>().ok()),
        _ => Ok(None),
    }
}

fn deserialize_present<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

fn deserialize_changes<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<ObjectChangeRecord>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Changes {
        List(Vec<ObjectChangeRecord>),
        Map(std::collections::BTreeMap<String, ObjectChangeRecord>),
        Null(()),
    }

    Ok(match Changes::deserialize(deserializer)? {
        Changes::List(changes) => changes,
        Changes::Map(changes) => changes.into_values().collect(),
        Changes::Null(()) => Vec::new(),
    })
}
