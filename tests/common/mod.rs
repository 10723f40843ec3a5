#![allow(dead_code)]

use rooch_field_sync::rpc::{RpcTransport, TransportError};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const OBJECT_ID: &str = "0xae308aa50bded0b341120431a9049ad1f151b345115a17bcefcad943505fa3b6";

/// In-memory transport answering from per-method scripts.
///
/// Queued responses are consumed first; once a method's queue is empty its
/// default response, if any, is returned on every call. A gated method
/// holds each call until [`ScriptedTransport::release`] lets it through.
#[derive(Default)]
pub struct ScriptedTransport {
    queued: Mutex<HashMap<String, VecDeque<Result<Value, TransportError>>>>,
    defaults: Mutex<HashMap<String, Value>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, method: &str, response: Value) {
        self.queued
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Ok(response));
    }

    pub fn push_error(&self, method: &str, error: TransportError) {
        self.queued
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Err(error));
    }

    pub fn set_default(&self, method: &str, response: Value) {
        self.defaults
            .lock()
            .unwrap()
            .insert(method.to_string(), response);
    }

    /// Hold calls to `method` until released.
    pub fn gate(&self, method: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(method.to_string(), Arc::new(Semaphore::new(0)));
    }

    /// Let one held call to `method` proceed.
    pub fn release(&self, method: &str) {
        if let Some(gate) = self.gates.lock().unwrap().get(method) {
            gate.add_permits(1);
        }
    }

    /// Wait until `method` has been called `count` times.
    pub async fn wait_for_calls(&self, method: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls(method).len() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("calls made");
    }

    /// Params of every call made to `method`, oldest first.
    pub fn calls(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| called == method)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl RpcTransport for ScriptedTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));

        let gate = self.gates.lock().unwrap().get(method).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate open").forget();
        }

        if let Some(response) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            return response;
        }
        match self.defaults.lock().unwrap().get(method) {
            Some(response) => Ok(response.clone()),
            None => Err(TransportError::Rpc {
                code: -32601,
                message: format!("no scripted response for {}", method),
            }),
        }
    }
}

/// Field key made of one repeated hex digit.
pub fn key(digit: char) -> String {
    format!("0x{}", digit.to_string().repeat(64))
}

/// Hex encoded bincode value.
pub fn value(v: u64) -> String {
    format!("0x{}", hex::encode(bincode::serialize(&v).unwrap()))
}

pub fn head_page(state_root: &str, tx_order: u64) -> Value {
    json!({
        "data": [tx_record(tx_order, state_root)],
        "next_cursor": tx_order.to_string(),
        "has_next_page": tx_order > 0
    })
}

pub fn tx_record(tx_order: u64, state_root: &str) -> Value {
    json!({
        "transaction": { "sequence_info": { "tx_order": tx_order.to_string() } },
        "execution_info": { "state_root": state_root }
    })
}

pub fn tx_page(orders: &[u64], has_next_page: bool) -> Value {
    let data: Vec<Value> = orders
        .iter()
        .map(|order| tx_record(*order, &format!("0xr{}", order)))
        .collect();
    json!({
        "data": data,
        "next_cursor": orders.last().map(|order| order.to_string()),
        "has_next_page": has_next_page
    })
}

pub fn field_page(fields: &[(char, u64)], next_cursor: Option<&str>) -> Value {
    let data: Vec<Value> = fields
        .iter()
        .map(|(digit, v)| json!({ "field_key": key(*digit), "state": { "value": value(*v) } }))
        .collect();
    json!({
        "data": data,
        "next_cursor": next_cursor,
        "has_next_page": next_cursor.is_some()
    })
}

pub fn new_op(digit: char, v: u64) -> Value {
    field_change(digit, json!({ "new": value(v) }))
}

pub fn modify_op(digit: char, v: u64) -> Value {
    field_change(digit, json!({ "modify": value(v) }))
}

pub fn delete_op(digit: char) -> Value {
    field_change(digit, json!({ "delete": null }))
}

fn field_change(digit: char, op: Value) -> Value {
    json!({
        "metadata": { "id": format!("{}{}", OBJECT_ID, digit.to_string().repeat(64)) },
        "value": op
    })
}

pub fn change_set(tx_order: u64, fields: Vec<Value>) -> Value {
    json!({
        "tx_order": tx_order.to_string(),
        "state_change_set": {
            "changes": [{ "metadata": { "id": OBJECT_ID }, "fields": fields }]
        }
    })
}

pub fn change_set_page(change_sets: Vec<Value>) -> Value {
    json!({ "data": change_sets, "next_cursor": null, "has_next_page": false })
}
