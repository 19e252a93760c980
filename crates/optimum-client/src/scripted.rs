//! In-memory client replaying canned responses.

use crate::client::{ApiClient, EntryPoint};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Client answering each entry point from a queue of prepared responses
///
/// Every call is recorded so callers can inspect the payloads that were
/// sent.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    responses: Mutex<HashMap<EntryPoint, VecDeque<Result<Value>>>>,
    calls: Mutex<Vec<(EntryPoint, Value)>>,
}

impl ScriptedClient {
    /// Create a client with no responses
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response
    pub fn respond(&self, entry_point: EntryPoint, response: Value) -> &Self {
        self.push(entry_point, Ok(response))
    }

    /// Queue a failure
    pub fn fail(&self, entry_point: EntryPoint, error: ClientError) -> &Self {
        self.push(entry_point, Err(error))
    }

    fn push(&self, entry_point: EntryPoint, response: Result<Value>) -> &Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.entry(entry_point).or_default().push_back(response);
        }
        self
    }

    /// Calls made so far, in order
    pub fn calls(&self) -> Vec<(EntryPoint, Value)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Payloads sent to one entry point, in order
    pub fn payloads(&self, entry_point: EntryPoint) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(e, _)| *e == entry_point)
            .map(|(_, payload)| payload)
            .collect()
    }
}

#[async_trait]
impl ApiClient for ScriptedClient {
    async fn call(&self, entry_point: EntryPoint, payload: Value) -> Result<Value> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((entry_point, payload));
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut r| r.get_mut(&entry_point).and_then(VecDeque::pop_front))
            .unwrap_or_else(|| Err(ClientError::NoScriptedResponse(entry_point.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_replays_in_order() {
        let client = ScriptedClient::new();
        client
            .respond(EntryPoint::Prices, json!({"A": [0, 1.0]}))
            .respond(EntryPoint::Prices, json!({"A": [1, 2.0]}));

        let first = client.call(EntryPoint::Prices, json!({"symbols": ["A"]})).await.unwrap();
        let second = client.call(EntryPoint::Prices, json!({"symbols": ["A"]})).await.unwrap();
        assert_eq!(first["A"][1], json!(1.0));
        assert_eq!(second["A"][1], json!(2.0));

        let exhausted = client.call(EntryPoint::Prices, json!({})).await;
        assert!(matches!(exhausted, Err(ClientError::NoScriptedResponse(_))));
        assert_eq!(client.payloads(EntryPoint::Prices).len(), 3);
    }

    #[tokio::test]
    async fn test_replays_failures() {
        let client = ScriptedClient::new();
        client.fail(EntryPoint::Frontier, ClientError::Api("bad query".to_string()));
        let err = client.call(EntryPoint::Frontier, json!({})).await.unwrap_err();
        assert_eq!(err.detail(), Some("bad query"));
        assert!(client.payloads(EntryPoint::Model).is_empty());
    }
}
