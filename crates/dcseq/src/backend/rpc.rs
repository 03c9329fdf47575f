use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::http;
use crate::{
    BackendKind, DEFAULT_FLOOR, Deadline, Error, Result, RetryPolicy, SequenceBackend, SequenceKey,
    Sleeper, ThreadSleep,
};

const B: BackendKind = BackendKind::RemoteRpc;

/// Calls a named stored procedure with JSON arguments.
pub trait RpcClient: Send + Sync {
    fn call(&self, procedure: &str, args: Value) -> Result<Value>;
}

impl<C> RpcClient for Arc<C>
where
    C: RpcClient + ?Sized,
{
    fn call(&self, procedure: &str, args: Value) -> Result<Value> {
        (**self).call(procedure, args)
    }
}

/// Names of the server-side procedures.
///
/// `next` must perform its read-increment-write atomically and create the
/// key at the floor when absent; `current` must not modify anything.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RpcProcedures {
    pub next: String,
    pub current: String,
    pub set: String,
    pub list: String,
}

impl Default for RpcProcedures {
    fn default() -> Self {
        Self {
            next: "get_next_seq".to_owned(),
            current: "get_current_seq".to_owned(),
            set: "set_seq".to_owned(),
            list: "list_seqs".to_owned(),
        }
    }
}

/// A [`SequenceBackend`] whose increments run inside the store.
///
/// This is the only backend that guarantees distinct values under concurrent
/// writers. A retried increment whose first attempt timed out after
/// committing skips a value; it never repeats one.
pub struct RemoteRpcStore<C> {
    client: C,
    procedures: RpcProcedures,
    floor: u64,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<C> RemoteRpcStore<C>
where
    C: RpcClient,
{
    pub fn new(client: C) -> Self {
        Self {
            client,
            procedures: RpcProcedures::default(),
            floor: DEFAULT_FLOOR,
            policy: RetryPolicy::rpc(),
            sleeper: Arc::new(ThreadSleep),
        }
    }

    #[must_use]
    pub fn with_procedures(mut self, procedures: RpcProcedures) -> Self {
        self.procedures = procedures;
        self
    }

    /// Reported for keys the store returns no value for. The procedures own
    /// the floor for increments.
    #[must_use]
    pub fn with_floor(mut self, floor: u64) -> Self {
        self.floor = floor;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    fn call(
        &self,
        operation: &str,
        procedure: &str,
        args: Value,
        deadline: Deadline,
    ) -> Result<Value> {
        self.policy
            .run_with(&*self.sleeper, B, operation, deadline, |_| {
                self.client.call(procedure, args.clone())
            })
    }
}

impl<C> SequenceBackend for RemoteRpcStore<C>
where
    C: RpcClient,
{
    fn kind(&self) -> BackendKind {
        B
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(%key)))]
    fn next_value_until(&self, key: &SequenceKey, deadline: Deadline) -> Result<u64> {
        let result = self.call(
            "next_value",
            &self.procedures.next,
            json!({ "seq_name": key.as_str() }),
            deadline,
        )?;
        decode_integer(&result)?.ok_or_else(|| {
            Error::corrupt(B, format!("`{}` returned no value for `{key}`", self.procedures.next))
        })
    }

    fn current_value(&self, key: &SequenceKey) -> Result<u64> {
        let result = self.call(
            "current_value",
            &self.procedures.current,
            json!({ "seq_name": key.as_str() }),
            Deadline::never(),
        )?;
        Ok(decode_integer(&result)?.unwrap_or(self.floor))
    }

    fn list_all(&self) -> Result<BTreeMap<SequenceKey, u64>> {
        let result = self.call("list_all", &self.procedures.list, json!({}), Deadline::never())?;
        decode_listing(&result)
    }

    fn set_value(&self, key: &SequenceKey, value: u64) -> Result<()> {
        self.call(
            "set_value",
            &self.procedures.set,
            json!({ "seq_name": key.as_str(), "seq_value": value }),
            Deadline::never(),
        )?;
        Ok(())
    }
}

/// Accepts the shapes a procedure result comes back in: a bare scalar, a
/// one-element array, or a single-column row.
fn decode_integer(value: &Value) -> Result<Option<u64>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| Error::corrupt(B, format!("`{n}` is not a counter value"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::corrupt(B, format!("`{s}` is not a counter value"))),
        Value::Array(items) => match items.as_slice() {
            [] => Ok(None),
            [single] => decode_integer(single),
            _ => Err(Error::corrupt(B, format!("expected one value, got {}", items.len()))),
        },
        Value::Object(row) if row.len() == 1 => match row.values().next() {
            Some(single) => decode_integer(single),
            None => Ok(None),
        },
        other => Err(Error::corrupt(B, format!("unexpected result `{other}`"))),
    }
}

const NAME_COLUMNS: [&str; 3] = ["seq_name", "sequence_name", "name"];
const VALUE_COLUMNS: [&str; 4] = ["current_value", "seq_value", "value", "current"];

/// Either a row set (`[{"seq_name": .., "current_value": ..}, ..]`) or a
/// single JSON object mapping keys to values.
fn decode_listing(value: &Value) -> Result<BTreeMap<SequenceKey, u64>> {
    let mut all = BTreeMap::new();
    match value {
        Value::Null => {}
        Value::Array(rows) => {
            for row in rows {
                let Value::Object(columns) = row else {
                    return Err(Error::corrupt(B, format!("unexpected listing row `{row}`")));
                };
                let name = NAME_COLUMNS
                    .iter()
                    .find_map(|c| columns.get(*c).and_then(Value::as_str))
                    .ok_or_else(|| Error::corrupt(B, format!("listing row `{row}` has no name")))?;
                let value = VALUE_COLUMNS
                    .iter()
                    .find_map(|c| columns.get(*c))
                    .map(decode_integer)
                    .transpose()?
                    .flatten()
                    .ok_or_else(|| Error::corrupt(B, format!("listing row `{row}` has no value")))?;
                all.insert(SequenceKey::new(name), value);
            }
        }
        Value::Object(map) => {
            for (name, value) in map {
                if let Some(value) = decode_integer(value)? {
                    all.insert(SequenceKey::new(name), value);
                }
            }
        }
        other => return Err(Error::corrupt(B, format!("unexpected listing `{other}`"))),
    }
    Ok(all)
}

/// [`RpcClient`] for a PostgREST endpoint (`{url}/rest/v1/rpc/{procedure}`).
pub struct PostgrestClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl PostgrestClient {
    pub fn new(http: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl core::fmt::Debug for PostgrestClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgrestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RpcClient for PostgrestClient {
    fn call(&self, procedure: &str, args: Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}/rest/v1/rpc/{procedure}", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&args)
            .send()
            .map_err(|e| http::send_error(B, &e))?;
        let body = http::read_text(B, http::check(B, response)?)?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| Error::corrupt(B, format!("unexpected response body: {e}")))
    }
}
