//! In-memory gateway for tests: scripted responses plus a call log.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use schemalib_shared::GatewayError;

use crate::Gateway;

type Responder = dyn Fn(&[String]) -> Result<Value, GatewayError> + Send + Sync;

/// Answers every call with a closure and records the arguments.
pub struct ScriptedGateway {
    responder: Box<Responder>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedGateway {
    pub fn new(
        responder: impl Fn(&[String]) -> Result<Value, GatewayError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A fake org holding `describes`: answers listing, describe, and
    /// (empty) queries the way the real CLI shapes them.
    pub fn catalog(describes: Vec<Value>) -> Self {
        let by_name: BTreeMap<String, Value> = describes
            .into_iter()
            .filter_map(|d| {
                let name = d.get("name")?.as_str()?.to_string();
                Some((name, d))
            })
            .collect();

        Self::new(move |args| {
            if is_list(args) {
                let names: Vec<&String> = by_name.keys().collect();
                return Ok(json!({"status": 0, "result": names}));
            }
            if let Some(name) = arg_value(args, "--sobject") {
                return match by_name.get(name) {
                    Some(describe) => Ok(json!({"status": 0, "result": describe})),
                    None => Err(GatewayError::NonZeroExit {
                        code: Some(1),
                        stdout: String::new(),
                        stderr: format!("NOT_FOUND: {name}"),
                    }),
                };
            }
            Ok(json!({"status": 0, "result": {"totalSize": 0, "records": []}}))
        })
    }

    /// Answer `args` without recording a call; lets one fake delegate to another.
    pub fn respond(&self, args: &[String]) -> Result<Value, GatewayError> {
        (self.responder)(args)
    }

    /// Number of invocations so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Arguments of every invocation, in order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn invoke(
        &self,
        args: &[String],
        _account: Option<&str>,
        _timeout: Duration,
    ) -> Result<Value, GatewayError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(args.to_vec());
        }
        (self.responder)(args)
    }
}

/// The value following `flag` in `args`.
pub fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

/// True for a listing call.
pub fn is_list(args: &[String]) -> bool {
    args.iter().any(|a| a == "list")
}

/// The SOQL text of a query call.
pub fn query_text(args: &[String]) -> Option<&str> {
    arg_value(args, "--query")
}
