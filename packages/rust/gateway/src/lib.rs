//! "Invoke external command, get JSON" gateway to the CRM platform CLI.
//!
//! Every remote operation in schemalib (listing, describe, SOQL queries) goes
//! through the [`Gateway`] trait. [`CliGateway`] is the real implementation,
//! spawning the platform CLI per call; tests substitute a scripted fake.

mod cli;
mod response;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use schemalib_shared::GatewayError;

pub use cli::{CliGateway, PROGRAM_CANDIDATES, resolve_program};
pub use response::{
    RATE_LIMIT_SIGNATURE, is_rate_limited, parse_tolerant, records_of, result_of, total_size_of,
};

/// A single JSON-producing command invocation.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Run `args` against `account` and return the parsed JSON output.
    async fn invoke(
        &self,
        args: &[String],
        account: Option<&str>,
        timeout: Duration,
    ) -> Result<Value, GatewayError>;
}

/// Which query endpoint a SOQL statement goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryApi {
    Data,
    Tooling,
}

/// Run a SOQL query through the gateway.
pub async fn query(
    gateway: &dyn Gateway,
    soql: &str,
    account: Option<&str>,
    api: QueryApi,
    timeout: Duration,
) -> Result<Value, GatewayError> {
    let mut args: Vec<String> = ["data", "query", "--query", soql, "--json"]
        .into_iter()
        .map(String::from)
        .collect();
    if api == QueryApi::Tooling {
        args.push("--use-tooling-api".into());
    }
    gateway.invoke(&args, account, timeout).await
}

/// Render names as a SOQL `IN` list body: `'A','B'`.
pub fn soql_in_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| format!("'{}'", n.as_ref().replace('\\', "\\\\").replace('\'', "\\'")))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGateway;

    #[test]
    fn in_list_escapes_quotes() {
        assert_eq!(soql_in_list(&["Account", "O'Brien__c"]), "'Account','O\\'Brien__c'");
        assert_eq!(soql_in_list::<&str>(&[]), "");
    }

    #[tokio::test]
    async fn query_builds_tooling_args() {
        let gateway = ScriptedGateway::new(|_| Ok(serde_json::json!({"result": {"records": []}})));
        query(
            &gateway,
            "SELECT Id FROM ApexTrigger",
            Some("dev"),
            QueryApi::Tooling,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let calls = gateway.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0..2], ["data".to_string(), "query".to_string()]);
        assert!(calls[0].contains(&"--use-tooling-api".to_string()));
    }
}
