//! Generic JSON-RPC 2.0 envelope: request/response/error types and a single
//! vs. batch request parser. Bundler-specific method names, params and error
//! codes live one layer up, in `bundler::rpc` — this crate only knows about
//! the JSON-RPC 2.0 transport shape, mirroring the separation `anvil-rpc`
//! draws from `anvil-core`'s typed `EthRequest` enum.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Request id: JSON-RPC 2.0 allows string, number, or null.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(u64),
    String(String),
    Null,
}

/// A single parsed JSON-RPC request, method dispatch left to the caller.
#[derive(Clone, Debug, Deserialize)]
pub struct Request {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default = "default_id")]
    pub id: Id,
}

fn default_jsonrpc() -> String {
    JSONRPC_VERSION.to_string()
}

fn default_id() -> Id {
    Id::Null
}

/// A request batch: JSON-RPC 2.0 allows submitting either a single object or
/// an array of objects in one HTTP POST body.
#[derive(Clone, Debug)]
pub enum RequestBatch {
    Single(Request),
    Batch(Vec<Request>),
}

impl RequestBatch {
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(body)?;
        if value.is_array() {
            Ok(Self::Batch(serde_json::from_value(value)?))
        } else {
            Ok(Self::Single(serde_json::from_value(value)?))
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// `-32601`, used both for unknown methods and as the fatal "incompatible
    /// node" signal the bundle manager re-raises to callers.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(-32601, format!("method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(-32602, message.into())
    }
}

/// A JSON-RPC 2.0 response: exactly one of `result`/`error` is present.
#[derive(Clone, Debug, Serialize)]
pub struct Response {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: Id,
}

impl Response {
    pub fn success(id: Id, result: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION, result: Some(result), error: None, id }
    }

    pub fn failure(id: Id, error: RpcError) -> Self {
        Self { jsonrpc: JSONRPC_VERSION, result: None, error: Some(error), id }
    }

    pub fn from_result(id: Id, result: Result<Value, RpcError>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(err) => Self::failure(id, err),
        }
    }
}

/// Implemented by a bundler-specific method table to answer one parsed
/// request. Transport binding (HTTP/WS listener) is explicitly out of scope
/// and lives outside this crate entirely.
#[async_trait::async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

/// Dispatch a single request or a batch through `handler`, producing the
/// matching response shape (object for `Single`, array for `Batch`).
pub async fn dispatch<H: RpcHandler>(handler: &H, batch: RequestBatch) -> Value {
    match batch {
        RequestBatch::Single(req) => {
            let resp = dispatch_one(handler, req).await;
            serde_json::to_value(resp).expect("Response serializes")
        }
        RequestBatch::Batch(reqs) => {
            let mut out = Vec::with_capacity(reqs.len());
            for req in reqs {
                out.push(dispatch_one(handler, req).await);
            }
            serde_json::to_value(out).expect("Vec<Response> serializes")
        }
    }
}

async fn dispatch_one<H: RpcHandler>(handler: &H, req: Request) -> Response {
    let id = req.id.clone();
    let result = handler.handle(&req.method, req.params).await;
    Response::from_result(id, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait::async_trait]
    impl RpcHandler for Echo {
        async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcError> {
            match method {
                "echo" => Ok(params),
                _ => Err(RpcError::method_not_found(method)),
            }
        }
    }

    #[tokio::test]
    async fn single_request_dispatches() {
        let batch = RequestBatch::from_json(
            r#"{"jsonrpc":"2.0","method":"echo","params":[1,2],"id":1}"#,
        )
        .unwrap();
        let value = dispatch(&Echo, batch).await;
        assert_eq!(value["result"], json!([1, 2]));
    }

    #[tokio::test]
    async fn batch_request_dispatches_in_order() {
        let batch = RequestBatch::from_json(
            r#"[{"jsonrpc":"2.0","method":"echo","params":1,"id":1},
                {"jsonrpc":"2.0","method":"missing","id":2}]"#,
        )
        .unwrap();
        let value = dispatch(&Echo, batch).await;
        let arr = value.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["result"], json!(1));
        assert_eq!(arr[1]["error"]["code"], json!(-32601));
    }

    #[test]
    fn unknown_fields_default_sanely() {
        let req: Request = serde_json::from_str(r#"{"method":"eth_chainId"}"#).unwrap();
        assert_eq!(req.id, Id::Null);
        assert_eq!(req.jsonrpc, "2.0");
    }
}
