//! Read-only HTTP query surface.
//!
//! Three endpoints over the persisted store, none of which can change
//! state: reads rebuild a disposable working set per request and any
//! mutation a read-only method invocation attempts dies with it.
//!
//! - `GET /contract/{hash}/{name}`: a state variable's value if `name`
//!   names one, otherwise `name` is invoked as an exported method with
//!   query-string arguments (`?arg=...&arg=...`).
//! - `POST /get_payload/{hash}/{method}`: JSON argument list in, hex of
//!   the framed call payload out.
//! - `GET /get_transaction/{tx_hash}`: the persisted rows for a
//!   transaction plus its decoded records and events.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use dvm_api::ContractStore;
use dvm_execution::loader;
use dvm_tx::{CallList, CallRecord, ContractCall};
use dvm_types::config::DvmConfig;
use dvm_types::{Address, ContractHash, DvmTransaction, Value};
use dvm_vm::ContractHost;

mod json;

pub use json::{json_to_value, value_to_json};

/// Shared state of the query router.
#[derive(Clone)]
pub struct RpcState {
    store: Arc<dyn ContractStore>,
    host: ContractHost,
}

impl RpcState {
    pub fn new(store: Arc<dyn ContractStore>, config: &DvmConfig) -> Self {
        Self {
            store,
            host: ContractHost::new(config.method_timeout()),
        }
    }
}

/// Builds the query router.
pub fn router(state: RpcState) -> Router {
    Router::new()
        .route("/contract/:hash/:name", get(contract_read))
        .route("/get_payload/:hash/:method", post(get_payload))
        .route("/get_transaction/:tx_hash", get(get_transaction))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the router until the task is dropped.
pub async fn serve(listen: &str, state: RpcState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(target: "rpc", listen, "query surface listening");
    axum::serve(listener, router(state)).await
}

struct ApiError(StatusCode, String);

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, msg.into())
    }

    fn not_found(msg: impl Into<String>) -> Self {
        Self(StatusCode::NOT_FOUND, msg.into())
    }

    fn internal(msg: impl std::fmt::Display) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, msg.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.1 }));
        (self.0, body).into_response()
    }
}

fn parse_hash(hash: &str) -> Result<ContractHash, ApiError> {
    hash.parse()
        .map_err(|_| ApiError::bad_request(format!("`{hash}` is not a contract hash")))
}

async fn contract_read(
    State(state): State<RpcState>,
    Path((hash, name)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let hash = parse_hash(&hash)?;
    let mut ws = loader::load_working_set(state.store.as_ref(), [hash], u64::MAX)
        .await
        .map_err(ApiError::internal)?;
    let Some(contract) = ws.get(&hash) else {
        return Err(ApiError::not_found(format!("unknown contract {hash}")));
    };

    if let Some(value) = contract.variables.get(&name) {
        return Ok(Json(value_to_json(value)));
    }
    if contract.program.exported(&name).is_none() {
        return Err(ApiError::not_found(format!(
            "{name} is neither a state variable nor an exported method"
        )));
    }

    // Query-string arguments arrive as strings; declared-kind coercion
    // turns them into decimals and integers where the method asks for
    // them.
    let args: Vec<Value> = params
        .into_iter()
        .filter(|(key, _)| key == "arg")
        .map(|(_, value)| Value::str(value))
        .collect();

    // A disposable working set: whatever the method writes is discarded.
    let tx = DvmTransaction::new("", vec![]);
    let outcome = state
        .host
        .call(&mut ws, hash, &name, &Address::new(""), args, &tx)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    match outcome.return_value {
        Some(value) => Ok(Json(value_to_json(&value))),
        None => Ok(Json(serde_json::Value::Null)),
    }
}

async fn get_payload(
    Path((hash, method)): Path<(String, String)>,
    Json(body): Json<Vec<serde_json::Value>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let hash = parse_hash(&hash)?;
    let args = body
        .iter()
        .map(json_to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(ApiError::bad_request)?;
    let payload = ContractCall::new(hash, method, args)
        .to_payload()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(serde_json::json!({ "payload": hex::encode(payload) })))
}

async fn get_transaction(
    State(state): State<RpcState>,
    Path(tx_hash): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rows = state
        .store
        .transactions(&tx_hash)
        .await
        .map_err(ApiError::internal)?;
    if rows.is_empty() {
        return Err(ApiError::not_found(format!(
            "no executions recorded for {tx_hash}"
        )));
    }
    let events = state
        .store
        .events(&tx_hash)
        .await
        .map_err(ApiError::internal)?;

    let calls = rows
        .iter()
        .map(|row| {
            let decoded = CallList::from_hex(&row.payload_hex)
                .map_err(ApiError::internal)?
                .records
                .into_iter()
                .map(|record| decoded_record_json(&record))
                .collect::<Vec<_>>();
            Ok(serde_json::json!({
                "contract_hash": row.contract_hash.to_hex(),
                "tx_hash": row.tx_hash,
                "output_index": row.output_index,
                "payload": row.payload_hex,
                "decoded": decoded,
            }))
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let events = events
        .iter()
        .map(|row| {
            serde_json::json!({
                "contract_hash": row.contract_hash.to_hex(),
                "output_index": row.output_index,
                "name": row.event_name,
                "args": serde_json::from_str::<serde_json::Value>(&row.args_json)
                    .unwrap_or(serde_json::Value::Null),
            })
        })
        .collect::<Vec<_>>();

    Ok(Json(serde_json::json!({
        "transactions": calls,
        "events": events,
    })))
}

fn decoded_record_json(record: &CallRecord) -> serde_json::Value {
    match record {
        CallRecord::Call(call) => serde_json::json!({
            "kind": "call",
            "contract_hash": call.contract_hash.to_hex(),
            "method": call.method,
            "args": call.args.iter().map(value_to_json).collect::<Vec<_>>(),
        }),
        CallRecord::Creation(creation) => serde_json::json!({
            "kind": "creation",
            "source_len": creation.source.len(),
            "args": creation.args.iter().map(value_to_json).collect::<Vec<_>>(),
        }),
    }
}
