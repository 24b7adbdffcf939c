//! Core type definitions for JSON-RPC and the upstream node status document.
//!
//! # Type Categories
//!
//! ## JSON-RPC Protocol Types
//! - [`JsonRpcRequest`], [`JsonRpcResponse`]: wire envelopes, with a non-wire `single` framing
//!   flag recording whether the caller sent a bare object instead of an array
//! - [`BlockInfoParams`]: the only params shape the proxy ever inspects
//! - [`Method`]: qualified method names (`endpoint.name`) and their matching rules
//!
//! ## Node Status
//! - [`NodeInfo`]: the status document served by the node root, source of the finality watermark
//!
//! # Raw Payloads
//!
//! `params` and `result` are kept as [`RawValue`] so that they are forwarded byte-for-byte and a
//! cached block payload is never re-encoded. A present `null` is kept as `Some("null")` rather
//! than collapsing into `None`, which is what makes [`JsonRpcResponse::is_null_result`] possible.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, value::RawValue, Map, Value};
use std::borrow::Cow;

/// JSON-RPC protocol version constant to avoid repeated allocations.
pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for JSON-RPC version - zero allocation for static usage.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// Error code returned when the upstream node could not answer a request.
///
/// Outside the reserved JSON-RPC range so clients can tell proxy transport failures apart from
/// errors produced by the node itself.
pub const UPSTREAM_FAILURE_CODE: i32 = -69;

/// JSON-RPC "Parse error".
pub const PARSE_ERROR_CODE: i32 = -32700;

/// JSON-RPC "Invalid Request".
pub const INVALID_REQUEST_CODE: i32 = -32600;

/// JSON-RPC "Internal error".
pub const INTERNAL_ERROR_CODE: i32 = -32603;

/// A node method, addressable either bare (`getBlockInfo`) or qualified by its endpoint
/// (`blockchain.getBlockInfo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Method {
    pub name: &'static str,
    pub endpoint: &'static str,
}

/// The block-info lookup, the only method whose results are cached.
pub const BLOCK_INFO: Method = Method { name: "getBlockInfo", endpoint: "blockchain" };

impl Method {
    /// Returns `true` if `method` names this method, bare or endpoint-qualified.
    #[must_use]
    pub fn matches(&self, method: &str) -> bool {
        method == self.name ||
            method
                .strip_prefix(self.endpoint)
                .and_then(|rest| rest.strip_prefix('.'))
                .is_some_and(|rest| rest == self.name)
    }

    /// Returns the endpoint-qualified name, e.g. `blockchain.getBlockInfo`.
    #[must_use]
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.endpoint, self.name)
    }
}

fn default_version() -> Cow<'static, str> {
    JSONRPC_VERSION_COW
}

/// Deserializes a present field as `Some`, including a literal `null`.
///
/// Combined with `#[serde(default)]` this separates an absent field (`None`) from an explicit
/// `null` (`Some("null")`).
fn deserialize_present_raw<'de, D>(deserializer: D) -> Result<Option<Box<RawValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Box::<RawValue>::deserialize(deserializer).map(Some)
}

/// JSON-RPC request envelope.
///
/// `single` is never transmitted: it records that the request arrived as a bare object so that
/// the reply can be shaped the same way.
///
/// # Example
///
/// ```
/// use flock_core::types::JsonRpcRequest;
///
/// let request: JsonRpcRequest = serde_json::from_str(
///     r#"{"jsonrpc":"2.0","id":7,"method":"getBlockInfo","params":{"blockNumber":42}}"#,
/// )
/// .unwrap();
///
/// assert_eq!(request.id, 7);
/// assert_eq!(request.cacheable_block(), Some(42));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: Cow<'static, str>,
    pub id: i64,
    pub method: String,
    #[serde(
        default,
        deserialize_with = "deserialize_present_raw",
        skip_serializing_if = "Option::is_none"
    )]
    pub params: Option<Box<RawValue>>,
    #[serde(skip)]
    pub single: bool,
}

impl JsonRpcRequest {
    /// Creates a new JSON-RPC request with zero allocation for the version string.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Box<RawValue>>, id: i64) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, id, method: method.into(), params, single: false }
    }

    /// Builds a qualified `blockchain.getBlockInfo` request whose id is the block number.
    ///
    /// # Errors
    ///
    /// Returns an error if the block number cannot be encoded as an id or as params.
    pub fn block_info(block_number: u64) -> Result<Self, serde_json::Error> {
        let id = i64::try_from(block_number)
            .map_err(<serde_json::Error as serde::ser::Error>::custom)?;
        let params = serde_json::value::to_raw_value(&BlockInfoParams { block_number })?;
        Ok(Self::new(BLOCK_INFO.qualified(), Some(params), id))
    }

    /// Returns the block number this request asks for, if it is a well-formed block-info lookup.
    ///
    /// Any other method, absent params, or params that do not decode to [`BlockInfoParams`]
    /// yield `None`; such requests are forwarded without touching the cache.
    #[must_use]
    pub fn cacheable_block(&self) -> Option<u64> {
        if !BLOCK_INFO.matches(&self.method) {
            return None;
        }
        block_number_of(self.params.as_ref()?)
    }
}

/// JSON-RPC response envelope.
///
/// `id` is nullable on the wire because the node may answer an unparseable request with
/// `"id": null`. Responses built by the proxy for a request always carry that request's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "default_version")]
    pub jsonrpc: Cow<'static, str>,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(
        default,
        deserialize_with = "deserialize_present_raw",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(skip)]
    pub single: bool,
}

impl JsonRpcResponse {
    /// Creates an error response carrying `{code, message}`.
    #[must_use]
    pub fn error(id: Option<i64>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            id,
            result: None,
            error: Some(json!({ "code": code, "message": message.into() })),
            single: false,
        }
    }

    /// Creates the error returned in place of a response the node failed to provide.
    #[must_use]
    pub fn upstream_failure(id: Option<i64>, message: impl Into<String>) -> Self {
        Self::error(id, UPSTREAM_FAILURE_CODE, message)
    }

    /// Replaces the id, used when replaying a cached payload for a new caller.
    #[must_use]
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Returns `true` if the result is literally `null`.
    #[must_use]
    pub fn is_null_result(&self) -> bool {
        self.result.as_ref().is_some_and(|raw| raw.get() == "null")
    }

    /// Returns the block number described by a block-info result.
    ///
    /// A node answers `getBlockInfo` with the block itself, which carries its own
    /// `blockNumber`. Null results, error responses and anything else yield `None`.
    #[must_use]
    pub fn result_block_number(&self) -> Option<u64> {
        if self.error.is_some() || self.is_null_result() {
            return None;
        }
        block_number_of(self.result.as_ref()?)
    }

    /// Returns the error code, if this is an error response with a numeric code.
    #[must_use]
    pub fn error_code(&self) -> Option<i64> {
        self.error.as_ref()?.get("code")?.as_i64()
    }
}

/// Params of a block-info lookup; also the subset of a block-info result the proxy reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfoParams {
    #[serde(rename = "blockNumber")]
    pub block_number: u64,
}

/// Reads `blockNumber` from a raw JSON object.
///
/// Only the object form counts: the derived [`BlockInfoParams`] decoder would also accept a
/// sequence such as `[5]`, which is not a block lookup.
fn block_number_of(raw: &RawValue) -> Option<u64> {
    let object: Map<String, Value> = serde_json::from_str(raw.get()).ok()?;
    serde_json::from_value::<BlockInfoParams>(Value::Object(object)).ok().map(|p| p.block_number)
}

/// Methods the node has switched off, as advertised in [`NodeInfo`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisabledMethods {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blockchain: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contracts: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Status document served by the node root.
///
/// Only `lastVerifiedBlockNumber` is required; it is the finality watermark. Fields this type
/// does not know about are kept in `extra` so the document can be passed through intact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub last_block_number: u64,
    #[serde(default)]
    pub last_block_ref_hive_block_number: u64,
    #[serde(default)]
    pub last_hash: String,
    #[serde(default)]
    pub last_parsed_hive_block_number: u64,
    #[serde(default, rename = "SSCnodeVersion")]
    pub ssc_node_version: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub chain_id: String,
    #[serde(default)]
    pub disabled_methods: DisabledMethods,
    #[serde(default)]
    pub light_node: bool,
    pub last_verified_block_number: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
