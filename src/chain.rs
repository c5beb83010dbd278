use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::errors::*;
use crate::transport::{Method, Route, Transport};

/// A spendable output as listed by the regtest index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unspent {
    pub value: u64,
    pub tx_id: String,
    pub vout: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    pub tx_id: String,
    pub vout: u32,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub value: u64,
    #[serde(default)]
    pub script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Decoded transaction as returned by `/t/{txid}/json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub tx_id: String,
    #[serde(default)]
    pub tx_hex: String,
    #[serde(default)]
    pub vsize: u64,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub locktime: u32,
    #[serde(default)]
    pub ins: Vec<Input>,
    pub outs: Vec<Output>,
}

fn parse_json<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(body).chain_err(|| {
        ErrorKind::InvalidResponse(format!(
            "cannot decode {} from {:?}",
            what,
            String::from_utf8_lossy(body)
        ))
    })
}

/// The faucet replies with a bare txid, possibly JSON-quoted.
fn parse_txid(body: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(body)
        .chain_err(|| ErrorKind::InvalidResponse("non-utf8 faucet reply".into()))?
        .trim();
    let txid = if text.starts_with('"') {
        parse_json::<String>(text.as_bytes(), "txid")?
    } else {
        text.to_string()
    };
    if txid.len() != 64 || hex::decode(&txid).is_err() {
        bail!(ErrorKind::InvalidResponse(format!(
            "faucet returned invalid txid {:?}",
            txid
        )));
    }
    Ok(txid)
}

/// Thin wrappers over the regtest API.
#[derive(Clone)]
pub struct ChainQuery {
    transport: Arc<dyn Transport>,
    api_pass: String,
}

impl ChainQuery {
    pub fn new(transport: Arc<dyn Transport>, api_pass: &str) -> ChainQuery {
        ChainQuery {
            transport,
            api_pass: api_pass.to_string(),
        }
    }

    pub fn height(&self) -> Result<u32> {
        let body = self
            .transport
            .request(Method::Get, &Route::new(&["b", "best", "height"]), None)
            .chain_err(|| "failed to get chain height")?;
        parse_json(&body, "height")
    }

    /// Mines `count` blocks, returning their hashes.
    pub fn mine(&self, count: u32) -> Result<Vec<String>> {
        let route = Route::new(&["r", "generate"])
            .param("count", &count.to_string())
            .param("key", &self.api_pass);
        let body = self
            .transport
            .request(Method::Post, &route, None)
            .chain_err(|| format!("failed to mine {} blocks", count))?;
        parse_json(&body, "block hashes")
    }

    pub fn unspents(&self, address: &str) -> Result<Vec<Unspent>> {
        let route = Route::new(&["a", address, "unspents"]);
        let body = self
            .transport
            .request(Method::Get, &route, None)
            .chain_err(|| format!("failed to list unspents of {}", address))?;
        parse_json(&body, "unspents")
    }

    /// Fetches a transaction by id. A transaction the API does not know
    /// fails with an unwrapped 404 `HttpStatus`.
    pub fn fetch(&self, txid: &str) -> Result<Transaction> {
        let route = Route::new(&["t", txid, "json"]);
        let body = self.transport.request(Method::Get, &route, None)?;
        parse_json(&body, "transaction")
    }

    pub fn broadcast(&self, tx_hex: &str) -> Result<()> {
        let body = self
            .transport
            .request(Method::Post, &Route::new(&["t", "push"]), Some(tx_hex.as_bytes()))
            .chain_err(|| "failed to broadcast transaction")?;
        if !body.is_empty() {
            let _: Value = parse_json(&body, "broadcast reply")?;
        }
        Ok(())
    }

    /// Asks the faucet to pay `value` to `address`.
    ///
    /// Errors are returned as-is so the caller can tell the "Bad Request"
    /// precondition failure apart from anything else.
    pub fn faucet(&self, address: &str, value: u64) -> Result<String> {
        let route = Route::new(&["r", "faucet"])
            .param("address", address)
            .param("value", &value.to_string())
            .param("key", &self.api_pass);
        let body = self.transport.request(Method::Post, &route, None)?;
        parse_txid(&body)
    }
}
