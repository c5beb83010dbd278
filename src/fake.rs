//! In-memory stand-in for the regtest HTTP API.
//!
//! Speaks the same paths as the real server through the `Transport` trait,
//! so the whole stack above the socket can be exercised without a node.

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{deserialize, serialize_hex};
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction as BtcTransaction, TxIn,
    TxOut, Txid, Witness,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use crate::chain::{Input, Output, Transaction, Unspent};
use crate::def::{DEFAULT_API_PASS, FAUCET_MIN_HEIGHT, UNCONFIRMED_HEIGHT};
use crate::errors::*;
use crate::transport::{Method, Route, Transport};

/// Change returned to the faucet wallet in every payment.
const FAUCET_CHANGE: u64 = 100_000;

struct Indexed {
    unspent: Unspent,
    /// Listings of the address left before this entry shows up.
    hidden_polls: u32,
    /// Never shows up.
    hidden: bool,
}

struct FaucetFailure {
    remaining: u32,
    code: u16,
    reason: String,
}

struct State {
    height: u32,
    faucet_payments: u32,
    txs: HashMap<String, Transaction>,
    index: Vec<Indexed>,
    index_lag: u32,
    hide_payments: bool,
    pay_to: Option<String>,
    failure: Option<FaucetFailure>,
    requests: Vec<String>,
}

pub struct FakeRegtest {
    api_pass: String,
    state: Mutex<State>,
}

fn status(code: u16, reason: &str) -> Error {
    ErrorKind::HttpStatus(code, reason.to_string()).into()
}

fn bad_request() -> Error {
    status(400, "Bad Request")
}

fn script_address(script: &ScriptBuf) -> Option<String> {
    Address::from_script(script, Network::Regtest)
        .ok()
        .map(|a| a.to_string())
}

fn address_script(address: &str) -> Option<ScriptBuf> {
    Address::from_str(address)
        .ok()?
        .require_network(Network::Regtest)
        .ok()
        .map(|a| a.script_pubkey())
}

/// JSON view of a transaction, as `/t/{txid}/json` renders it.
pub fn describe(tx: &BtcTransaction) -> Transaction {
    Transaction {
        tx_id: tx.compute_txid().to_string(),
        tx_hex: serialize_hex(tx),
        vsize: tx.vsize() as u64,
        version: tx.version.0,
        locktime: tx.lock_time.to_consensus_u32(),
        ins: tx
            .input
            .iter()
            .map(|txin| Input {
                tx_id: txin.previous_output.txid.to_string(),
                vout: txin.previous_output.vout,
                script: hex::encode(txin.script_sig.as_bytes()),
                sequence: txin.sequence.0,
            })
            .collect(),
        outs: tx
            .output
            .iter()
            .map(|txout| Output {
                value: txout.value.to_sat(),
                script: hex::encode(txout.script_pubkey.as_bytes()),
                address: script_address(&txout.script_pubkey),
            })
            .collect(),
    }
}

impl Default for FakeRegtest {
    fn default() -> FakeRegtest {
        FakeRegtest::new()
    }
}

impl FakeRegtest {
    pub fn new() -> FakeRegtest {
        FakeRegtest::with_height(0)
    }

    pub fn with_height(height: u32) -> FakeRegtest {
        FakeRegtest {
            api_pass: DEFAULT_API_PASS.to_string(),
            state: Mutex::new(State {
                height,
                faucet_payments: 0,
                txs: HashMap::new(),
                index: vec![],
                index_lag: 0,
                hide_payments: false,
                pay_to: None,
                failure: None,
                requests: vec![],
            }),
        }
    }

    pub fn height(&self) -> u32 {
        self.state.lock().unwrap().height
    }

    /// Faucet payments are listed only after `polls` listings of their address.
    pub fn set_index_lag(&self, polls: u32) {
        self.state.lock().unwrap().index_lag = polls;
    }

    /// Faucet payments never reach the index.
    pub fn hide_faucet_payments(&self, hide: bool) {
        self.state.lock().unwrap().hide_payments = hide;
    }

    /// Makes the faucet pay `address` instead of whatever was requested.
    pub fn pay_faucet_to(&self, address: Option<String>) {
        self.state.lock().unwrap().pay_to = address;
    }

    /// The next `times` faucet requests fail with `code`, whatever the height.
    pub fn fail_faucet(&self, times: u32, code: u16, reason: &str) {
        self.state.lock().unwrap().failure = Some(FaucetFailure {
            remaining: times,
            code,
            reason: reason.to_string(),
        });
    }

    /// Every request seen so far, as "METHOD path".
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn count_requests(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.starts_with(prefix))
            .count()
    }

    fn check_key(&self, route: &Route) -> Result<()> {
        if route.get("key") != Some(self.api_pass.as_str()) {
            bail!(status(401, "Unauthorized"));
        }
        Ok(())
    }

    fn mine(state: &mut State, count: u32) -> Vec<String> {
        let mut hashes = vec![];
        for _ in 0..count {
            state.height += 1;
            let hash = bitcoin::hashes::sha256d::Hash::hash(&state.height.to_le_bytes());
            hashes.push(hash.to_string());
        }
        let height = state.height as i64;
        for entry in state.index.iter_mut() {
            if entry.unspent.height == Some(UNCONFIRMED_HEIGHT) {
                entry.unspent.height = Some(height);
            }
        }
        hashes
    }

    fn faucet(state: &mut State, address: &str, value: u64) -> Result<String> {
        if let Some(failure) = state.failure.as_mut() {
            if failure.remaining > 0 {
                failure.remaining -= 1;
                return Err(status(failure.code, &failure.reason));
            }
        }
        if state.height < FAUCET_MIN_HEIGHT {
            bail!(bad_request());
        }
        let address = state.pay_to.clone().unwrap_or_else(|| address.to_string());
        let script_pubkey = address_script(&address).ok_or_else(bad_request)?;

        state.faucet_payments += 1;
        // Change first, so the payment does not sit at vout 0.
        let tx = BtcTransaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::all_zeros(), state.faucet_payments),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![
                TxOut {
                    value: Amount::from_sat(FAUCET_CHANGE),
                    script_pubkey: ScriptBuf::new_op_return([0u8; 4]),
                },
                TxOut {
                    value: Amount::from_sat(value),
                    script_pubkey,
                },
            ],
        };
        let described = describe(&tx);
        let txid = described.tx_id.clone();
        state.txs.insert(txid.clone(), described);
        state.index.push(Indexed {
            unspent: Unspent {
                value,
                tx_id: txid.clone(),
                vout: 1,
                address: Some(address),
                height: Some(UNCONFIRMED_HEIGHT),
            },
            hidden_polls: state.index_lag,
            hidden: state.hide_payments,
        });
        Ok(txid)
    }

    fn unspents(state: &mut State, address: &str) -> Vec<Unspent> {
        let mut listed = vec![];
        for entry in state.index.iter_mut() {
            if entry.unspent.address.as_deref() != Some(address) || entry.hidden {
                continue;
            }
            if entry.hidden_polls > 0 {
                entry.hidden_polls -= 1;
                continue;
            }
            listed.push(entry.unspent.clone());
        }
        listed
    }

    fn push(state: &mut State, body: &[u8]) -> Result<()> {
        let raw = std::str::from_utf8(body)
            .ok()
            .and_then(|text| hex::decode(text.trim()).ok())
            .ok_or_else(bad_request)?;
        let tx: BtcTransaction = deserialize(&raw).map_err(|_| bad_request())?;
        for txin in &tx.input {
            let spent_txid = txin.previous_output.txid.to_string();
            let spent_vout = txin.previous_output.vout;
            let before = state.index.len();
            state
                .index
                .retain(|e| !(e.unspent.tx_id == spent_txid && e.unspent.vout == spent_vout));
            if state.index.len() == before {
                bail!(status(400, "Missing Inputs"));
            }
        }
        let described = describe(&tx);
        for (n, out) in described.outs.iter().enumerate() {
            state.index.push(Indexed {
                unspent: Unspent {
                    value: out.value,
                    tx_id: described.tx_id.clone(),
                    vout: n as u32,
                    address: out.address.clone(),
                    height: Some(UNCONFIRMED_HEIGHT),
                },
                hidden_polls: 0,
                hidden: false,
            });
        }
        state.txs.insert(described.tx_id.clone(), described);
        Ok(())
    }
}

impl Transport for FakeRegtest {
    fn request(&self, method: Method, route: &Route, body: Option<&[u8]>) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(format!("{} {}", method, route));

        let segments = route.segments();

        match (method, segments.as_slice()) {
            (Method::Get, ["b", "best", "height"]) => Ok(state.height.to_string().into_bytes()),
            (Method::Post, ["r", "generate"]) => {
                self.check_key(route)?;
                let count = route
                    .get("count")
                    .and_then(|c| c.parse::<u32>().ok())
                    .ok_or_else(bad_request)?;
                let hashes = FakeRegtest::mine(&mut state, count);
                Ok(json!(hashes).to_string().into_bytes())
            }
            (Method::Post, ["r", "faucet"]) => {
                self.check_key(route)?;
                let address = route.get("address").ok_or_else(bad_request)?;
                let value = route
                    .get("value")
                    .and_then(|v| v.parse::<u64>().ok())
                    .ok_or_else(bad_request)?;
                let txid = FakeRegtest::faucet(&mut state, address, value)?;
                Ok(txid.into_bytes())
            }
            (Method::Get, ["a", address, "unspents"]) => {
                let unspents = FakeRegtest::unspents(&mut state, address);
                Ok(json!(unspents).to_string().into_bytes())
            }
            (Method::Get, ["t", txid, "json"]) => match state.txs.get(*txid) {
                Some(tx) => Ok(json!(tx).to_string().into_bytes()),
                None => Err(status(404, "Not Found")),
            },
            (Method::Post, ["t", "push"]) => {
                FakeRegtest::push(&mut state, body.unwrap_or(&[]))?;
                Ok(vec![])
            }
            _ => Err(status(404, "Not Found")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::random_address;

    fn get(fake: &FakeRegtest, route: Route) -> Result<String> {
        let body = fake.request(Method::Get, &route, None)?;
        Ok(String::from_utf8(body).unwrap())
    }

    fn post(fake: &FakeRegtest, route: Route) -> Result<String> {
        let body = fake.request(Method::Post, &route, None)?;
        Ok(String::from_utf8(body).unwrap())
    }

    fn faucet(address: &str, key: &str) -> Route {
        Route::new(&["r", "faucet"])
            .param("address", address)
            .param("value", "10")
            .param("key", key)
    }

    fn unspents(address: &str) -> Route {
        Route::new(&["a", address, "unspents"])
    }

    #[test]
    fn test_key_is_compared_decoded() {
        let fake = FakeRegtest::with_height(432);
        let address = random_address();
        post(&fake, faucet(&address, "satoshi")).unwrap();
        let err = post(&fake, faucet(&address, "satoshi&key=satoshi")).unwrap_err();
        match err.kind() {
            ErrorKind::HttpStatus(401, _) => (),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_mining_confirms_payments() {
        let fake = FakeRegtest::with_height(432);
        let address = random_address();
        post(&fake, faucet(&address, "satoshi")).unwrap();

        let listed: Vec<Unspent> =
            serde_json::from_str(&get(&fake, unspents(&address)).unwrap()).unwrap();
        assert_eq!(Some(UNCONFIRMED_HEIGHT), listed[0].height);

        let generate = Route::new(&["r", "generate"])
            .param("count", "2")
            .param("key", "satoshi");
        post(&fake, generate).unwrap();
        let listed: Vec<Unspent> =
            serde_json::from_str(&get(&fake, unspents(&address)).unwrap()).unwrap();
        assert_eq!(Some(434), listed[0].height);
        assert_eq!("434", get(&fake, Route::new(&["b", "best", "height"])).unwrap());
    }

    #[test]
    fn test_index_lag_counts_listings() {
        let fake = FakeRegtest::with_height(432);
        fake.set_index_lag(2);
        let address = random_address();
        post(&fake, faucet(&address, "satoshi")).unwrap();
        assert_eq!("[]", get(&fake, unspents(&address)).unwrap());
        assert_eq!("[]", get(&fake, unspents(&address)).unwrap());
        assert_ne!("[]", get(&fake, unspents(&address)).unwrap());
    }

    #[test]
    fn test_faucet_rejects_bad_address() {
        let fake = FakeRegtest::with_height(432);
        let err = post(&fake, faucet("garbage", "satoshi")).unwrap_err();
        assert!(err.is_bad_request());
    }

    #[test]
    fn test_push_rejects_garbage() {
        let fake = FakeRegtest::new();
        let err = fake
            .request(Method::Post, &Route::new(&["t", "push"]), Some(b"zz"))
            .unwrap_err();
        assert!(err.is_bad_request());
    }

    #[test]
    fn test_unknown_route() {
        let fake = FakeRegtest::new();
        assert!(get(&fake, Route::new(&["nope"])).unwrap_err().is_not_found());
        assert_eq!(vec!["GET /nope".to_string()], fake.requests());
    }
}
