use bitcoin::Network;
use std::sync::{Arc, Mutex};

use crate::chain::{ChainQuery, Transaction, Unspent};
use crate::complex;
use crate::config::Config;
use crate::errors::*;
use crate::faucet::{Faucet, FaucetOptions};
use crate::keys::{self, KeyPair};
use crate::metrics::Metrics;
use crate::transport::{HttpTransport, Transport};
use crate::verify::{check_output, ExpectedOutput};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Address(String),
    OutputScript(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingRequest {
    pub destination: Destination,
    pub value: u64,
}

/// Funding, mining and verification helpers bound to one regtest API.
pub struct RegtestUtils {
    config: Config,
    chain: ChainQuery,
    faucet: Faucet,
    metrics: Metrics,
    random_address: Mutex<Option<String>>,
}

impl RegtestUtils {
    /// Talks HTTP to `config.api_url`.
    pub fn new(config: Config) -> Result<RegtestUtils> {
        let transport = HttpTransport::new(&config.api_url, config.timeout)
            .chain_err(|| format!("invalid API URL {}", config.api_url))?;
        Ok(RegtestUtils::with_transport(config, Arc::new(transport)))
    }

    /// Endpoint from `APIURL`/`APIPASS`, or the loopback defaults.
    pub fn from_env() -> Result<RegtestUtils> {
        RegtestUtils::new(Config::from_env())
    }

    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> RegtestUtils {
        let options = FaucetOptions {
            fallback: config.fallback,
            ..FaucetOptions::default()
        };
        RegtestUtils::with_options(config, transport, options)
    }

    pub fn with_options(
        config: Config,
        transport: Arc<dyn Transport>,
        options: FaucetOptions,
    ) -> RegtestUtils {
        let metrics = Metrics::new();
        let chain = ChainQuery::new(transport, &config.api_pass);
        let faucet = Faucet::new(chain.clone(), options, &metrics);
        RegtestUtils {
            config,
            chain,
            faucet,
            metrics,
            random_address: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn network(&self) -> Network {
        Network::Regtest
    }

    pub fn height(&self) -> Result<u32> {
        self.chain.height()
    }

    pub fn mine(&self, count: u32) -> Result<Vec<String>> {
        self.chain.mine(count)
    }

    pub fn unspents(&self, address: &str) -> Result<Vec<Unspent>> {
        self.chain.unspents(address)
    }

    pub fn fetch(&self, txid: &str) -> Result<Transaction> {
        self.chain.fetch(txid)
    }

    pub fn broadcast(&self, tx_hex: &str) -> Result<()> {
        self.chain.broadcast(tx_hex)
    }

    /// Pays `value` to `address` and returns the output once it is indexed.
    pub fn faucet(&self, address: &str, value: u64) -> Result<Unspent> {
        self.faucet.acquire(address, value)
    }

    /// Funds a throwaway key with twice `value`, then spends `value` from it
    /// to `output_script`. The returned output is unconfirmed and unindexed.
    pub fn faucet_complex(&self, output_script: &[u8], value: u64) -> Result<Unspent> {
        let key = KeyPair::random();
        let funding_value = value
            .checked_mul(2)
            .chain_err(|| invalid_request(format!("value {} too large", value)))?;
        let funding = self.faucet(&key.address(), funding_value)?;

        let tx = complex::spend_to_script(&key, &funding, output_script, value)?;
        self.broadcast(&complex::to_hex(&tx))?;
        let unspent = complex::broadcast_unspent(&tx, value);
        debug!("spent {}:{} into {}", funding.tx_id, funding.vout, unspent.tx_id);
        Ok(unspent)
    }

    pub fn fund(&self, request: &FundingRequest) -> Result<Unspent> {
        match &request.destination {
            Destination::Address(address) => self.faucet(address, request.value),
            Destination::OutputScript(script) => self.faucet_complex(script, request.value),
        }
    }

    /// Fails with `VerificationFailed` unless the transaction's output at
    /// `vout` matches every field set in `expected`.
    pub fn verify<E: Into<ExpectedOutput>>(&self, expected: E) -> Result<()> {
        let expected = expected.into();
        let tx = self.fetch(&expected.tx_id)?;
        check_output(&tx, &expected)
    }

    /// A new random P2PKH address on every call.
    pub fn random_address(&self) -> String {
        keys::random_address()
    }

    /// One random address per instance, created on first use.
    pub fn shared_random_address(&self) -> String {
        let mut cached = self.random_address.lock().unwrap();
        cached.get_or_insert_with(keys::random_address).clone()
    }
}
