use prometheus::{Histogram, HistogramOpts, IntCounter};
use rand::Rng;
use std::thread;
use std::time::Duration;

use crate::chain::{ChainQuery, Transaction, Unspent};
use crate::def::{
    FAUCET_MIN_HEIGHT, MAX_POLL_ATTEMPTS, MISSING_INPUTS_DELAY_MS, PRE_POLL_DELAY_MS,
    UNCONFIRMED_HEIGHT,
};
use crate::errors::*;
use crate::metrics::Metrics;

/// What to do once the index never listed the faucet payment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FallbackStrategy {
    /// Fail with `MissingInputs`.
    Disabled,
    /// Fetch the funding transaction and take the output paying the
    /// destination, bypassing the index.
    FetchTransaction,
}

/// Uniformly random delay, both bounds inclusive.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Jitter {
    min_ms: u64,
    max_ms: u64,
}

impl Jitter {
    pub fn new(min_ms: u64, max_ms: u64) -> Jitter {
        if min_ms <= max_ms {
            Jitter { min_ms, max_ms }
        } else {
            Jitter {
                min_ms: max_ms,
                max_ms: min_ms,
            }
        }
    }

    pub fn none() -> Jitter {
        Jitter::new(0, 0)
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.min_ms == self.max_ms {
            return Duration::from_millis(self.min_ms);
        }
        // The upper bound is exclusive only at u64::MAX.
        Duration::from_millis(rng.gen_range(self.min_ms, self.max_ms.saturating_add(1)))
    }

    fn sleep<R: Rng>(&self, rng: &mut R) {
        let delay = self.sample(rng);
        if delay > Duration::from_millis(0) {
            thread::sleep(delay);
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Delays {
    /// Before every index poll, including the first.
    pub pre_poll: Jitter,
    /// After a poll that did not find the payment.
    pub missing_inputs: Jitter,
}

impl Default for Delays {
    fn default() -> Delays {
        Delays {
            pre_poll: Jitter::new(PRE_POLL_DELAY_MS.0, PRE_POLL_DELAY_MS.1),
            missing_inputs: Jitter::new(MISSING_INPUTS_DELAY_MS.0, MISSING_INPUTS_DELAY_MS.1),
        }
    }
}

impl Delays {
    pub fn none() -> Delays {
        Delays {
            pre_poll: Jitter::none(),
            missing_inputs: Jitter::none(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FaucetOptions {
    pub min_height: u32,
    pub max_attempts: u32,
    pub delays: Delays,
    pub fallback: FallbackStrategy,
}

impl Default for FaucetOptions {
    fn default() -> FaucetOptions {
        FaucetOptions {
            min_height: FAUCET_MIN_HEIGHT,
            max_attempts: MAX_POLL_ATTEMPTS,
            delays: Delays::default(),
            fallback: FallbackStrategy::Disabled,
        }
    }
}

struct FaucetStats {
    requests: IntCounter,
    recoveries: IntCounter,
    blocks_mined: IntCounter,
    polls: IntCounter,
    fallbacks: IntCounter,
    missing_inputs: IntCounter,
    duration: Histogram,
}

impl FaucetStats {
    fn new(metrics: &Metrics) -> FaucetStats {
        FaucetStats {
            requests: metrics.counter_int(prometheus::Opts::new(
                "regtest_faucet_requests",
                "# of requests sent to the faucet endpoint",
            )),
            recoveries: metrics.counter_int(prometheus::Opts::new(
                "regtest_faucet_recoveries",
                "# of times the chain was mined up to the faucet height",
            )),
            blocks_mined: metrics.counter_int(prometheus::Opts::new(
                "regtest_faucet_blocks_mined",
                "# of blocks mined while recovering faucet requests",
            )),
            polls: metrics.counter_int(prometheus::Opts::new(
                "regtest_faucet_polls",
                "# of unspent index polls",
            )),
            fallbacks: metrics.counter_int(prometheus::Opts::new(
                "regtest_faucet_fallbacks",
                "# of payments resolved by fetching the funding transaction",
            )),
            missing_inputs: metrics.counter_int(prometheus::Opts::new(
                "regtest_faucet_missing_inputs",
                "# of acquisitions that gave up on an unindexed payment",
            )),
            duration: metrics.histogram(HistogramOpts::new(
                "regtest_faucet_duration",
                "Time spent acquiring a faucet payment [seconds]",
            )),
        }
    }
}

/// Bookkeeping of one `acquire` call, once the faucet has paid.
struct RetryState {
    attempt: u32,
    observed_txid: String,
}

impl RetryState {
    fn new(observed_txid: String) -> RetryState {
        RetryState {
            attempt: 0,
            observed_txid,
        }
    }
}

/// Takes the output paying `address` straight from the funding transaction.
fn find_output(tx: &Transaction, address: &str) -> Option<Unspent> {
    tx.outs
        .iter()
        .enumerate()
        .find(|(_, out)| out.address.as_deref() == Some(address))
        .map(|(n, out)| Unspent {
            value: out.value,
            tx_id: tx.tx_id.clone(),
            vout: n as u32,
            address: Some(address.to_string()),
            height: Some(UNCONFIRMED_HEIGHT),
        })
}

/// Gets faucet payments to a state where tests can spend them.
///
/// The funding request is sent once (plus one re-send after a "Bad Request"
/// reply). Retries only re-poll the index for the txid the faucet returned.
pub struct Faucet {
    chain: ChainQuery,
    options: FaucetOptions,
    stats: FaucetStats,
}

impl Faucet {
    /// Registers the faucet counters in `metrics`, which can back only one
    /// `Faucet`: a second registration of the same names panics.
    pub(crate) fn new(chain: ChainQuery, options: FaucetOptions, metrics: &Metrics) -> Faucet {
        Faucet {
            chain,
            options,
            stats: FaucetStats::new(metrics),
        }
    }

    pub fn options(&self) -> &FaucetOptions {
        &self.options
    }

    /// Pays `value` to `address` and waits until the index lists the output.
    pub fn acquire(&self, address: &str, value: u64) -> Result<Unspent> {
        if value == 0 {
            bail!(invalid_request("faucet value must be positive".into()));
        }
        let _timer = self.stats.duration.start_timer();
        let mut rng = rand::thread_rng();

        let txid = self.request(address, value)?;
        debug!("faucet paid {} to {} in {}", value, address, txid);
        let mut state = RetryState::new(txid);

        loop {
            self.options.delays.pre_poll.sleep(&mut rng);
            if let Some(unspent) = self.poll(address, &state.observed_txid)? {
                return Ok(unspent);
            }
            state.attempt += 1;
            if state.attempt >= self.options.max_attempts {
                break;
            }
            info!("Missing Inputs, retry #{}", state.attempt);
            self.options.delays.missing_inputs.sleep(&mut rng);
        }

        warn!(
            "{} not listed for {} after {} polls (fallback: {:?})",
            state.observed_txid, address, state.attempt, self.options.fallback
        );
        self.fallback(address, state.observed_txid)
    }

    fn request(&self, address: &str, value: u64) -> Result<String> {
        self.stats.requests.inc();
        let err = match self.chain.faucet(address, value) {
            Ok(txid) => return Ok(txid),
            Err(err) => err,
        };
        if !err.is_bad_request() {
            return Err(err);
        }

        // Read the height only now: a concurrent caller may have mined.
        let height = self.chain.height()?;
        if height < self.options.min_height {
            let count = self.options.min_height - height;
            info!("faucet rejected at height {}, mining {} blocks", height, count);
            self.chain.mine(count)?;
            self.stats.recoveries.inc();
            self.stats.blocks_mined.inc_by(count as u64);
        } else {
            debug!("faucet rejected at height {}, asking again", height);
        }

        self.stats.requests.inc();
        self.chain.faucet(address, value)
    }

    fn poll(&self, address: &str, txid: &str) -> Result<Option<Unspent>> {
        self.stats.polls.inc();
        let mut matching: Vec<Unspent> = self
            .chain
            .unspents(address)?
            .into_iter()
            .filter(|unspent| unspent.tx_id == txid)
            .collect();
        Ok(matching.pop())
    }

    fn fallback(&self, address: &str, txid: String) -> Result<Unspent> {
        if self.options.fallback == FallbackStrategy::FetchTransaction {
            let tx = match self.chain.fetch(&txid) {
                Ok(tx) => Some(tx),
                Err(ref e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            };
            if let Some(unspent) = tx.and_then(|tx| find_output(&tx, address)) {
                debug!("resolved {}:{} from the transaction", txid, unspent.vout);
                self.stats.fallbacks.inc();
                return Ok(unspent);
            }
        }
        self.stats.missing_inputs.inc();
        bail!(ErrorKind::MissingInputs(txid))
    }
}
