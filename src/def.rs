pub const REGTESTUTILS_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080/1";
pub const DEFAULT_API_PASS: &str = "satoshi";

/// Chain height the regtest server needs before its faucet can pay out.
pub const FAUCET_MIN_HEIGHT: u32 = 432;

/// Number of index polls before giving up on a faucet payment.
pub const MAX_POLL_ATTEMPTS: u32 = 5;

/// Inclusive bounds [ms] of the delay before every index poll.
pub const PRE_POLL_DELAY_MS: (u64, u64) = (50, 150);

/// Inclusive bounds [ms] of the delay after a poll that found nothing.
pub const MISSING_INPUTS_DELAY_MS: (u64, u64) = (150, 250);

/// Height reported for outputs that are not confirmed or not yet indexed.
pub const UNCONFIRMED_HEIGHT: i64 = -1;
