use dirs_next::home_dir;
use std::env;
use std::ffi::OsStr;
use std::time::Duration;

use crate::def::{DEFAULT_API_PASS, DEFAULT_API_URL};
use crate::errors::*;
use crate::faucet::FallbackStrategy;
use crate::regtest::{Destination, FundingRequest};

mod internal {
    #![allow(unused)]
    #![allow(clippy::all)]

    include!(concat!(env!("OUT_DIR"), "/configure_me_config.rs"));
}

pub const ENV_API_URL: &str = "APIURL";
pub const ENV_API_PASS: &str = "APIPASS";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoint settings shared by every call made through one `RegtestUtils`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub api_pass: String,
    pub timeout: Duration,
    pub fallback: FallbackStrategy,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            api_url: DEFAULT_API_URL.to_string(),
            api_pass: DEFAULT_API_PASS.to_string(),
            timeout: DEFAULT_TIMEOUT,
            fallback: FallbackStrategy::Disabled,
        }
    }
}

impl Config {
    /// Explicit endpoint, ignoring the process environment.
    pub fn new(api_url: &str, api_pass: &str) -> Config {
        Config {
            api_url: api_url.to_string(),
            api_pass: api_pass.to_string(),
            ..Config::default()
        }
    }

    /// Defaults overridden by `APIURL` and `APIPASS` when they are set.
    pub fn from_env() -> Config {
        resolve(|name| env::var(name).ok(), None, None)
    }

    pub fn with_api_url(mut self, api_url: &str) -> Config {
        self.api_url = api_url.to_string();
        self
    }

    pub fn with_api_pass(mut self, api_pass: &str) -> Config {
        self.api_pass = api_pass.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Config {
        self.timeout = timeout;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackStrategy) -> Config {
        self.fallback = fallback;
        self
    }
}

/// Endpoint settings by priority: explicit values, then `lookup` (the
/// environment), then the defaults. Empty values count as unset.
fn resolve<F>(lookup: F, api_url: Option<&str>, api_pass: Option<&str>) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    let pick = |explicit: Option<&str>, name: &str, default: &str| {
        explicit
            .map(str::to_string)
            .filter(|v| !v.is_empty())
            .or_else(|| lookup(name).filter(|v| !v.is_empty()))
            .unwrap_or_else(|| default.to_string())
    };
    Config {
        api_url: pick(api_url, ENV_API_URL, DEFAULT_API_URL),
        api_pass: pick(api_pass, ENV_API_PASS, DEFAULT_API_PASS),
        ..Config::default()
    }
}

/// Settings of the `regtest-faucet` binary.
#[derive(Debug)]
pub struct CliConfig {
    pub config: Config,
    pub request: FundingRequest,
    pub verify: bool,
    pub verbose: usize,
    pub timestamp: bool,
}

impl CliConfig {
    /// Parses command line arguments, config files and `REGTESTUTILS_*`
    /// variables. Exits the process on invalid arguments.
    pub fn from_args() -> CliConfig {
        use internal::ResultExt;

        let system_config: &OsStr = "/etc/regtestutils/config.toml".as_ref();
        let home_config = home_dir().map(|h| h.join(".regtestutils/config.toml"));
        let cwd_config: &OsStr = "regtestutils.toml".as_ref();
        let configs = std::iter::once(cwd_config)
            .chain(home_config.as_ref().map(AsRef::as_ref))
            .chain(std::iter::once(system_config));

        let (config, _) =
            internal::Config::including_optional_config_files(configs).unwrap_or_exit();

        let request = match build_request(config.address, config.script, config.value) {
            Ok(request) => request,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        };

        let mut endpoint = resolve(
            |name| env::var(name).ok(),
            config.api_url.as_deref(),
            config.api_pass.as_deref(),
        )
        .with_timeout(Duration::from_secs(config.timeout_secs));
        if config.fallback {
            endpoint = endpoint.with_fallback(FallbackStrategy::FetchTransaction);
        }

        CliConfig {
            config: endpoint,
            request,
            verify: config.verify,
            verbose: config.verbose as usize,
            timestamp: config.timestamp,
        }
    }

    pub fn init_logger(&self) {
        let mut log = stderrlog::new();
        log.verbosity(self.verbose);
        log.timestamp(if self.timestamp {
            stderrlog::Timestamp::Millisecond
        } else {
            stderrlog::Timestamp::Off
        });
        log.init()
            .unwrap_or_else(|err| eprintln!("failed to initialize logger: {}", err));
    }
}

fn build_request(
    address: Option<String>,
    script: Option<String>,
    value: u64,
) -> Result<FundingRequest> {
    let destination = match (address, script) {
        (Some(address), None) => Destination::Address(address),
        (None, Some(script)) => {
            let script = hex::decode(&script).chain_err(|| "script is not hex")?;
            Destination::OutputScript(script)
        }
        (Some(_), Some(_)) => {
            bail!(invalid_request("--address and --script are exclusive".into()))
        }
        (None, None) => bail!(invalid_request(
            "one of --address or --script is required".into()
        )),
    };
    Ok(FundingRequest { destination, value })
}
