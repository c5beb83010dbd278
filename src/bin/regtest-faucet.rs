extern crate regtestutils;

extern crate error_chain;
#[macro_use]
extern crate log;

use error_chain::ChainedError;
use std::process;

use regtestutils::{
    config::CliConfig, def::REGTESTUTILS_VERSION, errors::*, RegtestUtils, Unspent,
};

fn run(cli: &CliConfig) -> Result<Unspent> {
    let utils = RegtestUtils::new(cli.config.clone())?;
    debug!("regtest-faucet {}", REGTESTUTILS_VERSION);
    info!(
        "requesting {} from {}",
        cli.request.value,
        utils.config().api_url
    );
    let unspent = utils.fund(&cli.request)?;
    if cli.verify {
        utils.verify(&unspent)?;
        info!("verified {}:{}", unspent.tx_id, unspent.vout);
    }
    match utils.metrics().encode_text() {
        Ok(text) => debug!("{}", text),
        Err(e) => warn!("{}", e),
    }
    Ok(unspent)
}

fn main() {
    let cli = CliConfig::from_args();
    cli.init_logger();
    match run(&cli) {
        Ok(unspent) => match serde_json::to_string_pretty(&unspent) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("failed to encode result: {}", e);
                process::exit(1);
            }
        },
        Err(e) => {
            error!("faucet failed: {}", e.display_chain());
            process::exit(1);
        }
    }
}
