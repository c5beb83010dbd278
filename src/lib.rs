#![recursion_limit = "1024"]

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate serde_json;
extern crate serde;

pub mod chain;
pub mod complex;
pub mod config;
pub mod def;
pub mod errors;
pub mod fake;
pub mod faucet;
pub mod keys;
pub mod metrics;
pub mod regtest;
pub mod transport;
pub mod verify;

pub use crate::chain::{Transaction, Unspent};
pub use crate::config::Config;
pub use crate::faucet::FallbackStrategy;
pub use crate::regtest::{Destination, FundingRequest, RegtestUtils};
pub use crate::verify::ExpectedOutput;
