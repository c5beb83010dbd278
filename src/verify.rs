use crate::chain::{Transaction, Unspent};
use crate::errors::*;

/// What a transaction output is expected to look like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedOutput {
    pub tx_id: String,
    pub vout: u32,
    pub address: Option<String>,
    pub value: Option<u64>,
}

impl ExpectedOutput {
    pub fn new(tx_id: &str, vout: u32) -> ExpectedOutput {
        ExpectedOutput {
            tx_id: tx_id.to_string(),
            vout,
            address: None,
            value: None,
        }
    }

    pub fn address(mut self, address: &str) -> ExpectedOutput {
        self.address = Some(address.to_string());
        self
    }

    pub fn value(mut self, value: u64) -> ExpectedOutput {
        self.value = Some(value);
        self
    }
}

impl From<&Unspent> for ExpectedOutput {
    fn from(unspent: &Unspent) -> ExpectedOutput {
        ExpectedOutput {
            tx_id: unspent.tx_id.clone(),
            vout: unspent.vout,
            address: unspent.address.clone(),
            value: Some(unspent.value),
        }
    }
}

impl From<Unspent> for ExpectedOutput {
    fn from(unspent: Unspent) -> ExpectedOutput {
        ExpectedOutput::from(&unspent)
    }
}

fn mismatch(msg: String) -> Error {
    ErrorKind::VerificationFailed(msg).into()
}

/// Checks `expected` against the fetched transaction `tx`.
pub fn check_output(tx: &Transaction, expected: &ExpectedOutput) -> Result<()> {
    if tx.tx_id != expected.tx_id {
        bail!(mismatch(format!(
            "fetched {} instead of {}",
            tx.tx_id, expected.tx_id
        )));
    }
    let actual = tx.outs.get(expected.vout as usize).ok_or_else(|| {
        mismatch(format!(
            "{} has {} outputs, no vout {}",
            tx.tx_id,
            tx.outs.len(),
            expected.vout
        ))
    })?;
    if let Some(address) = &expected.address {
        if actual.address.as_ref() != Some(address) {
            bail!(mismatch(format!(
                "{}:{} pays {:?}, expected {}",
                tx.tx_id, expected.vout, actual.address, address
            )));
        }
    }
    if let Some(value) = expected.value {
        if actual.value != value {
            bail!(mismatch(format!(
                "{}:{} has value {}, expected {}",
                tx.tx_id, expected.vout, actual.value, value
            )));
        }
    }
    Ok(())
}
