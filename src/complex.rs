use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::script::Builder;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use std::str::FromStr;

use crate::chain::Unspent;
use crate::def::UNCONFIRMED_HEIGHT;
use crate::errors::*;
use crate::keys::KeyPair;

/// Builds a transaction spending the P2PKH output `funding` (owned by `key`)
/// to `output_script`, paying `value`. The rest goes to fees.
pub fn spend_to_script(
    key: &KeyPair,
    funding: &Unspent,
    output_script: &[u8],
    value: u64,
) -> Result<Transaction> {
    if value > funding.value {
        bail!(invalid_request(format!(
            "cannot pay {} out of {}",
            value, funding.value
        )));
    }
    let txid = Txid::from_str(&funding.tx_id)
        .chain_err(|| ErrorKind::InvalidResponse(format!("bad txid {}", funding.tx_id)))?;

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(txid, funding.vout),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey: ScriptBuf::from_bytes(output_script.to_vec()),
        }],
    };

    let sighash_type = EcdsaSighashType::All;
    let sighash = SighashCache::new(&tx)
        .legacy_signature_hash(0, &key.script_pubkey(), sighash_type.to_u32())
        .chain_err(|| "failed to compute sighash")?;
    let secp = Secp256k1::signing_only();
    let msg = Message::from_digest(sighash.to_byte_array());
    let signature = ecdsa::Signature {
        signature: secp.sign_ecdsa(&msg, key.secret_key()),
        sighash_type,
    };

    tx.input[0].script_sig = Builder::new()
        .push_slice(signature.serialize())
        .push_key(key.public_key())
        .into_script();
    Ok(tx)
}

/// Result of broadcasting the spend: the output is not indexed yet.
pub fn broadcast_unspent(tx: &Transaction, value: u64) -> Unspent {
    Unspent {
        value,
        tx_id: tx.compute_txid().to_string(),
        vout: 0,
        address: None,
        height: Some(UNCONFIRMED_HEIGHT),
    }
}

pub fn to_hex(tx: &Transaction) -> String {
    serialize_hex(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::SecretKey;

    fn key() -> KeyPair {
        KeyPair::from_secret_key(SecretKey::from_slice(&[7u8; 32]).unwrap())
    }

    fn funding(value: u64) -> Unspent {
        Unspent {
            value,
            tx_id: "11".repeat(32),
            vout: 2,
            address: Some(key().address()),
            height: Some(500),
        }
    }

    #[test]
    fn test_spend_layout() {
        let target = KeyPair::random().script_pubkey();
        let tx = spend_to_script(&key(), &funding(20000), target.as_bytes(), 10000).unwrap();

        assert_eq!(1, tx.input.len());
        assert_eq!(2, tx.input[0].previous_output.vout);
        assert_eq!("11".repeat(32), tx.input[0].previous_output.txid.to_string());
        assert_eq!(1, tx.output.len());
        assert_eq!(10000, tx.output[0].value.to_sat());
        assert_eq!(target, tx.output[0].script_pubkey);
    }

    #[test]
    fn test_signature_verifies() {
        let key = key();
        let target = KeyPair::random().script_pubkey();
        let tx = spend_to_script(&key, &funding(20000), target.as_bytes(), 10000).unwrap();

        let mut pushes = tx.input[0].script_sig.instructions();
        let sig = pushes.next().unwrap().unwrap();
        let pubkey = pushes.next().unwrap().unwrap();
        assert!(pushes.next().is_none());

        let sig = ecdsa::Signature::from_slice(sig.push_bytes().unwrap().as_bytes()).unwrap();
        assert_eq!(EcdsaSighashType::All, sig.sighash_type);
        assert_eq!(
            key.public_key().to_bytes(),
            pubkey.push_bytes().unwrap().as_bytes().to_vec()
        );

        let sighash = SighashCache::new(&tx)
            .legacy_signature_hash(0, &key.script_pubkey(), EcdsaSighashType::All.to_u32())
            .unwrap();
        let msg = Message::from_digest(sighash.to_byte_array());
        Secp256k1::verification_only()
            .verify_ecdsa(&msg, &sig.signature, &key.public_key().inner)
            .unwrap();
    }

    #[test]
    fn test_value_above_funding() {
        let target = KeyPair::random().script_pubkey();
        assert!(spend_to_script(&key(), &funding(100), target.as_bytes(), 101).is_err());
    }

    #[test]
    fn test_broadcast_unspent() {
        let target = KeyPair::random().script_pubkey();
        let tx = spend_to_script(&key(), &funding(20000), target.as_bytes(), 10000).unwrap();
        let unspent = broadcast_unspent(&tx, 10000);
        assert_eq!(tx.compute_txid().to_string(), unspent.tx_id);
        assert_eq!(0, unspent.vout);
        assert_eq!(Some(-1), unspent.height);
        assert_eq!(None, unspent.address);
        assert!(to_hex(&tx).starts_with("02000000"));
    }
}
