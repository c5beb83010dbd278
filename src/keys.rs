use bitcoin::secp256k1::{rand, Secp256k1, SecretKey};
use bitcoin::{Address, Network, PrivateKey, PublicKey, ScriptBuf};

/// A throwaway regtest key with its P2PKH address.
pub struct KeyPair {
    private_key: PrivateKey,
    public_key: PublicKey,
}

impl KeyPair {
    pub fn random() -> KeyPair {
        let secp = Secp256k1::new();
        let (secret_key, _) = secp.generate_keypair(&mut rand::thread_rng());
        KeyPair::from_secret_key(secret_key)
    }

    pub fn from_secret_key(secret_key: SecretKey) -> KeyPair {
        let secp = Secp256k1::signing_only();
        let private_key = PrivateKey::new(secret_key, Network::Regtest);
        let public_key = private_key.public_key(&secp);
        KeyPair {
            private_key,
            public_key,
        }
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.private_key.inner
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn to_wif(&self) -> String {
        self.private_key.to_wif()
    }

    pub fn p2pkh(&self) -> Address {
        Address::p2pkh(self.public_key.pubkey_hash(), Network::Regtest)
    }

    pub fn address(&self) -> String {
        self.p2pkh().to_string()
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        self.p2pkh().script_pubkey()
    }
}

/// A fresh P2PKH address nobody is expected to spend from.
pub fn random_address() -> String {
    KeyPair::random().address()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_known_key() {
        let secret_key = SecretKey::from_slice(&[1u8; 32]).unwrap();
        let key = KeyPair::from_secret_key(secret_key);
        // Regtest shares testnet's base58 prefixes.
        assert!(key.to_wif().starts_with('c'));
        let address = key.address();
        assert!(address.starts_with('m') || address.starts_with('n'));

        let parsed = Address::from_str(&address)
            .unwrap()
            .require_network(Network::Regtest)
            .unwrap();
        assert_eq!(key.script_pubkey(), parsed.script_pubkey());
        assert!(key.script_pubkey().is_p2pkh());
    }

    #[test]
    fn test_random_addresses_differ() {
        assert_ne!(random_address(), random_address());
    }
}
