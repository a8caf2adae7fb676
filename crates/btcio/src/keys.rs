use std::fmt;

use bitcoin::PrivateKey;
use bitcoin::secp256k1::{All, Keypair, Message, Secp256k1, XOnlyPublicKey, schnorr};

use crate::errors::{BtcioError, BtcioResult};

/// Keys for the envelope taproot output.
///
/// The internal key is tweaked by the script tree root to form the output key
/// and the signing key satisfies the `OP_CHECKSIG` at the end of the envelope.
/// Both default to the x-only key of the loaded secret.
#[derive(Clone)]
pub struct TaprootKeyPair {
    secp: Secp256k1<All>,
    signing: Keypair,
    internal: XOnlyPublicKey,
}

impl fmt::Debug for TaprootKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaprootKeyPair")
            .field("internal", &self.internal)
            .field("signing", &self.signing_pubkey())
            .finish()
    }
}

impl TaprootKeyPair {
    /// Loads the key pair from a WIF-encoded secret.
    pub fn from_wif(wif: &str) -> BtcioResult<Self> {
        let sk = PrivateKey::from_wif(wif).map_err(|e| BtcioError::AddressDerivation(format!("invalid WIF: {e}")))?;
        let secp = Secp256k1::new();
        let signing = Keypair::from_secret_key(&secp, &sk.inner);
        Ok(Self::from_keypair(secp, signing))
    }

    /// Wraps an existing key pair.
    pub fn from_keypair(secp: Secp256k1<All>, signing: Keypair) -> Self {
        let (internal, _) = signing.x_only_public_key();
        Self {
            secp,
            signing,
            internal,
        }
    }

    /// Uses a separate internal key for the output tweak.
    pub fn with_internal_key(mut self, internal: XOnlyPublicKey) -> Self {
        self.internal = internal;
        self
    }

    /// Untweaked internal key.
    pub fn internal_key(&self) -> XOnlyPublicKey {
        self.internal
    }

    /// Key committed to inside the envelope script.
    pub fn signing_pubkey(&self) -> XOnlyPublicKey {
        self.signing.x_only_public_key().0
    }

    /// Shared secp context.
    pub fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }

    pub(crate) fn sign_schnorr(&self, msg: &Message) -> schnorr::Signature {
        self.secp.sign_schnorr_no_aux_rand(msg, &self.signing)
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::secp256k1::SecretKey;

    use super::*;
    use crate::test_utils::test_keys;

    #[test]
    fn wif_loads_same_key_for_both_roles() {
        let sk = PrivateKey::new(SecretKey::from_slice(&[7u8; 32]).unwrap(), bitcoin::Network::Regtest);
        let keys = TaprootKeyPair::from_wif(&sk.to_wif()).unwrap();
        assert_eq!(keys.internal_key(), keys.signing_pubkey());
        assert_eq!(keys.signing_pubkey(), test_keys().signing_pubkey());
    }

    #[test]
    fn rejects_bad_wif() {
        assert!(matches!(
            TaprootKeyPair::from_wif("not-a-key"),
            Err(BtcioError::AddressDerivation(_))
        ));
    }

    #[test]
    fn separate_internal_key() {
        let other = test_keys();
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[9u8; 32]).unwrap();
        let internal = Keypair::from_secret_key(&secp, &sk).x_only_public_key().0;

        let keys = other.with_internal_key(internal);
        assert_eq!(keys.internal_key(), internal);
        assert_ne!(keys.internal_key(), keys.signing_pubkey());
    }
}
