use std::sync::Arc;

uniffi::custom_newtype!(KeyAlias, String);
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyAlias(pub String);

#[derive(Debug, uniffi::Error, thiserror::Error)]
pub enum CryptoError {
    #[error("{0}")]
    General(String),
}

type Result<T, E = CryptoError> = ::std::result::Result<T, E>;

/// An interface that can provide access to cryptographic keypairs from the native crypto API.
///
/// The core never generates or stores key material itself (see Non-goals); this is the
/// only seam between it and a secure-enclave, HSM, or software key on the native side.
#[uniffi::export(with_foreign)]
pub trait KeyStore: Send + Sync {
    /// Retrieve a cryptographic keypair by alias. The cryptographic key must be usable for
    /// creating digital signatures, and must not be usable for encryption.
    fn get_signing_key(&self, alias: KeyAlias) -> Result<Arc<dyn SigningKey>>;
}

/// A cryptographic keypair that can be used for signing.
///
/// The signing contract for the mdoc proximity core is fixed: ECDSA/SHA-256 over P-256.
/// The signature is accepted back in either DER or raw IEEE-P1363 fixed-width encoding;
/// see [`ensure_raw_fixed_width_signature`].
#[uniffi::export(with_foreign)]
pub trait SigningKey: Send + Sync {
    /// Generates a public JWK for this key.
    fn jwk(&self) -> Result<String>;
    /// Produces a signature of unknown encoding over `payload`.
    fn sign(&self, payload: Vec<u8>) -> Result<Vec<u8>>;
}

/// Errors raised while normalizing a signature returned by a [`SigningKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, uniffi::Error)]
pub enum SignatureEncodingError {
    #[error("signature is neither valid DER nor raw fixed-width P-256 ECDSA encoding")]
    Unrecognized,
}

/// Converts a P-256 ECDSA signature of either DER or raw fixed-width (IEEE-P1363) encoding
/// to the 64-byte raw fixed-width encoding the mdoc wire format requires.
///
/// This is the DER ⇄ raw normalization named in the presentation session's signing
/// contract: an external signer may return either encoding, and callers must not need to
/// know which one it chose.
pub fn ensure_raw_fixed_width_signature(bytes: &[u8]) -> std::result::Result<Vec<u8>, SignatureEncodingError> {
    use p256::ecdsa::Signature;
    match (Signature::from_slice(bytes), Signature::from_der(bytes)) {
        (Ok(sig), _) | (_, Ok(sig)) => Ok(sig.to_vec()),
        _ => Err(SignatureEncodingError::Unrecognized),
    }
}

#[cfg(test)]
pub(crate) use test::*;

#[cfg(test)]
mod test {
    use super::*;
    use p256::ecdsa::signature::Signer;
    use std::{collections::HashMap, sync::Mutex};

    /// In-memory [`KeyStore`] for tests; generates and holds P-256 signing keys by alias.
    #[derive(Default)]
    pub(crate) struct InMemoryKeyStore(Mutex<HashMap<KeyAlias, p256::SecretKey>>);

    impl InMemoryKeyStore {
        pub(crate) fn generate(&self, alias: KeyAlias) -> p256::PublicKey {
            let secret = p256::SecretKey::random(&mut rand::rng());
            let public = secret.public_key();
            self.0.lock().unwrap().insert(alias, secret);
            public
        }
    }

    impl KeyStore for InMemoryKeyStore {
        fn get_signing_key(&self, alias: KeyAlias) -> Result<Arc<dyn SigningKey>> {
            let secret = self
                .0
                .lock()
                .unwrap()
                .get(&alias)
                .cloned()
                .ok_or_else(|| CryptoError::General(format!("no key for alias {alias:?}")))?;
            Ok(Arc::new(InMemorySigningKey(secret)))
        }
    }

    pub(crate) struct InMemorySigningKey(p256::SecretKey);

    impl SigningKey for InMemorySigningKey {
        fn jwk(&self) -> Result<String> {
            Ok(self.0.public_key().to_jwk_string())
        }

        fn sign(&self, payload: Vec<u8>) -> Result<Vec<u8>> {
            let signing_key = p256::ecdsa::SigningKey::from(&self.0);
            let signature: p256::ecdsa::Signature = signing_key.sign(&payload);
            Ok(signature.to_der().to_vec())
        }
    }

    #[test]
    fn normalizes_der_and_raw_to_the_same_bytes() {
        let store = InMemoryKeyStore::default();
        let alias = KeyAlias("test".into());
        store.generate(alias.clone());
        let key = store.get_signing_key(alias).unwrap();
        let der = key.sign(b"payload".to_vec()).unwrap();
        let raw = ensure_raw_fixed_width_signature(&der).unwrap();
        // raw encoding fed back through the normalizer is already a fixed point.
        let raw_again = ensure_raw_fixed_width_signature(&raw).unwrap();
        assert_eq!(raw, raw_again);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            ensure_raw_fixed_width_signature(b"not a signature"),
            Err(SignatureEncodingError::Unrecognized)
        );
    }
}
