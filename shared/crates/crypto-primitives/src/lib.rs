//! Hashing and Ed25519 signing used for content fingerprints and artifact
//! bundle receipts (spec.md §4.12 "bundle signature", error kinds
//! `bundle_signature_missing|invalid`).

use blake3::Hasher as Blake3Hasher;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("signature verification failed")]
    SignatureVerificationFailed,
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
    Blake3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hash {
    pub algorithm: HashAlgorithm,
    pub bytes: Vec<u8>,
}

impl Hash {
    pub fn new(algorithm: HashAlgorithm, bytes: Vec<u8>) -> Self {
        Hash { algorithm, bytes }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn from_hex(algorithm: HashAlgorithm, hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| CryptoError::KeyGenerationFailed(format!("invalid hex: {e}")))?;
        Ok(Hash::new(algorithm, bytes))
    }
}

pub fn hash_data(data: &[u8], algorithm: HashAlgorithm) -> Hash {
    let bytes = match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(data);
            hasher.finalize().to_vec()
        }
        HashAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            hasher.update(data);
            hasher.finalize().to_vec()
        }
        HashAlgorithm::Blake3 => {
            let mut hasher = Blake3Hasher::new();
            hasher.update(data);
            hasher.finalize().as_bytes().to_vec()
        }
    };
    Hash::new(algorithm, bytes)
}

/// Ed25519 key pair used to sign artifact bundle manifests before they are
/// persisted (the MinIO wire format itself is out of scope; only the
/// signature this crate produces is specified).
#[derive(Debug, Clone)]
pub struct Ed25519KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl Ed25519KeyPair {
    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut csprng);
        let verifying_key = signing_key.verifying_key();
        Ed25519KeyPair {
            signing_key,
            verifying_key,
        }
    }

    pub fn public_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing_key.sign(data).to_bytes().to_vec()
    }

    pub fn verify(&self, data: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        self.verifying_key
            .verify(data, signature)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ed25519PublicKey {
    public_key_bytes: [u8; 32],
}

impl Ed25519PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(bytes);
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self {
            public_key_bytes: key_bytes,
        })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.public_key_bytes
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&self.public_key_bytes).map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: 32,
        })
    }
}

/// Thin wrapper over the `rand` CSPRNG for idempotency-key salts and the
/// like; kept separate from `Ed25519KeyPair::generate` so callers don't
/// need a key pair just to get random bytes.
pub struct SecureRandom;

impl SecureRandom {
    pub fn generate_bytes(len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_algorithms_produce_expected_lengths() {
        let data = b"test data";
        assert_eq!(hash_data(data, HashAlgorithm::Sha256).bytes.len(), 32);
        assert_eq!(hash_data(data, HashAlgorithm::Sha512).bytes.len(), 64);
        assert_eq!(hash_data(data, HashAlgorithm::Blake3).bytes.len(), 32);
    }

    #[test]
    fn ed25519_signs_and_verifies() {
        let keypair = Ed25519KeyPair::generate();
        let data = b"bundle manifest bytes";
        let signature = keypair.sign(data);
        keypair
            .verify(data, &Signature::from_slice(&signature).unwrap())
            .unwrap();

        let public_key = Ed25519PublicKey::from_bytes(&keypair.public_key_bytes()).unwrap();
        public_key
            .verifying_key()
            .unwrap()
            .verify(data, &Signature::from_slice(&signature).unwrap())
            .unwrap();
    }

    #[test]
    fn ed25519_rejects_tampered_data() {
        let keypair = Ed25519KeyPair::generate();
        let signature = keypair.sign(b"original");
        let sig = Signature::from_slice(&signature).unwrap();
        assert!(keypair.verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn secure_random_generates_distinct_bytes() {
        let a = SecureRandom::generate_bytes(32);
        let b = SecureRandom::generate_bytes(32);
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
