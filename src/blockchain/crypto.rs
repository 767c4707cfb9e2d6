use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// Returns the lowercase hex SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hashes the canonical JSON encoding of `value`.
///
/// The encoding follows the field declaration order of the serialized struct,
/// so callers control the canonical order by declaring fields in it. Keys are
/// never sorted.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let encoded = serde_json::to_vec(value)?;
    Ok(sha256_hex(&encoded))
}

/// A ledger address: hex SHA-256 of the owner's public key bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Derives the address of a public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        Address(sha256_hex(public_key.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A hex encoded Ed25519 signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    pub fn from_signature(signature: &Signature) -> Self {
        DigitalSignature(hex::encode(signature.to_bytes()))
    }

    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = hex::decode(&self.0).map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let signature_bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature("Invalid signature length".to_string())
        })?;

        Ok(Signature::from_bytes(&signature_bytes))
    }
}

/// An Ed25519 keypair together with its derived address
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    address: Address,
}

impl Wallet {
    /// Generates a fresh keypair from the operating system RNG
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        Self::from_signing_key(signing_key)
    }

    /// Rebuilds a wallet from 32 secret key bytes
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_array: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes_array)))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let address = Address::from_public_key(&verifying_key);

        Wallet {
            signing_key,
            verifying_key,
            address,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn public_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Signs `message` with the wallet's private key
    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        let signature = self.signing_key.sign(message);
        DigitalSignature::from_signature(&signature)
    }

    /// Exports the secret key bytes. Only snapshot export should need this.
    pub fn export_secret_key(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

/// Parses a hex encoded 32-byte public key
pub fn public_key_from_hex(encoded: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = hex::decode(encoded).map_err(|e| CryptoError::DecodingError(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey("Invalid public key length".to_string()))?;

    VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Verifies a signature against a message and public key.
///
/// A malformed signature is reported as `false`, never as an error.
pub fn verify_signature(
    message: &[u8],
    signature: &DigitalSignature,
    public_key: &VerifyingKey,
) -> bool {
    match signature.to_signature() {
        Ok(signature) => public_key.verify(message, &signature).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_creation() {
        let wallet = Wallet::generate();
        assert_eq!(wallet.address().0.len(), 64);
        assert_eq!(
            *wallet.address(),
            Address::from_public_key(wallet.public_key())
        );
    }

    #[test]
    fn test_address_is_deterministic_for_a_key() {
        let first = Wallet::from_secret_key(&[7u8; 32]).unwrap();
        let again = Wallet::from_secret_key(&[7u8; 32]).unwrap();
        let other = Wallet::from_secret_key(&[8u8; 32]).unwrap();

        assert_eq!(first.address(), again.address());
        assert_ne!(first.address(), other.address());
        assert_eq!(first.address().0, sha256_hex(first.public_key().as_bytes()));
    }

    #[test]
    fn test_signing_and_verification() {
        let wallet = Wallet::generate();
        let message = b"Hello, world!";

        let signature = wallet.sign(message);
        assert!(verify_signature(message, &signature, wallet.public_key()));

        assert!(!verify_signature(b"Wrong message", &signature, wallet.public_key()));

        let stranger = Wallet::generate();
        assert!(!verify_signature(message, &signature, stranger.public_key()));
    }

    #[test]
    fn test_malformed_signature_is_false() {
        let wallet = Wallet::generate();

        let not_hex = DigitalSignature("zz".to_string());
        assert!(!verify_signature(b"msg", &not_hex, wallet.public_key()));

        let too_short = DigitalSignature("abcd".to_string());
        assert!(!verify_signature(b"msg", &too_short, wallet.public_key()));

        let mut tampered = wallet.sign(b"msg").to_signature().unwrap().to_bytes();
        tampered[0] ^= 0x01;
        let tampered = DigitalSignature(hex::encode(tampered));
        assert!(!verify_signature(b"msg", &tampered, wallet.public_key()));
    }

    #[test]
    fn test_secret_key_round_trip() {
        let wallet = Wallet::generate();
        let restored = Wallet::from_secret_key(&wallet.export_secret_key()).unwrap();

        assert_eq!(restored.address(), wallet.address());
        assert!(Wallet::from_secret_key(&[1u8; 31]).is_err());
    }

    #[test]
    fn test_public_key_from_hex() {
        let wallet = Wallet::generate();
        let encoded = hex::encode(wallet.public_key().as_bytes());

        let parsed = public_key_from_hex(&encoded).unwrap();
        assert_eq!(parsed.as_bytes(), wallet.public_key().as_bytes());
        assert!(public_key_from_hex("00").is_err());
    }

    #[test]
    fn test_canonical_hash_follows_field_order() {
        #[derive(Serialize)]
        struct Ab {
            a: u8,
            b: u8,
        }
        #[derive(Serialize)]
        struct Ba {
            b: u8,
            a: u8,
        }

        let ab = canonical_hash(&Ab { a: 1, b: 2 }).unwrap();
        let ba = canonical_hash(&Ba { b: 2, a: 1 }).unwrap();

        assert_eq!(ab, sha256_hex(br#"{"a":1,"b":2}"#));
        assert_ne!(ab, ba);
    }
}
