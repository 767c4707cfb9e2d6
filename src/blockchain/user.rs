use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::convert::TryFrom;

use super::crypto::{self, Address, CryptoError, DigitalSignature, Wallet};

/// Sequential identifier of a registered user
pub type UserId = u64;

/// A registered ledger participant.
///
/// The keypair is generated once at registration and the address never
/// changes afterwards. The private key is only reachable through snapshot
/// export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "UserRecord", into = "UserRecord")]
pub struct User {
    id: UserId,
    wallet: Wallet,
}

/// Serialized form of a user, as it appears in a ledger snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub private_key: String,
    pub public_key: String,
    pub address: Address,
}

/// A user's address and live balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserBalance {
    #[schema(value_type = u64)]
    pub id: UserId,
    pub address: Address,
    pub balance: f64,
}

impl User {
    /// Creates a user with a freshly generated keypair
    pub fn new(id: UserId) -> Self {
        User {
            id,
            wallet: Wallet::generate(),
        }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn address(&self) -> &Address {
        self.wallet.address()
    }

    pub fn public_key(&self) -> &VerifyingKey {
        self.wallet.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> DigitalSignature {
        self.wallet.sign(message)
    }

    pub fn verify(&self, message: &[u8], signature: &DigitalSignature) -> bool {
        crypto::verify_signature(message, signature, self.wallet.public_key())
    }
}

impl From<User> for UserRecord {
    fn from(user: User) -> Self {
        UserRecord {
            id: user.id,
            private_key: hex::encode(user.wallet.export_secret_key()),
            public_key: hex::encode(user.wallet.public_key().as_bytes()),
            address: user.wallet.address().clone(),
        }
    }
}

impl TryFrom<UserRecord> for User {
    type Error = CryptoError;

    fn try_from(record: UserRecord) -> Result<Self, Self::Error> {
        let secret =
            hex::decode(&record.private_key).map_err(|e| CryptoError::DecodingError(e.to_string()))?;
        let wallet = Wallet::from_secret_key(&secret)?;

        let public_key = crypto::public_key_from_hex(&record.public_key)?;
        if public_key != *wallet.public_key() {
            return Err(CryptoError::InvalidPublicKey(format!(
                "public key of user {} does not match its private key",
                record.id
            )));
        }
        if record.address != *wallet.address() {
            return Err(CryptoError::InvalidPublicKey(format!(
                "address of user {} does not match its public key",
                record.id
            )));
        }

        Ok(User {
            id: record.id,
            wallet,
        })
    }
}
