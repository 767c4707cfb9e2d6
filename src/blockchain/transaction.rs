use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{self, canonical_hash, Address, CryptoError, DigitalSignature};
use super::user::User;
use super::utxo::{NewOutput, OutputId, UnspentOutput, UtxoError, UtxoSet};

/// Tolerance used when comparing amounts built from decimal fractions
pub const AMOUNT_EPSILON: f64 = 1e-9;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Signer {signer} is not the sender of the transaction")]
    WrongSigner { signer: Address },

    #[error("Transaction is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: TransactionStatus,
        actual: TransactionStatus,
    },

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Encoding error: {0}")]
    EncodingError(#[from] serde_json::Error),

    #[error("Output set error: {0}")]
    UtxoError(#[from] UtxoError),
}

/// Lifecycle stage of a transaction.
///
/// Rejected transactions are simply dropped, and a pending transaction is a
/// `Prepared` one sitting in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Created,
    Validated,
    Prepared,
    Applied,
}

/// Canonical record of a selected input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InputRecord {
    /// Id of the transaction that created the spent output
    pub txid: String,
    pub owner: Address,
    pub amount: f64,
}

impl From<&UnspentOutput> for InputRecord {
    fn from(output: &UnspentOutput) -> Self {
        InputRecord {
            txid: output.txid.clone(),
            owner: output.owner.clone(),
            amount: output.amount,
        }
    }
}

/// Frozen record of a prepared transaction, as stored in blocks and the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TransactionRecord {
    pub sequence_id: u64,
    pub txid: String,
    /// Absent for coinbase transactions
    pub sender: Option<Address>,
    pub receiver: Address,
    pub amount: f64,
    pub fee: f64,
    pub inputs: Vec<InputRecord>,
    pub signature: Option<DigitalSignature>,
}

impl TransactionRecord {
    pub fn is_coinbase(&self) -> bool {
        self.sender.is_none()
    }
}

// Field order here is the canonical txid order.
#[derive(Serialize)]
struct TxidPreimage<'a> {
    sequence_id: u64,
    sender: Option<&'a Address>,
    receiver: &'a Address,
    amount: f64,
    inputs: &'a [InputRecord],
}

/// A value transfer, or a coinbase mint when `sender` is absent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub sequence_id: u64,
    pub sender: Option<Address>,
    pub receiver: Address,
    pub amount: f64,
    pub fee: f64,
    /// Outputs selected to fund the transfer
    pub inputs: Vec<UnspentOutput>,
    /// Sum of the selected inputs
    pub input_total: f64,
    pub txid: Option<String>,
    pub signature: Option<DigitalSignature>,
    pub status: TransactionStatus,
}

/// Picks the inputs that fund `target`.
///
/// Candidates are sorted ascending by amount (stable, so equal amounts keep
/// their relative order) and accumulated until the running total covers the
/// target.
pub fn select_inputs(
    mut candidates: Vec<UnspentOutput>,
    target: f64,
) -> Result<(Vec<UnspentOutput>, f64), TransactionError> {
    let available: f64 = candidates.iter().map(|output| output.amount).sum();
    if available + AMOUNT_EPSILON < target {
        return Err(TransactionError::InsufficientFunds {
            required: target,
            available,
        });
    }

    candidates.sort_by(|a, b| a.amount.total_cmp(&b.amount));

    let mut selected = Vec::new();
    let mut total = 0.0;
    for output in candidates {
        total += output.amount;
        selected.push(output);
        if total + AMOUNT_EPSILON >= target {
            return Ok((selected, total));
        }
    }

    Err(TransactionError::InsufficientFunds {
        required: target,
        available: total,
    })
}

fn check_amount(amount: f64) -> Result<(), TransactionError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(TransactionError::InvalidAmount(format!(
            "Amount must be a non-negative number: {}",
            amount
        )));
    }
    Ok(())
}

impl Transaction {
    /// Creates an unvalidated transfer from `sender` to `receiver`
    pub fn new(
        sequence_id: u64,
        sender: Address,
        receiver: Address,
        amount: f64,
        fee: f64,
    ) -> Result<Self, TransactionError> {
        check_amount(amount)?;
        check_amount(fee)?;

        Ok(Transaction {
            sequence_id,
            sender: Some(sender),
            receiver,
            amount,
            fee,
            inputs: Vec::new(),
            input_total: 0.0,
            txid: None,
            signature: None,
            status: TransactionStatus::Created,
        })
    }

    /// Creates a prepared coinbase transaction minting `amount` to `receiver`.
    ///
    /// Coinbase transactions have no inputs, no fee and are never signed.
    pub fn new_coinbase(
        sequence_id: u64,
        receiver: Address,
        amount: f64,
    ) -> Result<Self, TransactionError> {
        check_amount(amount)?;

        let mut transaction = Transaction {
            sequence_id,
            sender: None,
            receiver,
            amount,
            fee: 0.0,
            inputs: Vec::new(),
            input_total: 0.0,
            txid: None,
            signature: None,
            status: TransactionStatus::Validated,
        };
        transaction.txid = Some(transaction.compute_txid()?);
        transaction.status = TransactionStatus::Prepared;

        Ok(transaction)
    }

    /// Runs the whole acceptance protocol for a transfer: select inputs from
    /// `candidates`, derive the txid, sign with `sender` and check the
    /// signature. On any failure the transaction is dropped.
    pub fn prepare_transfer(
        sequence_id: u64,
        sender: &User,
        receiver: Address,
        amount: f64,
        fee: f64,
        candidates: Vec<UnspentOutput>,
    ) -> Result<Self, TransactionError> {
        let mut transaction =
            Transaction::new(sequence_id, sender.address().clone(), receiver, amount, fee)?;
        transaction.select_inputs(candidates)?;
        transaction.sign(sender)?;

        if !transaction.verify_signature(sender.public_key()) {
            return Err(TransactionError::InvalidSignature);
        }

        transaction.status = TransactionStatus::Prepared;
        Ok(transaction)
    }

    pub fn is_coinbase(&self) -> bool {
        self.sender.is_none()
    }

    /// Amount plus fee
    pub fn required(&self) -> f64 {
        self.amount + self.fee
    }

    /// What goes back to the sender once amount and fee are covered
    pub fn change(&self) -> f64 {
        self.input_total - self.amount - self.fee
    }

    fn expect_status(&self, expected: TransactionStatus) -> Result<(), TransactionError> {
        if self.status != expected {
            return Err(TransactionError::InvalidState {
                expected,
                actual: self.status,
            });
        }
        Ok(())
    }

    /// Selects the inputs that fund this transfer from the sender's outputs
    pub fn select_inputs(&mut self, candidates: Vec<UnspentOutput>) -> Result<(), TransactionError> {
        self.expect_status(TransactionStatus::Created)?;

        let (selected, total) = select_inputs(candidates, self.required())?;
        self.inputs = selected;
        self.input_total = total;
        self.status = TransactionStatus::Validated;
        Ok(())
    }

    /// Canonical records of the selected inputs
    pub fn input_records(&self) -> Vec<InputRecord> {
        self.inputs.iter().map(InputRecord::from).collect()
    }

    /// Hashes sequence id, sender, receiver, amount and the selected inputs in
    /// that fixed order
    pub fn compute_txid(&self) -> Result<String, TransactionError> {
        let inputs = self.input_records();
        let preimage = TxidPreimage {
            sequence_id: self.sequence_id,
            sender: self.sender.as_ref(),
            receiver: &self.receiver,
            amount: self.amount,
            inputs: &inputs,
        };

        Ok(canonical_hash(&preimage)?)
    }

    /// Derives the txid and signs it with the sender's key
    pub fn sign(&mut self, signer: &User) -> Result<(), TransactionError> {
        self.expect_status(TransactionStatus::Validated)?;

        if self.sender.as_ref() != Some(signer.address()) {
            return Err(TransactionError::WrongSigner {
                signer: signer.address().clone(),
            });
        }

        let txid = self.compute_txid()?;
        self.signature = Some(signer.sign(txid.as_bytes()));
        self.txid = Some(txid);
        Ok(())
    }

    /// Checks the signature over the txid. Coinbase transactions carry none and
    /// always pass.
    pub fn verify_signature(&self, public_key: &VerifyingKey) -> bool {
        if self.is_coinbase() {
            return true;
        }

        match (&self.txid, &self.signature) {
            (Some(txid), Some(signature)) => {
                crypto::verify_signature(txid.as_bytes(), signature, public_key)
            }
            _ => false,
        }
    }

    /// Outputs this transaction creates when applied: the receiver's output,
    /// then the sender's change if any remains
    pub fn outputs(&self) -> Vec<NewOutput> {
        let txid = self.txid.clone().unwrap_or_default();
        let mut outputs = vec![NewOutput {
            txid: txid.clone(),
            slot: 0,
            owner: self.receiver.clone(),
            amount: self.amount,
        }];

        if let Some(sender) = &self.sender {
            let change = self.change();
            if change > AMOUNT_EPSILON {
                outputs.push(NewOutput {
                    txid,
                    slot: 1,
                    owner: sender.clone(),
                    amount: change,
                });
            }
        }

        outputs
    }

    /// Ids of the outputs this transaction spends
    pub fn consumed(&self) -> Vec<OutputId> {
        self.inputs.iter().map(|output| output.id).collect()
    }

    /// Commits the transaction into `utxos` and returns the fee it paid
    pub fn apply(&mut self, utxos: &mut UtxoSet) -> Result<f64, TransactionError> {
        self.expect_status(TransactionStatus::Prepared)?;

        utxos.apply(&self.consumed(), self.outputs())?;
        self.status = TransactionStatus::Applied;

        Ok(if self.is_coinbase() { 0.0 } else { self.fee })
    }

    /// Frozen record for blocks, the log and snapshots
    pub fn to_record(&self) -> TransactionRecord {
        TransactionRecord {
            sequence_id: self.sequence_id,
            txid: self.txid.clone().unwrap_or_default(),
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            amount: self.amount,
            fee: self.fee,
            inputs: self.input_records(),
            signature: self.signature.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(id: u64, amount: f64, owner: &Address) -> UnspentOutput {
        UnspentOutput {
            id: OutputId(id),
            txid: format!("tx{}", id),
            slot: 0,
            owner: owner.clone(),
            amount,
        }
    }

    fn funded(user: &User, amounts: &[f64]) -> UtxoSet {
        let mut set = UtxoSet::new();
        let produced = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| NewOutput {
                txid: format!("fund{}", i),
                slot: 0,
                owner: user.address().clone(),
                amount: *amount,
            })
            .collect();
        set.apply(&[], produced).unwrap();
        set
    }

    #[test]
    fn test_selection_is_ascending_and_minimal() {
        let owner = Address("owner".to_string());
        let candidates = vec![
            output(0, 50.0, &owner),
            output(1, 5.0, &owner),
            output(2, 20.0, &owner),
            output(3, 1.0, &owner),
        ];

        let (selected, total) = select_inputs(candidates, 25.1).unwrap();
        let ids: Vec<u64> = selected.iter().map(|o| o.id.0).collect();

        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(total, 26.0);
    }

    #[test]
    fn test_selection_keeps_order_of_equal_amounts() {
        let owner = Address("owner".to_string());
        let candidates = vec![
            output(7, 10.0, &owner),
            output(2, 10.0, &owner),
            output(5, 10.0, &owner),
        ];

        let (selected, _) = select_inputs(candidates, 15.0).unwrap();
        let ids: Vec<u64> = selected.iter().map(|o| o.id.0).collect();

        assert_eq!(ids, vec![7, 2]);
    }

    #[test]
    fn test_selection_rejects_short_funds() {
        let owner = Address("owner".to_string());
        let result = select_inputs(vec![output(0, 10.0, &owner)], 10.1);

        match result {
            Err(TransactionError::InsufficientFunds { required, available }) => {
                assert_eq!(required, 10.1);
                assert_eq!(available, 10.0);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(select_inputs(Vec::new(), 0.1).is_err());
    }

    #[test]
    fn test_prepare_transfer_signs_and_verifies() {
        let sender = User::new(0);
        let receiver = User::new(1);
        let utxos = funded(&sender, &[100.0]);

        let transaction = Transaction::prepare_transfer(
            4,
            &sender,
            receiver.address().clone(),
            40.0,
            0.1,
            utxos.outputs_of(sender.address()),
        )
        .unwrap();

        assert_eq!(transaction.status, TransactionStatus::Prepared);
        assert_eq!(transaction.txid.as_deref(), Some(transaction.compute_txid().unwrap().as_str()));
        assert!(transaction.verify_signature(sender.public_key()));
        assert!(!transaction.verify_signature(receiver.public_key()));
        assert!((transaction.change() - 59.9).abs() < AMOUNT_EPSILON);
    }

    #[test]
    fn test_wrong_signer_is_rejected() {
        let sender = User::new(0);
        let other = User::new(1);
        let utxos = funded(&sender, &[10.0]);

        let mut transaction =
            Transaction::new(0, sender.address().clone(), other.address().clone(), 1.0, 0.1).unwrap();
        transaction
            .select_inputs(utxos.outputs_of(sender.address()))
            .unwrap();

        assert!(matches!(
            transaction.sign(&other),
            Err(TransactionError::WrongSigner { .. })
        ));
        assert!(transaction.signature.is_none());
    }

    #[test]
    fn test_txid_depends_on_every_field() {
        let sender = Address("s".to_string());
        let receiver = Address("r".to_string());
        let base = Transaction::new(1, sender.clone(), receiver.clone(), 5.0, 0.1).unwrap();
        let base_id = base.compute_txid().unwrap();

        assert_eq!(base_id, base.clone().compute_txid().unwrap());

        let mut changed = base.clone();
        changed.sequence_id = 2;
        assert_ne!(changed.compute_txid().unwrap(), base_id);

        let mut changed = base.clone();
        changed.amount = 5.5;
        assert_ne!(changed.compute_txid().unwrap(), base_id);

        let mut changed = base.clone();
        changed.receiver = sender.clone();
        assert_ne!(changed.compute_txid().unwrap(), base_id);

        let mut changed = base.clone();
        changed.inputs.push(output(0, 9.0, &sender));
        assert_ne!(changed.compute_txid().unwrap(), base_id);
    }

    #[test]
    fn test_txid_uses_fixed_field_order() {
        let coinbase = Transaction::new_coinbase(0, Address("miner".to_string()), 3.0).unwrap();
        let expected = crypto::sha256_hex(
            br#"{"sequence_id":0,"sender":null,"receiver":"miner","amount":3.0,"inputs":[]}"#,
        );

        assert_eq!(coinbase.txid, Some(expected));
    }

    #[test]
    fn test_coinbase_transaction() {
        let miner = Address("miner".to_string());
        let mut coinbase = Transaction::new_coinbase(9, miner.clone(), 50.0).unwrap();

        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.fee, 0.0);
        assert!(coinbase.signature.is_none());
        assert!(coinbase.verify_signature(User::new(0).public_key()));

        let mut utxos = UtxoSet::new();
        let fee = coinbase.apply(&mut utxos).unwrap();

        assert_eq!(fee, 0.0);
        assert_eq!(utxos.balance_of(&miner), 50.0);
        assert_eq!(coinbase.status, TransactionStatus::Applied);
    }

    #[test]
    fn test_apply_conserves_value() {
        let sender = User::new(0);
        let receiver = User::new(1);
        let mut utxos = funded(&sender, &[30.0, 2.0, 80.0]);

        let mut transaction = Transaction::prepare_transfer(
            0,
            &sender,
            receiver.address().clone(),
            31.0,
            0.1,
            utxos.outputs_of(sender.address()),
        )
        .unwrap();
        let consumed: f64 = transaction.inputs.iter().map(|o| o.amount).sum();
        let ids = transaction.consumed();

        let fee = transaction.apply(&mut utxos).unwrap();

        assert_eq!(fee, 0.1);
        assert!(ids.iter().all(|id| !utxos.contains(*id)));
        assert_eq!(utxos.balance_of(receiver.address()), 31.0);
        let change = transaction.change();
        assert!((consumed - (31.0 + change + fee)).abs() < AMOUNT_EPSILON);
        assert!((utxos.balance_of(sender.address()) - (112.0 - 31.1)).abs() < AMOUNT_EPSILON);
    }

    #[test]
    fn test_exact_cover_creates_no_change() {
        let sender = User::new(0);
        let receiver = User::new(1);
        let utxos = funded(&sender, &[10.1]);

        let transaction = Transaction::prepare_transfer(
            0,
            &sender,
            receiver.address().clone(),
            10.0,
            0.1,
            utxos.outputs_of(sender.address()),
        )
        .unwrap();

        assert_eq!(transaction.outputs().len(), 1);
    }

    #[test]
    fn test_apply_requires_prepared() {
        let mut transaction =
            Transaction::new(0, Address("s".to_string()), Address("r".to_string()), 1.0, 0.1)
                .unwrap();

        let result = transaction.apply(&mut UtxoSet::new());
        assert!(matches!(
            result,
            Err(TransactionError::InvalidState {
                expected: TransactionStatus::Prepared,
                actual: TransactionStatus::Created,
            })
        ));
    }

    #[test]
    fn test_negative_amount_is_rejected() {
        let result = Transaction::new(0, Address("s".to_string()), Address("r".to_string()), -1.0, 0.1);
        assert!(matches!(result, Err(TransactionError::InvalidAmount(_))));
        assert!(Transaction::new_coinbase(0, Address("r".to_string()), f64::NAN).is_err());
    }

    #[test]
    fn test_record_mirrors_transaction() {
        let coinbase = Transaction::new_coinbase(1, Address("m".to_string()), 3.1).unwrap();
        let record = coinbase.to_record();

        assert!(record.is_coinbase());
        assert_eq!(record.sequence_id, 1);
        assert_eq!(Some(record.txid), coinbase.txid);
        assert!(record.inputs.is_empty());
        assert!(record.signature.is_none());
    }
}
