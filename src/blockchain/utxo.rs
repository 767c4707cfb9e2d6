use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::{BTreeMap, HashSet};
use std::convert::TryFrom;

use super::crypto::Address;

/// Errors that can occur while applying spends to the unspent output set
#[derive(Debug, Error, PartialEq)]
pub enum UtxoError {
    #[error("Stale input: output {0} is not live")]
    StaleInput(OutputId),

    #[error("Output {0} is consumed more than once")]
    DuplicateInput(OutputId),

    #[error("Output slot {slot} of transaction {txid} already exists")]
    DuplicateOutput { txid: String, slot: u32 },

    #[error("Invalid output amount: {0}")]
    InvalidAmount(f64),

    #[error("Inconsistent output set: {0}")]
    Inconsistent(String),
}

/// Identifier of an output within the set, assigned in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutputId(pub u64);

impl std::fmt::Display for OutputId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A live value record owned by an address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub id: OutputId,
    /// Id of the transaction that created this output
    pub txid: String,
    /// Position among that transaction's outputs
    pub slot: u32,
    pub owner: Address,
    pub amount: f64,
}

/// An output about to be created by a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutput {
    pub txid: String,
    pub slot: u32,
    pub owner: Address,
    pub amount: f64,
}

/// The live unspent outputs, keyed by output id.
///
/// Iteration follows creation order, which is what input selection relies on
/// to keep equal amounts in their original relative order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UtxoSetRecord", into = "UtxoSetRecord")]
pub struct UtxoSet {
    outputs: BTreeMap<OutputId, UnspentOutput>,
    next_id: u64,
}

/// Serialized form of the output set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoSetRecord {
    pub next_id: u64,
    pub outputs: Vec<UnspentOutput>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all live outputs owned by `address`
    pub fn balance_of(&self, address: &Address) -> f64 {
        self.outputs
            .values()
            .filter(|output| &output.owner == address)
            .map(|output| output.amount)
            .sum()
    }

    /// Live outputs owned by `address`, in creation order
    pub fn outputs_of(&self, address: &Address) -> Vec<UnspentOutput> {
        self.outputs
            .values()
            .filter(|output| &output.owner == address)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: OutputId) -> Option<&UnspentOutput> {
        self.outputs.get(&id)
    }

    pub fn contains(&self, id: OutputId) -> bool {
        self.outputs.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnspentOutput> {
        self.outputs.values()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Total value held in the set
    pub fn total(&self) -> f64 {
        self.outputs.values().map(|output| output.amount).sum()
    }

    /// Id the next created output will receive
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Checks that every id in `consumed` is live and listed once
    pub fn check_spendable(&self, consumed: &[OutputId]) -> Result<(), UtxoError> {
        let mut seen = HashSet::with_capacity(consumed.len());
        for id in consumed {
            if !self.outputs.contains_key(id) {
                return Err(UtxoError::StaleInput(*id));
            }
            if !seen.insert(*id) {
                return Err(UtxoError::DuplicateInput(*id));
            }
        }
        Ok(())
    }

    /// Removes `consumed` and adds `produced` as one atomic step.
    ///
    /// Nothing is mutated unless every consumed output is live and no produced
    /// output collides with a live (transaction id, slot) pair.
    pub fn apply(
        &mut self,
        consumed: &[OutputId],
        produced: Vec<NewOutput>,
    ) -> Result<Vec<OutputId>, UtxoError> {
        self.check_spendable(consumed)?;

        let removed: HashSet<OutputId> = consumed.iter().copied().collect();
        let mut slots: HashSet<(&str, u32)> = self
            .outputs
            .values()
            .filter(|output| !removed.contains(&output.id))
            .map(|output| (output.txid.as_str(), output.slot))
            .collect();

        for output in &produced {
            if !output.amount.is_finite() || output.amount < 0.0 {
                return Err(UtxoError::InvalidAmount(output.amount));
            }
            if !slots.insert((output.txid.as_str(), output.slot)) {
                return Err(UtxoError::DuplicateOutput {
                    txid: output.txid.clone(),
                    slot: output.slot,
                });
            }
        }
        drop(slots);

        for id in consumed {
            self.outputs.remove(id);
        }

        let mut created = Vec::with_capacity(produced.len());
        for output in produced {
            let id = OutputId(self.next_id);
            self.next_id += 1;
            self.outputs.insert(
                id,
                UnspentOutput {
                    id,
                    txid: output.txid,
                    slot: output.slot,
                    owner: output.owner,
                    amount: output.amount,
                },
            );
            created.push(id);
        }

        Ok(created)
    }
}

impl From<UtxoSet> for UtxoSetRecord {
    fn from(set: UtxoSet) -> Self {
        UtxoSetRecord {
            next_id: set.next_id,
            outputs: set.outputs.into_values().collect(),
        }
    }
}

impl TryFrom<UtxoSetRecord> for UtxoSet {
    type Error = UtxoError;

    fn try_from(record: UtxoSetRecord) -> Result<Self, Self::Error> {
        let mut outputs = BTreeMap::new();
        let mut slots = HashSet::new();

        for output in record.outputs {
            if output.id.0 >= record.next_id {
                return Err(UtxoError::Inconsistent(format!(
                    "output {} is not below the id counter {}",
                    output.id, record.next_id
                )));
            }
            if !output.amount.is_finite() || output.amount < 0.0 {
                return Err(UtxoError::InvalidAmount(output.amount));
            }
            if !slots.insert((output.txid.clone(), output.slot)) {
                return Err(UtxoError::DuplicateOutput {
                    txid: output.txid,
                    slot: output.slot,
                });
            }
            if outputs.insert(output.id, output.clone()).is_some() {
                return Err(UtxoError::Inconsistent(format!(
                    "output {} appears twice",
                    output.id
                )));
            }
        }

        Ok(UtxoSet {
            outputs,
            next_id: record.next_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_output(txid: &str, slot: u32, owner: &str, amount: f64) -> NewOutput {
        NewOutput {
            txid: txid.to_string(),
            slot,
            owner: Address(owner.to_string()),
            amount,
        }
    }

    #[test]
    fn test_balance_sums_live_outputs() {
        let mut set = UtxoSet::new();
        set.apply(
            &[],
            vec![
                new_output("a", 0, "alice", 10.0),
                new_output("b", 0, "alice", 5.5),
                new_output("c", 0, "bob", 3.0),
            ],
        )
        .unwrap();

        assert_eq!(set.balance_of(&Address("alice".to_string())), 15.5);
        assert_eq!(set.balance_of(&Address("bob".to_string())), 3.0);
        assert_eq!(set.balance_of(&Address("carol".to_string())), 0.0);
        assert_eq!(set.total(), 18.5);
    }

    #[test]
    fn test_apply_consumes_and_produces() {
        let mut set = UtxoSet::new();
        let created = set
            .apply(&[], vec![new_output("a", 0, "alice", 10.0)])
            .unwrap();
        assert_eq!(created, vec![OutputId(0)]);

        let created = set
            .apply(
                &[OutputId(0)],
                vec![new_output("b", 0, "bob", 4.0), new_output("b", 1, "alice", 6.0)],
            )
            .unwrap();

        assert_eq!(created, vec![OutputId(1), OutputId(2)]);
        assert!(!set.contains(OutputId(0)));
        assert_eq!(set.len(), 2);
        assert_eq!(set.balance_of(&Address("alice".to_string())), 6.0);
    }

    #[test]
    fn test_stale_input_leaves_set_untouched() {
        let mut set = UtxoSet::new();
        set.apply(&[], vec![new_output("a", 0, "alice", 10.0)]).unwrap();
        set.apply(&[OutputId(0)], vec![new_output("b", 0, "bob", 10.0)])
            .unwrap();

        let before = set.clone();
        let result = set.apply(&[OutputId(0)], vec![new_output("c", 0, "carol", 10.0)]);

        assert_eq!(result, Err(UtxoError::StaleInput(OutputId(0))));
        assert_eq!(set, before);
    }

    #[test]
    fn test_input_listed_twice_is_rejected() {
        let mut set = UtxoSet::new();
        set.apply(&[], vec![new_output("a", 0, "alice", 10.0)]).unwrap();

        let result = set.apply(&[OutputId(0), OutputId(0)], vec![]);
        assert_eq!(result, Err(UtxoError::DuplicateInput(OutputId(0))));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_duplicate_slot_is_rejected() {
        let mut set = UtxoSet::new();
        set.apply(&[], vec![new_output("a", 0, "alice", 10.0)]).unwrap();

        let result = set.apply(&[], vec![new_output("a", 0, "bob", 1.0)]);
        assert!(matches!(result, Err(UtxoError::DuplicateOutput { slot: 0, .. })));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_outputs_of_keeps_creation_order() {
        let mut set = UtxoSet::new();
        set.apply(
            &[],
            vec![
                new_output("a", 0, "alice", 3.0),
                new_output("b", 0, "bob", 1.0),
                new_output("c", 0, "alice", 1.0),
            ],
        )
        .unwrap();

        let ids: Vec<OutputId> = set
            .outputs_of(&Address("alice".to_string()))
            .iter()
            .map(|output| output.id)
            .collect();
        assert_eq!(ids, vec![OutputId(0), OutputId(2)]);
    }

    #[test]
    fn test_record_round_trip_and_validation() {
        let mut set = UtxoSet::new();
        set.apply(&[], vec![new_output("a", 0, "alice", 3.0)]).unwrap();

        let record = UtxoSetRecord::from(set.clone());
        assert_eq!(UtxoSet::try_from(record.clone()).unwrap(), set);

        let mut stale_counter = record.clone();
        stale_counter.next_id = 0;
        assert!(UtxoSet::try_from(stale_counter).is_err());

        let mut negative = record;
        negative.outputs[0].amount = -1.0;
        assert!(UtxoSet::try_from(negative).is_err());
    }
}
