use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dvm_types::codec;
use dvm_types::error::{CodecError, StoreError};
use dvm_types::{ContractHash, Value, ValueMap};

use crate::script::Program;

/// A structured record emitted during a call. Events never feed back into
/// state; they become durable only if the enclosing call commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    /// Field name → value, in emission order. Keys are always strings.
    pub fields: ValueMap,
}

impl Event {
    /// Projects the event into the value space, for gas metering.
    pub fn to_value(&self) -> Value {
        Value::Tuple(vec![
            Value::str(self.name.clone()),
            Value::Map(self.fields.clone()),
        ])
    }

    /// JSON object mapping field names to hex-encoded codec bytes, the
    /// form persisted in the event table.
    pub fn args_json(&self) -> Result<String, CodecError> {
        let mut obj = serde_json::Map::new();
        for (key, value) in self.fields.iter() {
            let name = key.as_str().unwrap_or_default().to_string();
            obj.insert(
                name,
                serde_json::Value::String(hex::encode(codec::encode(value)?)),
            );
        }
        Ok(serde_json::Value::Object(obj).to_string())
    }
}

/// A contract resident in the working set: its compiled method table and
/// its current variable map.
///
/// Cloning is cheap where it matters: the program is shared behind an
/// `Arc`, so a clone deep-copies only the variables.
#[derive(Debug, Clone)]
pub struct LoadedContract {
    pub hash: ContractHash,
    pub program: Arc<Program>,
    pub variables: BTreeMap<String, Value>,
}

impl LoadedContract {
    pub fn new(hash: ContractHash, program: Arc<Program>) -> Self {
        Self {
            hash,
            program,
            variables: BTreeMap::new(),
        }
    }

    /// The variable map as a single codec value, the unit of state-size
    /// metering and of the persisted JSON form.
    pub fn state_value(&self) -> Value {
        Value::Map(
            self.variables
                .iter()
                .map(|(name, value)| (Value::str(name.clone()), value.clone()))
                .collect(),
        )
    }
}

/// The in-memory collection of contracts touched during a block.
///
/// Entries are held behind `Arc` so a snapshot is a map clone that shares
/// every contract; the first write to a contract after a snapshot clones
/// just that contract (`Arc::make_mut`). Reverting a call is dropping the
/// tentative map and restoring the snapshot.
#[derive(Debug, Clone, Default)]
pub struct WorkingSet {
    contracts: HashMap<ContractHash, Arc<LoadedContract>>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn contains(&self, hash: &ContractHash) -> bool {
        self.contracts.contains_key(hash)
    }

    pub fn get(&self, hash: &ContractHash) -> Option<&LoadedContract> {
        self.contracts.get(hash).map(Arc::as_ref)
    }

    pub fn get_mut(&mut self, hash: &ContractHash) -> Option<&mut LoadedContract> {
        self.contracts.get_mut(hash).map(Arc::make_mut)
    }

    pub fn insert(&mut self, contract: LoadedContract) {
        self.contracts.insert(contract.hash, Arc::new(contract));
    }

    pub fn remove(&mut self, hash: &ContractHash) -> Option<Arc<LoadedContract>> {
        self.contracts.remove(hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContractHash, &Arc<LoadedContract>)> {
        self.contracts.iter()
    }

    pub fn hashes(&self) -> impl Iterator<Item = &ContractHash> {
        self.contracts.keys()
    }

    /// O(1)-ish structural snapshot: clones the map of `Arc`s.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Total codec-encoded size of every contract's state, the basis of
    /// the gas meter's state-delta term.
    pub fn encoded_size(&self) -> Result<usize, CodecError> {
        let mut total = 0;
        for contract in self.contracts.values() {
            total += codec::encoded_len(&contract.state_value())?;
        }
        Ok(total)
    }
}

/// Encodes a variable map into the persisted JSON form: an object mapping
/// variable names to hex-encoded codec bytes. Iteration order is the
/// map's order, fixed at write time.
pub fn encode_state(variables: &BTreeMap<String, Value>) -> Result<String, CodecError> {
    let mut obj = serde_json::Map::new();
    for (name, value) in variables {
        obj.insert(
            name.clone(),
            serde_json::Value::String(hex::encode(codec::encode(value)?)),
        );
    }
    Ok(serde_json::Value::Object(obj).to_string())
}

/// Inverse of [`encode_state`], applied to rows read back from the store.
pub fn decode_state(state_json: &str) -> Result<BTreeMap<String, Value>, StoreError> {
    let obj: serde_json::Map<String, serde_json::Value> = serde_json::from_str(state_json)
        .map_err(|e| StoreError::Corrupt(format!("state row is not a JSON object: {e}")))?;
    let mut variables = BTreeMap::new();
    for (name, hex_value) in obj {
        let hex_str = hex_value
            .as_str()
            .ok_or_else(|| StoreError::Corrupt(format!("state of {name} is not a string")))?;
        let bytes = hex::decode(hex_str)
            .map_err(|e| StoreError::Corrupt(format!("state of {name} is not hex: {e}")))?;
        let value = codec::decode(&bytes)
            .map_err(|e| StoreError::Corrupt(format!("state of {name} failed to decode: {e}")))?;
        variables.insert(name, value);
    }
    Ok(variables)
}
