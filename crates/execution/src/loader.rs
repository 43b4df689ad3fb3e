//! Rebuilds working sets from persisted contract rows.

use std::collections::BTreeSet;
use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use dvm_api::ContractStore;
use dvm_types::error::{DriverError, StoreError};
use dvm_types::ContractHash;
use dvm_vm::{decode_state, script, LoadedContract, WorkingSet};

/// Compresses contract source for the `contracts` table.
pub fn compress_source(source: &str) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(source.as_bytes())
        .expect("writing to a Vec");
    encoder.finish().expect("writing to a Vec")
}

/// Inverse of [`compress_source`], for rows read back from the store.
pub fn decompress_source(blob: &[u8]) -> Result<String, StoreError> {
    let mut out = String::new();
    ZlibDecoder::new(blob)
        .read_to_string(&mut out)
        .map_err(|e| StoreError::Corrupt(format!("contract source failed to inflate: {e}")))?;
    Ok(out)
}

/// One consolidated fetch of every contract a block touches: source rows,
/// compiled programs, and the latest persisted state at or before
/// `max_height`.
///
/// Hashes with no contract row are silently absent from the result (the
/// dispatcher reports them as unknown). A contract whose stored source no
/// longer compiles is also skipped, with a logged reason.
pub async fn load_working_set<S: ContractStore + ?Sized>(
    store: &S,
    hashes: impl IntoIterator<Item = ContractHash>,
    max_height: u64,
) -> Result<WorkingSet, DriverError> {
    let unique: BTreeSet<ContractHash> = hashes.into_iter().collect();
    let mut ws = WorkingSet::new();
    if unique.is_empty() {
        return Ok(ws);
    }

    let wanted: Vec<ContractHash> = unique.iter().copied().collect();
    let mut states = store.latest_states(&wanted, max_height).await?;

    for hash in unique {
        let Some(row) = store.contract(&hash).await? else {
            continue;
        };
        let source = decompress_source(&row.source)?;
        let program = match script::compile(&source) {
            Ok(program) => program,
            Err(e) => {
                tracing::warn!(
                    target: "driver",
                    contract = %hash,
                    error = %e,
                    "stored contract source failed to compile; skipping"
                );
                continue;
            }
        };
        let mut contract = LoadedContract::new(hash, program);
        if let Some(state) = states.remove(&hash) {
            contract.variables = decode_state(&state.state_json)?;
        }
        ws.insert(contract);
    }
    Ok(ws)
}
