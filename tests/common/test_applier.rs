//! An [`Applier`] driven by the values it is given.
//!
//! Values are UTF-8 commands:
//! - `add:<key>` and `add-indexer:<key>` add the writer `<key>` (base64, as printed by `LogKey`).
//! - `remove:<key>` removes it.
//! - `fork:<key>,<key>,...` replaces the indexers with the listed writers at the indexed System
//!   length.
//! - `join` acknowledges the writer of the node, which is how an optimistic writer is accepted.
//! - `interrupt` halts the base.
//!
//! Anything else is appended verbatim to the `output` view.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use causal_base::{
    append_log::AppendLog,
    applier::{ApplyCalls, ApplyError, ApplyNode, Applier},
    local_state::pluggables::KVStore,
    types::data_types::LogKey,
    view::Views,
};

pub(crate) const OUTPUT: &str = "output";

#[derive(Clone, Default)]
pub(crate) struct TestApplier;

impl Applier for TestApplier {
    fn views(&self) -> Vec<String> {
        vec![OUTPUT.to_string()]
    }

    fn apply<K: KVStore, L: AppendLog>(
        &mut self,
        batch: &[ApplyNode],
        views: &mut Views<L>,
        base: &mut ApplyCalls<K, L>,
    ) -> Result<(), ApplyError> {
        for node in batch {
            let command = String::from_utf8_lossy(&node.value).to_string();
            if let Some(key) = command.strip_prefix("add:") {
                base.add_writer(&parse_key(key)?, false)?;
            } else if let Some(key) = command.strip_prefix("add-indexer:") {
                base.add_writer(&parse_key(key)?, true)?;
            } else if let Some(key) = command.strip_prefix("remove:") {
                base.remove_writer(&parse_key(key)?)?;
            } else if let Some(keys) = command.strip_prefix("fork:") {
                let indexers = keys
                    .split(',')
                    .filter(|key| !key.is_empty())
                    .map(parse_key)
                    .collect::<Result<Vec<LogKey>, ApplyError>>()?;
                let length = base.indexed_system_length();
                base.fork(indexers, length)?;
            } else if command == "join" {
                base.ack_writer(&node.from);
            } else if command == "interrupt" {
                base.interrupt("interrupted by test applier");
            } else {
                views.append(OUTPUT, node.value.clone())?;
            }
        }
        Ok(())
    }
}

pub(crate) fn add(key: &LogKey) -> Vec<u8> {
    format!("add:{}", key).into_bytes()
}

pub(crate) fn add_indexer(key: &LogKey) -> Vec<u8> {
    format!("add-indexer:{}", key).into_bytes()
}

pub(crate) fn remove(key: &LogKey) -> Vec<u8> {
    format!("remove:{}", key).into_bytes()
}

pub(crate) fn fork(indexers: &[LogKey]) -> Vec<u8> {
    let keys: Vec<String> = indexers.iter().map(|key| key.to_string()).collect();
    format!("fork:{}", keys.join(",")).into_bytes()
}

fn parse_key(encoded: &str) -> Result<LogKey, ApplyError> {
    let bytes = STANDARD_NO_PAD
        .decode(encoded)
        .map_err(|err| ApplyError::User(err.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ApplyError::User(format!("not a log key: {}", encoded)))?;
    Ok(LogKey::new(bytes))
}
