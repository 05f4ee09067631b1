use std::collections::BTreeMap;

use anyhow::{Context as _, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::swap::failure::SwapFailure;
use crate::swap::{SubTxId, TxParameterId};

/// Typed view over the per-swap parameter store. Keys are namespaced by an
/// optional sub-transaction; `None` is the swap-global scope. The store has
/// a single writer, the driver.
pub trait ParamStore {
    fn get_raw(&self, id: TxParameterId, sub_tx: Option<SubTxId>) -> Result<Option<Vec<u8>>>;

    fn set_raw(&mut self, id: TxParameterId, sub_tx: Option<SubTxId>, value: Vec<u8>)
    -> Result<()>;

    fn get<T: DeserializeOwned>(
        &self,
        id: TxParameterId,
        sub_tx: Option<SubTxId>,
    ) -> Result<Option<T>> {
        match self.get_raw(id, sub_tx)? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("decode swap parameter {}", id.as_str()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// A parameter the current advance cannot proceed without; absence fails
    /// the swap rather than the call.
    fn get_mandatory<T: DeserializeOwned>(
        &self,
        id: TxParameterId,
        sub_tx: Option<SubTxId>,
    ) -> Result<T, SwapFailure> {
        self.get(id, sub_tx)?
            .ok_or(SwapFailure::MissingParameter { id, sub_tx })
    }

    fn set<T: Serialize>(
        &mut self,
        id: TxParameterId,
        sub_tx: Option<SubTxId>,
        value: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)
            .with_context(|| format!("encode swap parameter {}", id.as_str()))?;
        self.set_raw(id, sub_tx, bytes)
    }
}

pub(crate) fn scope_str(sub_tx: Option<SubTxId>) -> &'static str {
    match sub_tx {
        Some(sub_tx) => sub_tx.as_str(),
        None => "global",
    }
}

/// In-memory store for tests and tooling; same contract as the SQLite one.
#[derive(Debug, Default)]
pub struct MemoryParamStore {
    entries: BTreeMap<(&'static str, &'static str), Vec<u8>>,
}

impl ParamStore for MemoryParamStore {
    fn get_raw(&self, id: TxParameterId, sub_tx: Option<SubTxId>) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(&(id.as_str(), scope_str(sub_tx))).cloned())
    }

    fn set_raw(
        &mut self,
        id: TxParameterId,
        sub_tx: Option<SubTxId>,
        value: Vec<u8>,
    ) -> Result<()> {
        self.entries.insert((id.as_str(), scope_str(sub_tx)), value);
        Ok(())
    }
}
