use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::Result;
use beam_btc_swap::btc::rpc::{
    BitcoinRpc, FundedTransaction, LockTxOut, RawTxInput, SignedTransaction,
};
use serde_json::Value;

/// Scripted node double: every method pops its next reply from a queue and
/// records the call, so tests can assert both the conversation and its
/// arguments.
#[derive(Default)]
pub struct MockRpc {
    pub change_addresses: RefCell<VecDeque<String>>,
    pub funded: RefCell<VecDeque<FundedTransaction>>,
    pub signed: RefCell<VecDeque<SignedTransaction>>,
    pub created: RefCell<VecDeque<String>>,
    pub priv_keys: RefCell<VecDeque<String>>,
    pub send_replies: RefCell<VecDeque<String>>,
    pub tx_outs: RefCell<VecDeque<Option<LockTxOut>>>,

    pub calls: RefCell<Vec<&'static str>>,
    pub broadcasts: RefCell<Vec<String>>,
    pub create_args: RefCell<Vec<(Vec<RawTxInput>, Value, Option<u32>)>>,
}

impl MockRpc {
    pub fn call_count(&self, method: &str) -> usize {
        self.calls.borrow().iter().filter(|m| **m == method).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.borrow().len()
    }

    fn pop<T>(queue: &RefCell<VecDeque<T>>, what: &str) -> Result<T> {
        queue
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("mock has no scripted reply for {what}"))
    }
}

impl BitcoinRpc for MockRpc {
    async fn get_raw_change_address(&self) -> Result<String> {
        self.calls.borrow_mut().push("getrawchangeaddress");
        Self::pop(&self.change_addresses, "getrawchangeaddress")
    }

    async fn fund_raw_transaction(&self, _raw_tx_hex: &str) -> Result<FundedTransaction> {
        self.calls.borrow_mut().push("fundrawtransaction");
        Self::pop(&self.funded, "fundrawtransaction")
    }

    async fn sign_raw_transaction(&self, _raw_tx_hex: &str) -> Result<SignedTransaction> {
        self.calls.borrow_mut().push("signrawtransactionwithwallet");
        Self::pop(&self.signed, "signrawtransactionwithwallet")
    }

    async fn send_raw_transaction(&self, raw_tx_hex: &str) -> Result<String> {
        self.calls.borrow_mut().push("sendrawtransaction");
        self.broadcasts.borrow_mut().push(raw_tx_hex.to_string());
        Self::pop(&self.send_replies, "sendrawtransaction")
    }

    async fn create_raw_transaction(
        &self,
        inputs: &[RawTxInput],
        outputs: &Value,
        lock_time: Option<u32>,
    ) -> Result<String> {
        self.calls.borrow_mut().push("createrawtransaction");
        self.create_args
            .borrow_mut()
            .push((inputs.to_vec(), outputs.clone(), lock_time));
        Self::pop(&self.created, "createrawtransaction")
    }

    async fn dump_priv_key(&self, _address: &str) -> Result<String> {
        self.calls.borrow_mut().push("dumpprivkey");
        Self::pop(&self.priv_keys, "dumpprivkey")
    }

    async fn get_tx_out(&self, _tx_id: &str, _vout: u32) -> Result<Option<LockTxOut>> {
        self.calls.borrow_mut().push("gettxout");
        Self::pop(&self.tx_outs, "gettxout")
    }
}
