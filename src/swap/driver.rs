use anyhow::Context as _;
use bitcoin::{Amount, Network, Sequence};
use serde_json::json;

use crate::btc::contract::{self, SwapContract, WithdrawBranch};
use crate::btc::keys;
use crate::btc::rpc::{BitcoinRpc, RawTxInput};
use crate::swap::failure::SwapFailure;
use crate::swap::params::ParamStore;
use crate::swap::{
    BTC_LOCK_TIME_SECS, DEFAULT_WITHDRAW_FEE_SATS, LockTxDetails, MIN_TX_CONFIRMATIONS,
    SATS_PER_BITCOIN, SubTxId, SwapRole, SwapTxState, TxParameterId,
};

#[derive(Debug, Clone)]
pub struct BitcoinSideConfig {
    pub network: Network,
    pub withdraw_fee_sats: u64,
    pub min_confirmations: u32,
    pub lock_time_secs: u64,
}

impl Default for BitcoinSideConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            withdraw_fee_sats: DEFAULT_WITHDRAW_FEE_SATS,
            min_confirmations: MIN_TX_CONFIRMATIONS,
            lock_time_secs: BTC_LOCK_TIME_SECS,
        }
    }
}

/// Bitcoin-side driver of one atomic swap. Owns the LOCK/REFUND/REDEEM
/// sub-transactions and walks each through `Initial -> CreatingTx ->
/// Constructed` against the node, persisting every step so a freshly
/// reconstructed driver picks up where the last one stopped.
///
/// Advance operations return `Ok(false)` when more advances are needed and
/// `Ok(true)` once the operation's goal holds. They run at most one RPC
/// conversation per call.
pub struct BitcoinSide<'a, S, R> {
    params: &'a mut S,
    rpc: &'a R,
    role: SwapRole,
    cfg: BitcoinSideConfig,
    lock_raw_tx: Option<String>,
    withdraw_raw_tx: Option<String>,
    lock_tx_confirmations: u32,
    cancelled: bool,
    failed: bool,
}

impl<'a, S: ParamStore, R: BitcoinRpc> BitcoinSide<'a, S, R> {
    pub fn new(params: &'a mut S, rpc: &'a R, role: SwapRole, cfg: BitcoinSideConfig) -> Self {
        Self {
            params,
            rpc,
            role,
            cfg,
            lock_raw_tx: None,
            withdraw_raw_tx: None,
            lock_tx_confirmations: 0,
            cancelled: false,
            failed: false,
        }
    }

    pub fn role(&self) -> SwapRole {
        self.role
    }

    pub fn lock_tx_confirmations(&self) -> u32 {
        self.lock_tx_confirmations
    }

    /// Observed on the next advance; in-flight replies may still be
    /// processed, but no further node calls are made.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Makes sure our swap address exists and, for the secret-owning role,
    /// that the redeem secret does too.
    pub async fn initial(&mut self) -> Result<bool, SwapFailure> {
        self.ensure_active()?;

        if self
            .params
            .get::<String>(TxParameterId::AtomicSwapAddress, None)?
            .is_none()
        {
            let address = self
                .rpc
                .get_raw_change_address()
                .await
                .map_err(|e| rpc_failure("getrawchangeaddress", e))?;
            self.params
                .set(TxParameterId::AtomicSwapAddress, None, &address)?;
            tracing::info!(%address, "swap address created");
            return Ok(false);
        }

        if self.role.is_btc_owner
            && self.role.is_initiator
            && self
                .params
                .get::<[u8; 32]>(TxParameterId::PreImage, Some(SubTxId::BeamRedeemTx))?
                .is_none()
        {
            let preimage: [u8; 32] = rand::random();
            self.params
                .set(TxParameterId::PreImage, Some(SubTxId::BeamRedeemTx), &preimage)?;
        }

        Ok(true)
    }

    pub fn init_lock_time(&mut self) -> Result<(), SwapFailure> {
        let create_time = self
            .params
            .get_mandatory::<u64>(TxParameterId::CreateTime, None)?;
        let lock_time = create_time + self.cfg.lock_time_secs;
        self.params
            .set(TxParameterId::AtomicSwapExternalLockTime, None, &lock_time)?;
        Ok(())
    }

    /// Bundle sent to the peer after the lock broadcast; becomes their view
    /// of the HTLC outpoint and of us.
    pub fn lock_tx_details(&self) -> Result<LockTxDetails, SwapFailure> {
        let tx_id = self
            .params
            .get_mandatory::<String>(TxParameterId::AtomicSwapExternalTxId, Some(SubTxId::LockTx))?;
        let output_index = self.params.get_mandatory::<u32>(
            TxParameterId::AtomicSwapExternalTxOutputIndex,
            Some(SubTxId::LockTx),
        )?;
        let peer_address = self
            .params
            .get_mandatory::<String>(TxParameterId::AtomicSwapAddress, None)?;

        Ok(LockTxDetails {
            peer_address,
            sub_tx: SubTxId::LockTx,
            tx_id,
            output_index,
        })
    }

    pub async fn send_lock_tx(&mut self) -> Result<bool, SwapFailure> {
        self.ensure_active()?;

        if self.build_lock_tx().await? != SwapTxState::Constructed {
            return Ok(false);
        }
        let Some(raw_tx) = self.lock_raw_tx.clone() else {
            return Ok(false);
        };
        self.register_tx(&raw_tx, SubTxId::LockTx).await
    }

    /// Polls the lock output until it has enough confirmations. Each call
    /// runs at most one `gettxout` round; the caller owns the cadence.
    pub async fn confirm_lock_tx(&mut self) -> Result<bool, SwapFailure> {
        self.ensure_active()?;

        // The lock txid arrives from the peer (or our own broadcast).
        let Some(tx_id) = self
            .params
            .get::<String>(TxParameterId::AtomicSwapExternalTxId, Some(SubTxId::LockTx))?
        else {
            return Ok(false);
        };

        if self.lock_tx_confirmations < self.cfg.min_confirmations {
            self.update_lock_tx_confirmations(&tx_id).await?;
        }

        Ok(self.lock_tx_confirmations >= self.cfg.min_confirmations)
    }

    pub async fn send_redeem(&mut self) -> Result<bool, SwapFailure> {
        self.send_withdraw_tx(SubTxId::RedeemTx).await
    }

    pub async fn send_refund(&mut self) -> Result<bool, SwapFailure> {
        self.send_withdraw_tx(SubTxId::RefundTx).await
    }

    fn ensure_active(&self) -> Result<(), SwapFailure> {
        if self.cancelled {
            return Err(SwapFailure::Cancelled);
        }
        if self.failed {
            return Err(SwapFailure::Halted);
        }
        Ok(())
    }

    fn fatal(&mut self, failure: SwapFailure) -> SwapFailure {
        self.failed = true;
        failure
    }

    /// Recomputes the contract from persisted parameters. Must stay
    /// byte-deterministic: the same script is funded, validated on-chain and
    /// used as the withdraw script-code.
    fn contract(&self) -> Result<SwapContract, SwapFailure> {
        let lock_time = self
            .params
            .get_mandatory::<u64>(TxParameterId::AtomicSwapExternalLockTime, None)?;
        let address = self
            .params
            .get_mandatory::<String>(TxParameterId::AtomicSwapAddress, None)?;
        let peer_address = self
            .params
            .get_mandatory::<String>(TxParameterId::AtomicSwapPeerAddress, None)?;

        // Prefer our own secret; otherwise the initiator's published hash.
        let secret_hash: [u8; 32] = match self
            .params
            .get::<[u8; 32]>(TxParameterId::PreImage, Some(SubTxId::BeamRedeemTx))?
        {
            Some(preimage) => contract::lock_image(&preimage),
            None => self
                .params
                .get_mandatory::<[u8; 32]>(TxParameterId::PeerLockImage, Some(SubTxId::BeamRedeemTx))?,
        };

        let (funder, redeemer) = if self.role.is_btc_owner {
            (&address, &peer_address)
        } else {
            (&peer_address, &address)
        };

        let refund_pubkey_hash160 = keys::pubkey_hash160_from_p2pkh_address(&keys::parse_address(
            funder,
            self.cfg.network,
        )?)?;
        let redeem_pubkey_hash160 = keys::pubkey_hash160_from_p2pkh_address(&keys::parse_address(
            redeemer,
            self.cfg.network,
        )?)?;

        Ok(SwapContract {
            refund_pubkey_hash160,
            redeem_pubkey_hash160,
            lock_time,
            secret_hash: secret_hash.to_vec(),
            secret_size: secret_hash.len(),
        })
    }

    /// LOCK state machine: template -> fundrawtransaction -> sign -> done.
    /// The funding inputs are deterministic, so a driver restarted inside
    /// `CreatingTx` simply starts the conversation over.
    async fn build_lock_tx(&mut self) -> Result<SwapTxState, SwapFailure> {
        if self.lock_raw_tx.is_some() {
            return Ok(SwapTxState::Constructed);
        }

        let state = self
            .params
            .get::<SwapTxState>(TxParameterId::State, Some(SubTxId::LockTx))?
            .unwrap_or(SwapTxState::Initial);

        if state == SwapTxState::Constructed {
            let raw_tx = self
                .params
                .get_mandatory::<String>(TxParameterId::AtomicSwapExternalTx, Some(SubTxId::LockTx))?;
            self.lock_raw_tx = Some(raw_tx);
            return Ok(SwapTxState::Constructed);
        }

        let contract_script = self.contract()?.contract_script()?;
        let amount = self
            .params
            .get_mandatory::<u64>(TxParameterId::AtomicSwapAmount, None)?;
        let template = contract::lock_transaction(amount, contract_script);
        let template_hex = contract::encode_raw_transaction(&template);

        self.params.set(
            TxParameterId::State,
            Some(SubTxId::LockTx),
            &SwapTxState::CreatingTx,
        )?;

        let funded = self
            .rpc
            .fund_raw_transaction(&template_hex)
            .await
            .map_err(|e| rpc_failure("fundrawtransaction", e))?;

        let funded_tx = contract::decode_raw_transaction(&funded.hex)?;
        // Exactly the contract output plus at most one change output; the
        // contract sits at 0 unless change claimed that slot.
        let value_pos: u32 = if funded.changepos == 0 { 1 } else { 0 };
        if funded_tx.output.len() > 2 || funded_tx.output.get(value_pos as usize).is_none() {
            return Err(self.fatal(SwapFailure::UnexpectedFunding {
                outputs: funded_tx.output.len(),
            }));
        }
        self.params.set(
            TxParameterId::AtomicSwapExternalTxOutputIndex,
            Some(SubTxId::LockTx),
            &value_pos,
        )?;

        let signed = self
            .rpc
            .sign_raw_transaction(&funded.hex)
            .await
            .map_err(|e| rpc_failure("signrawtransactionwithwallet", e))?;
        if !signed.complete {
            return Err(self.fatal(SwapFailure::Signing(
                "node returned an incomplete lock signature".into(),
            )));
        }

        self.params.set(
            TxParameterId::AtomicSwapExternalTx,
            Some(SubTxId::LockTx),
            &signed.hex,
        )?;
        self.params.set(
            TxParameterId::State,
            Some(SubTxId::LockTx),
            &SwapTxState::Constructed,
        )?;
        tracing::debug!(vout = value_pos, fee = funded.fee, "lock tx constructed");

        self.lock_raw_tx = Some(signed.hex);
        Ok(SwapTxState::Constructed)
    }

    /// REDEEM/REFUND state machine: createrawtransaction -> dumpprivkey ->
    /// local signing against the contract script.
    async fn build_withdraw_tx(&mut self, sub_tx: SubTxId) -> Result<SwapTxState, SwapFailure> {
        if self.withdraw_raw_tx.is_some() {
            return Ok(SwapTxState::Constructed);
        }

        let state = self
            .params
            .get::<SwapTxState>(TxParameterId::State, Some(sub_tx))?
            .unwrap_or(SwapTxState::Initial);

        if state == SwapTxState::Constructed {
            let raw_tx = self
                .params
                .get_mandatory::<String>(TxParameterId::AtomicSwapExternalTx, Some(sub_tx))?;
            self.withdraw_raw_tx = Some(raw_tx);
            return Ok(SwapTxState::Constructed);
        }

        let amount = self
            .params
            .get_mandatory::<u64>(TxParameterId::AtomicSwapAmount, None)?;
        let fee = self.cfg.withdraw_fee_sats;
        let withdraw_amount = amount
            .checked_sub(fee)
            .with_context(|| format!("withdraw fee {fee} exceeds swap amount {amount}"))?;

        let address = self
            .params
            .get_mandatory::<String>(TxParameterId::AtomicSwapAddress, None)?;
        let lock_tx_id = self
            .params
            .get_mandatory::<String>(TxParameterId::AtomicSwapExternalTxId, Some(SubTxId::LockTx))?;
        let output_index = self.params.get_mandatory::<u32>(
            TxParameterId::AtomicSwapExternalTxOutputIndex,
            Some(SubTxId::LockTx),
        )?;

        // Sequence below final so the refund locktime is enforceable.
        let inputs = [RawTxInput {
            txid: lock_tx_id,
            vout: output_index,
            sequence: Sequence::ENABLE_LOCKTIME_NO_RBF.to_consensus_u32(),
        }];
        let outputs = json!({ &address: Amount::from_sat(withdraw_amount).to_btc() });
        let lock_time = if sub_tx == SubTxId::RefundTx {
            let lock_time = self
                .params
                .get_mandatory::<u64>(TxParameterId::AtomicSwapExternalLockTime, None)?;
            Some(
                u32::try_from(lock_time)
                    .context("lock time does not fit a transaction locktime")?,
            )
        } else {
            None
        };

        self.params
            .set(TxParameterId::State, Some(sub_tx), &SwapTxState::CreatingTx)?;

        let created_hex = self
            .rpc
            .create_raw_transaction(&inputs, &outputs, lock_time)
            .await
            .map_err(|e| rpc_failure("createrawtransaction", e))?;

        let branch = if sub_tx == SubTxId::RedeemTx {
            // The initiator's secret; present on both sides once redeeming.
            let secret = self
                .params
                .get_mandatory::<[u8; 32]>(TxParameterId::PreImage, Some(SubTxId::BeamRedeemTx))?;
            WithdrawBranch::Redeem { secret }
        } else {
            WithdrawBranch::Refund
        };

        let wif = self
            .rpc
            .dump_priv_key(&address)
            .await
            .map_err(|e| rpc_failure("dumpprivkey", e))?;

        let contract_script = self.contract()?.contract_script()?;
        let signed_hex =
            contract::sign_withdraw_transaction(&created_hex, &wif, &contract_script, &branch)
                .map_err(|e| {
                    let failure = SwapFailure::Signing(format!("{e:#}"));
                    self.fatal(failure)
                })?;

        self.params.set(
            TxParameterId::AtomicSwapExternalTx,
            Some(sub_tx),
            &signed_hex,
        )?;
        self.params
            .set(TxParameterId::State, Some(sub_tx), &SwapTxState::Constructed)?;
        tracing::debug!(?sub_tx, "withdraw tx constructed");

        self.withdraw_raw_tx = Some(signed_hex);
        Ok(SwapTxState::Constructed)
    }

    async fn send_withdraw_tx(&mut self, sub_tx: SubTxId) -> Result<bool, SwapFailure> {
        self.ensure_active()?;

        // Consensus burns one of the two; never race them from here either.
        let other = match sub_tx {
            SubTxId::RedeemTx => SubTxId::RefundTx,
            _ => SubTxId::RedeemTx,
        };
        if self
            .params
            .get::<bool>(TxParameterId::TransactionRegistered, Some(other))?
            == Some(true)
        {
            return Err(self.fatal(SwapFailure::ConflictingWithdraw { sub_tx }));
        }

        if self.build_withdraw_tx(sub_tx).await? != SwapTxState::Constructed {
            return Ok(false);
        }
        let Some(raw_tx) = self.withdraw_raw_tx.clone() else {
            return Ok(false);
        };
        self.register_tx(&raw_tx, sub_tx).await
    }

    /// Idempotent broadcast: the outcome is persisted on first reply and
    /// reread afterwards; the txid is written at most once.
    async fn register_tx(&mut self, raw_tx: &str, sub_tx: SubTxId) -> Result<bool, SwapFailure> {
        if let Some(registered) = self
            .params
            .get::<bool>(TxParameterId::TransactionRegistered, Some(sub_tx))?
        {
            if !registered {
                return Err(self.fatal(SwapFailure::FailedToRegister { sub_tx }));
            }
            return Ok(true);
        }

        let tx_id = self
            .rpc
            .send_raw_transaction(raw_tx)
            .await
            .map_err(|e| rpc_failure("sendrawtransaction", e))?;

        let registered = !tx_id.is_empty();
        self.params.set(
            TxParameterId::TransactionRegistered,
            Some(sub_tx),
            &registered,
        )?;

        if !registered {
            return Err(self.fatal(SwapFailure::FailedToRegister { sub_tx }));
        }

        if self
            .params
            .get::<String>(TxParameterId::AtomicSwapExternalTxId, Some(sub_tx))?
            .is_none()
        {
            self.params
                .set(TxParameterId::AtomicSwapExternalTxId, Some(sub_tx), &tx_id)?;
        }
        tracing::info!(?sub_tx, %tx_id, "transaction registered");

        Ok(true)
    }

    /// One `gettxout` round: checks the output still exists, carries enough
    /// value and commits to exactly our contract before trusting its
    /// confirmation count.
    async fn update_lock_tx_confirmations(&mut self, tx_id: &str) -> Result<(), SwapFailure> {
        let output_index = self.params.get_mandatory::<u32>(
            TxParameterId::AtomicSwapExternalTxOutputIndex,
            Some(SubTxId::LockTx),
        )?;

        let Some(tx_out) = self
            .rpc
            .get_tx_out(tx_id, output_index)
            .await
            .map_err(|e| rpc_failure("gettxout", e))?
        else {
            tracing::debug!(%tx_id, vout = output_index, "lock output unknown or spent");
            return Ok(());
        };

        let expected = self
            .params
            .get_mandatory::<u64>(TxParameterId::AtomicSwapAmount, None)?;
        let actual = (tx_out.value * SATS_PER_BITCOIN as f64).round() as u64;
        if actual < expected {
            return Err(self.fatal(SwapFailure::UnexpectedAmount { expected, actual }));
        }

        let on_chain_script =
            hex::decode(&tx_out.script_pub_key.hex).context("decode lock scriptPubKey hex")?;
        let contract_script = self.contract()?.contract_script()?;
        if on_chain_script.as_slice() != contract_script.as_bytes() {
            return Err(self.fatal(SwapFailure::ContractMismatch));
        }

        self.lock_tx_confirmations = tx_out.confirmations;
        tracing::debug!(
            %tx_id,
            confirmations = tx_out.confirmations,
            "lock tx confirmation update"
        );
        Ok(())
    }
}

fn rpc_failure(method: &'static str, err: anyhow::Error) -> SwapFailure {
    SwapFailure::Rpc {
        method,
        message: format!("{err:#}"),
    }
}
