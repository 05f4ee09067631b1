pub mod driver;
pub mod failure;
pub mod params;
pub mod store;

use serde::{Deserialize, Serialize};

/// Refund window opens this long after swap creation.
pub const BTC_LOCK_TIME_SECS: u64 = 2 * 24 * 60 * 60;

/// Confirmations required before the lock output counts as final.
pub const MIN_TX_CONFIRMATIONS: u32 = 6;

pub const DEFAULT_WITHDRAW_FEE_SATS: u64 = 1_000;

pub const SATS_PER_BITCOIN: u64 = 100_000_000;

/// Which seat this party holds in the swap. The initiator picked the secret
/// and published its hash; the BTC owner funds the Bitcoin side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRole {
    pub is_initiator: bool,
    pub is_btc_owner: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTxId {
    LockTx,
    RefundTx,
    RedeemTx,
    /// Namespace shared with the native-chain side; holds the redeem secret
    /// and its hash, never a Bitcoin transaction of its own.
    BeamRedeemTx,
}

impl SubTxId {
    pub fn as_str(self) -> &'static str {
        match self {
            SubTxId::LockTx => "lock_tx",
            SubTxId::RefundTx => "refund_tx",
            SubTxId::RedeemTx => "redeem_tx",
            SubTxId::BeamRedeemTx => "beam_redeem_tx",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapTxState {
    Initial,
    CreatingTx,
    Constructed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxParameterId {
    CreateTime,
    AtomicSwapAmount,
    AtomicSwapAddress,
    AtomicSwapPeerAddress,
    AtomicSwapExternalLockTime,
    PreImage,
    PeerLockImage,
    AtomicSwapExternalTxId,
    AtomicSwapExternalTxOutputIndex,
    AtomicSwapExternalTx,
    TransactionRegistered,
    State,
    SubTxIndex,
}

impl TxParameterId {
    pub fn as_str(self) -> &'static str {
        match self {
            TxParameterId::CreateTime => "create_time",
            TxParameterId::AtomicSwapAmount => "atomic_swap_amount",
            TxParameterId::AtomicSwapAddress => "atomic_swap_address",
            TxParameterId::AtomicSwapPeerAddress => "atomic_swap_peer_address",
            TxParameterId::AtomicSwapExternalLockTime => "atomic_swap_external_lock_time",
            TxParameterId::PreImage => "pre_image",
            TxParameterId::PeerLockImage => "peer_lock_image",
            TxParameterId::AtomicSwapExternalTxId => "atomic_swap_external_tx_id",
            TxParameterId::AtomicSwapExternalTxOutputIndex => {
                "atomic_swap_external_tx_output_index"
            }
            TxParameterId::AtomicSwapExternalTx => "atomic_swap_external_tx",
            TxParameterId::TransactionRegistered => "transaction_registered",
            TxParameterId::State => "state",
            TxParameterId::SubTxIndex => "sub_tx_index",
        }
    }
}

/// Parameter bundle published to the peer once the lock transaction is on
/// the wire: our address becomes their `AtomicSwapPeerAddress`, and the lock
/// outpoint tells them where the HTLC output lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockTxDetails {
    pub peer_address: String,
    pub sub_tx: SubTxId,
    pub tx_id: String,
    pub output_index: u32,
}
