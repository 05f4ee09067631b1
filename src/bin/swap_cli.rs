use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context as _, Result};
use beam_btc_swap::btc::rpc::{BitcoinNodeConfig, BitcoinRpcClient};
use beam_btc_swap::swap::driver::{BitcoinSide, BitcoinSideConfig};
use beam_btc_swap::swap::params::ParamStore as _;
use beam_btc_swap::swap::store::SqliteParamStore;
use beam_btc_swap::swap::{
    DEFAULT_WITHDRAW_FEE_SATS, LockTxDetails, MIN_TX_CONFIRMATIONS, SubTxId, SwapRole,
    TxParameterId,
};
use bitcoin::Network;
use clap::{Parser as _, Subcommand};
use serde_json::json;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:18332")]
    rpc_url: String,

    #[arg(long)]
    rpc_user: String,

    #[arg(long)]
    rpc_password: String,

    #[arg(long)]
    store_path: PathBuf,

    #[arg(long, default_value = "testnet")]
    network: Network,

    /// This party defined the redeem secret.
    #[arg(long)]
    initiator: bool,

    /// This party funds the Bitcoin side.
    #[arg(long)]
    btc_owner: bool,

    #[arg(long, default_value_t = DEFAULT_WITHDRAW_FEE_SATS)]
    withdraw_fee_sats: u64,

    #[arg(long, default_value_t = MIN_TX_CONFIRMATIONS)]
    min_confirmations: u32,

    #[arg(long, default_value_t = 5)]
    poll_interval_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record the swap terms and derive our swap address and locktime.
    Init {
        #[arg(long)]
        amount_sats: u64,

        #[arg(long)]
        peer_address: Option<String>,

        /// Swap creation time, unix seconds; defaults to now.
        #[arg(long)]
        create_time: Option<u64>,
    },
    /// Fund, sign and broadcast the lock transaction.
    SendLock,
    /// Print the lock outpoint bundle for the peer.
    LockDetails,
    /// Import the peer's lock outpoint bundle (JSON from `lock-details`).
    ImportLockDetails {
        #[arg(long)]
        details_json: String,
    },
    /// Record the initiator's published secret hash.
    SetPeerLockImage {
        #[arg(long)]
        lock_image_hex: String,
    },
    /// Record the revealed redeem secret.
    SetPreimage {
        #[arg(long)]
        preimage_hex: String,
    },
    /// Wait for the lock output to reach enough confirmations.
    ConfirmLock,
    /// Claim the lock output with the secret.
    Redeem,
    /// Reclaim the lock output after the locktime.
    Refund,
}

enum Advance {
    SendLock,
    ConfirmLock,
    Redeem,
    Refund,
}

#[tokio::main]
async fn main() -> Result<()> {
    beam_btc_swap::logging::init().ok();

    let args = Args::parse();

    let mut store = SqliteParamStore::open(args.store_path.clone()).context("open swap store")?;
    let rpc = BitcoinRpcClient::new(BitcoinNodeConfig {
        url: args.rpc_url.clone(),
        rpc_user: args.rpc_user.clone(),
        rpc_password: args.rpc_password.clone(),
    });
    let role = SwapRole {
        is_initiator: args.initiator,
        is_btc_owner: args.btc_owner,
    };
    let cfg = BitcoinSideConfig {
        network: args.network,
        withdraw_fee_sats: args.withdraw_fee_sats,
        min_confirmations: args.min_confirmations,
        ..BitcoinSideConfig::default()
    };
    let poll_interval = Duration::from_secs(args.poll_interval_secs);

    match args.command {
        Command::Init {
            amount_sats,
            peer_address,
            create_time,
        } => {
            let create_time = match create_time {
                Some(t) => t,
                None => SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .context("system clock before unix epoch")?
                    .as_secs(),
            };
            if store.get::<u64>(TxParameterId::CreateTime, None)?.is_none() {
                store.set(TxParameterId::CreateTime, None, &create_time)?;
            }
            store.set(TxParameterId::AtomicSwapAmount, None, &amount_sats)?;
            if let Some(peer_address) = peer_address {
                store.set(TxParameterId::AtomicSwapPeerAddress, None, &peer_address)?;
            }

            {
                let mut driver = BitcoinSide::new(&mut store, &rpc, role, cfg.clone());
                while !driver.initial().await? {}
            }
            if store
                .get::<u64>(TxParameterId::AtomicSwapExternalLockTime, None)?
                .is_none()
            {
                let mut driver = BitcoinSide::new(&mut store, &rpc, role, cfg);
                driver.init_lock_time()?;
            }

            let address: String =
                store.get_mandatory(TxParameterId::AtomicSwapAddress, None)?;
            let lock_time: u64 =
                store.get_mandatory(TxParameterId::AtomicSwapExternalLockTime, None)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "swap_address": address,
                    "lock_time": lock_time,
                }))?
            );
        }
        Command::SendLock => {
            let mut driver = BitcoinSide::new(&mut store, &rpc, role, cfg);
            advance_until_done(&mut driver, Advance::SendLock, poll_interval).await?;
            report_registered(&store, SubTxId::LockTx)?;
        }
        Command::LockDetails => {
            let driver = BitcoinSide::new(&mut store, &rpc, role, cfg);
            let details = driver.lock_tx_details()?;
            println!("{}", serde_json::to_string_pretty(&details)?);
        }
        Command::ImportLockDetails { details_json } => {
            let details: LockTxDetails =
                serde_json::from_str(&details_json).context("parse lock details json")?;
            anyhow::ensure!(
                details.sub_tx == SubTxId::LockTx,
                "details bundle is not for the lock tx"
            );
            store.set(
                TxParameterId::AtomicSwapPeerAddress,
                None,
                &details.peer_address,
            )?;
            store.set(
                TxParameterId::AtomicSwapExternalTxId,
                Some(SubTxId::LockTx),
                &details.tx_id,
            )?;
            store.set(
                TxParameterId::AtomicSwapExternalTxOutputIndex,
                Some(SubTxId::LockTx),
                &details.output_index,
            )?;
            tracing::info!(tx_id = %details.tx_id, vout = details.output_index, "lock details imported");
        }
        Command::SetPeerLockImage { lock_image_hex } => {
            let lock_image = decode_array32(&lock_image_hex).context("parse lock image")?;
            store.set(
                TxParameterId::PeerLockImage,
                Some(SubTxId::BeamRedeemTx),
                &lock_image,
            )?;
        }
        Command::SetPreimage { preimage_hex } => {
            let preimage = decode_array32(&preimage_hex).context("parse preimage")?;
            store.set(TxParameterId::PreImage, Some(SubTxId::BeamRedeemTx), &preimage)?;
        }
        Command::ConfirmLock => {
            let mut driver = BitcoinSide::new(&mut store, &rpc, role, cfg);
            advance_until_done(&mut driver, Advance::ConfirmLock, poll_interval).await?;
            println!("{}", serde_json::to_string_pretty(&json!({"confirmed": true}))?);
        }
        Command::Redeem => {
            let mut driver = BitcoinSide::new(&mut store, &rpc, role, cfg);
            advance_until_done(&mut driver, Advance::Redeem, poll_interval).await?;
            report_registered(&store, SubTxId::RedeemTx)?;
        }
        Command::Refund => {
            let mut driver = BitcoinSide::new(&mut store, &rpc, role, cfg);
            advance_until_done(&mut driver, Advance::Refund, poll_interval).await?;
            report_registered(&store, SubTxId::RefundTx)?;
        }
    }

    Ok(())
}

async fn advance_until_done(
    driver: &mut BitcoinSide<'_, SqliteParamStore, BitcoinRpcClient>,
    advance: Advance,
    poll_interval: Duration,
) -> Result<()> {
    loop {
        let done = match advance {
            Advance::SendLock => driver.send_lock_tx().await?,
            Advance::ConfirmLock => driver.confirm_lock_tx().await?,
            Advance::Redeem => driver.send_redeem().await?,
            Advance::Refund => driver.send_refund().await?,
        };
        if done {
            return Ok(());
        }
        tokio::time::sleep(poll_interval).await;
    }
}

fn report_registered(store: &SqliteParamStore, sub_tx: SubTxId) -> Result<()> {
    let tx_id: String = store.get_mandatory(TxParameterId::AtomicSwapExternalTxId, Some(sub_tx))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "sub_tx": sub_tx.as_str(),
            "tx_id": tx_id,
        }))?
    );
    Ok(())
}

fn decode_array32(hex_str: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str).context("decode hex")?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected 32 bytes"))
}
