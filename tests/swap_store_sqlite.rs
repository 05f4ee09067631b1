use anyhow::{Context as _, Result};
use beam_btc_swap::swap::failure::SwapFailure;
use beam_btc_swap::swap::params::ParamStore as _;
use beam_btc_swap::swap::store::SqliteParamStore;
use beam_btc_swap::swap::{SubTxId, SwapTxState, TxParameterId};

#[test]
fn typed_parameters_round_trip_across_reopen() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let path = dir.path().join("swap.sqlite");

    {
        let mut store = SqliteParamStore::open(path.clone())?;
        store.set(TxParameterId::AtomicSwapAmount, None, &250_000u64)?;
        store.set(
            TxParameterId::AtomicSwapAddress,
            None,
            &"mzBc4XEFSdzCDcTxAgf6EZXgsZWpztRhef".to_string(),
        )?;
        store.set(
            TxParameterId::State,
            Some(SubTxId::LockTx),
            &SwapTxState::CreatingTx,
        )?;
        store.set(TxParameterId::PreImage, Some(SubTxId::BeamRedeemTx), &[9u8; 32])?;
        store.set(
            TxParameterId::TransactionRegistered,
            Some(SubTxId::RedeemTx),
            &true,
        )?;

        // Same key in another scope stays independent.
        store.set(
            TxParameterId::State,
            Some(SubTxId::RedeemTx),
            &SwapTxState::Initial,
        )?;
    }

    let store = SqliteParamStore::open(path)?;
    assert_eq!(
        store.get::<u64>(TxParameterId::AtomicSwapAmount, None)?,
        Some(250_000)
    );
    assert_eq!(
        store.get::<String>(TxParameterId::AtomicSwapAddress, None)?,
        Some("mzBc4XEFSdzCDcTxAgf6EZXgsZWpztRhef".to_string())
    );
    assert_eq!(
        store.get::<SwapTxState>(TxParameterId::State, Some(SubTxId::LockTx))?,
        Some(SwapTxState::CreatingTx)
    );
    assert_eq!(
        store.get::<SwapTxState>(TxParameterId::State, Some(SubTxId::RedeemTx))?,
        Some(SwapTxState::Initial)
    );
    assert_eq!(
        store.get::<[u8; 32]>(TxParameterId::PreImage, Some(SubTxId::BeamRedeemTx))?,
        Some([9u8; 32])
    );
    assert_eq!(
        store.get::<bool>(TxParameterId::TransactionRegistered, Some(SubTxId::RedeemTx))?,
        Some(true)
    );
    assert_eq!(
        store.get::<bool>(TxParameterId::TransactionRegistered, Some(SubTxId::LockTx))?,
        None
    );
    Ok(())
}

#[test]
fn set_overwrites_in_place() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let mut store = SqliteParamStore::open(dir.path().join("swap.sqlite"))?;

    store.set(
        TxParameterId::State,
        Some(SubTxId::LockTx),
        &SwapTxState::Initial,
    )?;
    store.set(
        TxParameterId::State,
        Some(SubTxId::LockTx),
        &SwapTxState::Constructed,
    )?;

    assert_eq!(
        store.get::<SwapTxState>(TxParameterId::State, Some(SubTxId::LockTx))?,
        Some(SwapTxState::Constructed)
    );
    Ok(())
}

#[test]
fn missing_mandatory_parameter_fails_the_swap() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let store = SqliteParamStore::open(dir.path().join("swap.sqlite"))?;

    let err = store
        .get_mandatory::<u64>(TxParameterId::AtomicSwapAmount, None)
        .unwrap_err();
    assert!(matches!(
        err,
        SwapFailure::MissingParameter {
            id: TxParameterId::AtomicSwapAmount,
            sub_tx: None
        }
    ));
    Ok(())
}
