use anyhow::{Context as _, Result};
use bitcoin::consensus::encode;
use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::opcodes::OP_0;
use bitcoin::opcodes::all::{
    OP_CHECKSIG, OP_CLTV, OP_DROP, OP_DUP, OP_ELSE, OP_ENDIF, OP_EQUALVERIFY, OP_HASH160, OP_IF,
    OP_PUSHNUM_1, OP_SHA256, OP_SIZE,
};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1};
use bitcoin::sighash::SighashCache;
use bitcoin::{
    Amount, EcdsaSighashType, PrivateKey, ScriptBuf, Transaction, TxOut, absolute, transaction,
};

/// The atomic-swap contract committed to by the lock output. The secret
/// branch pays the redeemer, the locktime branch pays the funder back; both
/// share the trailing `OP_EQUALVERIFY OP_CHECKSIG`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapContract {
    /// hash160 of the funder's pubkey, spendable after the locktime.
    pub refund_pubkey_hash160: [u8; 20],
    /// hash160 of the redeemer's pubkey, spendable with the secret.
    pub redeem_pubkey_hash160: [u8; 20],
    /// Absolute CLTV locktime, unix seconds.
    pub lock_time: u64,
    pub secret_hash: Vec<u8>,
    pub secret_size: usize,
}

impl SwapContract {
    pub fn contract_script(&self) -> Result<ScriptBuf> {
        let secret_size =
            i64::try_from(self.secret_size).context("secret size overflows script number")?;
        let lock_time =
            i64::try_from(self.lock_time).context("lock time overflows script number")?;
        let secret_hash = PushBytesBuf::try_from(self.secret_hash.clone())
            .map_err(|_| anyhow::anyhow!("secret hash too long for a script push"))?;

        Ok(Builder::new()
            .push_opcode(OP_IF)
            .push_opcode(OP_SIZE)
            .push_int(secret_size)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_SHA256)
            .push_slice(secret_hash)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(self.redeem_pubkey_hash160)
            .push_opcode(OP_ELSE)
            .push_int(lock_time)
            .push_opcode(OP_CLTV)
            .push_opcode(OP_DROP)
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(self.refund_pubkey_hash160)
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
            .into_script())
    }
}

/// Which contract branch a withdraw transaction takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawBranch {
    Redeem { secret: [u8; 32] },
    Refund,
}

pub fn lock_image(preimage: &[u8; 32]) -> [u8; 32] {
    sha256::Hash::hash(preimage).to_byte_array()
}

/// Template handed to `fundrawtransaction`: no inputs yet, one output
/// paying the contract.
pub fn lock_transaction(amount_sats: u64, contract_script: ScriptBuf) -> Transaction {
    Transaction {
        version: transaction::Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: vec![],
        output: vec![TxOut {
            value: Amount::from_sat(amount_sats),
            script_pubkey: contract_script,
        }],
    }
}

pub fn encode_raw_transaction(tx: &Transaction) -> String {
    encode::serialize_hex(tx)
}

pub fn decode_raw_transaction(raw_tx_hex: &str) -> Result<Transaction> {
    let bytes = hex::decode(raw_tx_hex).context("decode raw transaction hex")?;
    encode::deserialize(&bytes).context("decode raw transaction")
}

/// Signs input 0 of a withdraw transaction against the contract script and
/// installs the branch-selecting input script. The contract script is the
/// script-code of the legacy sighash; signing against anything else produces
/// a consensus-invalid spend.
pub fn sign_withdraw_transaction(
    raw_tx_hex: &str,
    wif: &str,
    contract_script: &ScriptBuf,
    branch: &WithdrawBranch,
) -> Result<String> {
    let mut tx = decode_raw_transaction(raw_tx_hex).context("decode withdraw tx")?;
    anyhow::ensure!(!tx.input.is_empty(), "withdraw tx has no inputs");

    let key = PrivateKey::from_wif(wif).context("parse node private key")?;
    let secp = Secp256k1::new();

    let input_index = 0;
    let sighash = SighashCache::new(&tx)
        .legacy_signature_hash(input_index, contract_script, EcdsaSighashType::All.to_u32())
        .context("compute withdraw sighash")?;
    let msg = Message::from_digest(sighash.to_byte_array());
    let sig = secp.sign_ecdsa(&msg, &key.inner);

    let mut endorsement = sig.serialize_der().to_vec();
    endorsement.push(EcdsaSighashType::All.to_u32() as u8);

    let pubkey = PublicKey::from_secret_key(&secp, &key.inner).serialize();

    let input_script = withdraw_input_script(&endorsement, &pubkey, branch)?;
    tx.input[input_index].script_sig = input_script;

    Ok(encode_raw_transaction(&tx))
}

pub fn withdraw_input_script(
    endorsement: &[u8],
    pubkey: &[u8; 33],
    branch: &WithdrawBranch,
) -> Result<ScriptBuf> {
    let endorsement = PushBytesBuf::try_from(endorsement.to_vec())
        .map_err(|_| anyhow::anyhow!("endorsement too long for a script push"))?;

    let builder = Builder::new().push_slice(endorsement).push_slice(pubkey);

    let script = match branch {
        // <sig> <pubkey> <secret> 1 selects the secret branch
        WithdrawBranch::Redeem { secret } => builder
            .push_slice(*secret)
            .push_opcode(OP_PUSHNUM_1)
            .into_script(),
        // <sig> <pubkey> 0 selects the locktime branch
        WithdrawBranch::Refund => builder.push_opcode(OP_0).into_script(),
    };
    Ok(script)
}
