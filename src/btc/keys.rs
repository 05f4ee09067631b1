use anyhow::{Context as _, Result};
use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network};

pub fn parse_address(s: &str, network: Network) -> Result<Address> {
    let address: Address<NetworkUnchecked> = s
        .parse()
        .with_context(|| format!("parse bitcoin address {s}"))?;
    address
        .require_network(network)
        .with_context(|| format!("address {s} is not valid on {network}"))
}

pub fn pubkey_hash160_from_p2pkh_address(address: &Address) -> Result<[u8; 20]> {
    let script = address.script_pubkey();
    let bytes = script.as_bytes();
    if bytes.len() != 25
        || bytes[0] != 0x76
        || bytes[1] != 0xa9
        || bytes[2] != 0x14
        || bytes[23] != 0x88
        || bytes[24] != 0xac
    {
        anyhow::bail!("expected P2PKH script_pubkey (0x76a914..88ac), got {script:?}");
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes[3..23]);
    Ok(out)
}
