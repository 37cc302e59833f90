//! Miner account derivation.

use sp_core::crypto::{Ss58AddressFormat, Ss58Codec};
use sp_core::{sr25519, Pair};

use crate::error::MinerConfigError;

/// SS58 prefix of the CESS network.
pub const CESS_SS58_PREFIX: u16 = 11330;

/// Derive the signature account from a mnemonic or secret URI.
pub fn account_from_mnemonic(mnemonic: &str) -> Result<String, MinerConfigError> {
    let pair = sr25519::Pair::from_string(mnemonic.trim(), None)
        .map_err(|e| MinerConfigError::Key(format!("{:?}", e)))?;
    Ok(pair
        .public()
        .to_ss58check_with_version(Ss58AddressFormat::custom(CESS_SS58_PREFIX)))
}

/// Decode an SS58 account into its raw public key.
pub fn public_key_of(account: &str) -> Result<[u8; 32], String> {
    let (public, _format) =
        sr25519::Public::from_ss58check_with_version(account).map_err(|e| format!("{:?}", e))?;
    Ok(public.0)
}

/// Lowercase hex with a `0x` prefix.
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
