//! Minimal ABI encoding for the contracts the wallet invokes
//!
//! Only static argument types are needed (`address`, `uint256`), so every argument is a
//! single 32-byte word after the 4-byte selector.
use crate::blockchain::Address;
use crate::crypto::keccak256;
use crate::errors::{WalletError, WalletResult};

pub const UPDATE_ACTIVITY: &str = "updateActivity()";
pub const SET_NOMINEE: &str = "setNominee(address,uint256)";
pub const NOMINEES: &str = "nominees(address)";

/// First four bytes of the Keccak-256 of the canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn uint_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Selector followed by the encoded words.
pub fn encode_call(signature: &str, words: &[[u8; 32]]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32 * words.len());
    data.extend_from_slice(&selector(signature));
    for word in words {
        data.extend_from_slice(word);
    }
    data
}

pub fn update_activity_calldata() -> Vec<u8> {
    encode_call(UPDATE_ACTIVITY, &[])
}

pub fn set_nominee_calldata(nominee: &Address, share: u32) -> Vec<u8> {
    encode_call(
        SET_NOMINEE,
        &[nominee.to_abi_word(), uint_word(u128::from(share))],
    )
}

pub fn nominees_calldata(owner: &Address) -> Vec<u8> {
    encode_call(NOMINEES, &[owner.to_abi_word()])
}

/// Decode a single `uint256` return value. Values above `u128::MAX` are rejected.
pub fn decode_uint(output: &[u8]) -> WalletResult<u128> {
    if output.len() < 32 {
        return Err(WalletError::InvalidResponse(format!(
            "Expected a 32-byte word, got {} bytes",
            output.len()
        )));
    }
    let word = &output[..32];
    if word[..16].iter().any(|b| *b != 0) {
        return Err(WalletError::InvalidResponse(
            "uint256 value exceeds 128 bits".to_string(),
        ));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}
