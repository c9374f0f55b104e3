use starknet_types_core::{
    felt::{Felt, NonZeroFelt},
    hash::{Pedersen, StarkHash},
};
use tiny_keccak::{Hasher, Keccak};

/// `"STARKNET_CONTRACT_ADDRESS"` as a short string.
const CONTRACT_ADDRESS_PREFIX: Felt =
    Felt::from_hex_unchecked("0x535441524b4e45545f434f4e54524143545f41444452455353");

/// `2 ** 251 - 256`.
const L2_ADDRESS_UPPER_BOUND: Felt =
    Felt::from_hex_unchecked("0x7ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff00");

/// Address a contract gets when deployed with the given salt, class and
/// constructor arguments. Accounts are always deployed with deployer `0`.
pub fn calculate_contract_address(
    salt: Felt,
    class_hash: Felt,
    constructor_calldata: &[Felt],
    deployer_address: Felt,
) -> Felt {
    let address = Pedersen::hash_array(&[
        CONTRACT_ADDRESS_PREFIX,
        deployer_address,
        salt,
        class_hash,
        Pedersen::hash_array(constructor_calldata),
    ]);

    match NonZeroFelt::try_from(L2_ADDRESS_UPPER_BOUND) {
        Ok(bound) => address.mod_floor(&bound),
        Err(_) => address,
    }
}

/// Starknet keccak of an entry point name: keccak256 truncated to 250 bits.
pub fn selector_from_name(name: &str) -> Felt {
    let mut hasher = Keccak::v256();
    hasher.update(name.as_bytes());

    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    hash[0] &= 0b0000_0011;

    Felt::from_bytes_be(&hash)
}
