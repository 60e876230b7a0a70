use ethabi::{
	param_type::Writer,
	ParamType,
};
use thiserror::Error;
use tiny_keccak::{
	Hasher,
	Keccak,
};
use web3::types::{
	Address,
	H256,
	U256,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
	#[error("Invalid hex value: `{0}`")]
	Hex(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
	let mut keccak = Keccak::v256();
	let mut result = [0u8; 32];
	keccak.update(data);
	keccak.finalize(&mut result);
	result
}

/// Canonical signature string, `name(type1,type2,...)`.
pub fn canonical_signature(name: &str, params: &[ParamType]) -> String {
	let types: Vec<String> = params.iter().map(Writer::write).collect();
	format!("{}({})", name, types.join(","))
}

/// First four bytes of the canonical signature hash, used as a method selector.
pub fn short_signature(name: &str, params: &[ParamType]) -> [u8; 4] {
	let hash = keccak256(canonical_signature(name, params).as_bytes());
	let mut selector = [0u8; 4];
	selector.copy_from_slice(&hash[..4]);
	selector
}

/// Full canonical signature hash, used as an event topic.
pub fn event_signature(name: &str, params: &[ParamType]) -> H256 {
	H256(keccak256(canonical_signature(name, params).as_bytes()))
}

/// EIP-55 mixed-case checksummed rendering of an address.
pub fn checksum_address(address: &Address) -> String {
	let lower = hex::encode(address.as_bytes());
	let hash = keccak256(lower.as_bytes());

	let mut result = String::with_capacity(42);
	result.push_str("0x");
	for (position, character) in lower.chars().enumerate() {
		let nibble = hash[position / 2] >> (if position % 2 == 0 { 4 } else { 0 }) & 0xf;
		if nibble >= 8 {
			result.extend(character.to_uppercase());
		} else {
			result.push(character);
		}
	}
	result
}

pub fn to_hex(data: &[u8]) -> String {
	format!("0x{}", hex::encode(data))
}

pub fn bytes_from_hex(value: &str) -> Result<Vec<u8>> {
	let stripped = value.trim_start_matches("0x");
	let padded = if stripped.len() % 2 == 0 {
		stripped.to_owned()
	} else {
		format!("0{}", stripped)
	};
	hex::decode(padded).map_err(|_| CodecError::Hex(value.to_owned()))
}

pub fn u256_from_hex(value: &str) -> Result<U256> {
	let bytes = bytes_from_hex(value)?;
	if bytes.len() > 32 {
		return Err(CodecError::Hex(value.to_owned()))
	}
	Ok(U256::from_big_endian(&bytes))
}

pub fn u64_from_hex(value: &str) -> Result<u64> {
	u64::from_str_radix(value.trim_start_matches("0x"), 16)
		.map_err(|_| CodecError::Hex(value.to_owned()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_keccak256_empty() {
		assert_eq!(
			hex::encode(keccak256(&[])),
			"c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470",
		);
	}

	#[test]
	fn test_method_selectors() {
		assert_eq!(short_signature("balanceOf", &[ParamType::Address]), [0x70, 0xa0, 0x82, 0x31]);
		assert_eq!(
			short_signature("transfer", &[ParamType::Address, ParamType::Uint(256)]),
			[0xa9, 0x05, 0x9c, 0xbb],
		);
	}

	#[test]
	fn test_event_topic() {
		let topic = event_signature(
			"Transfer",
			&[ParamType::Address, ParamType::Address, ParamType::Uint(256)],
		);
		assert_eq!(
			hex::encode(topic.as_bytes()),
			"ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
		);
	}

	#[test]
	fn test_checksum_address() {
		let address: Address =
			"5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse().expect("Should parse address");
		assert_eq!(checksum_address(&address), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");

		let address: Address =
			"fb6916095ca1df60bb79ce92ce3ea74c37c5d359".parse().expect("Should parse address");
		assert_eq!(checksum_address(&address), "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359");
	}

	#[test]
	fn test_hex_conversions() {
		assert_eq!(u256_from_hex("0x2710").expect("Should parse"), U256::from(10000));
		assert_eq!(u64_from_hex("0x10").expect("Should parse"), 16);
		assert_eq!(to_hex(&[0xde, 0xad]), "0xdead");
		assert_eq!(bytes_from_hex("0xdead").expect("Should parse"), vec![0xde, 0xad]);
		assert_eq!(bytes_from_hex("0x1").expect("Should parse"), vec![0x01]);
		assert!(u256_from_hex("0xzz").is_err());
	}
}
