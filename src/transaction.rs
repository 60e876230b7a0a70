use rlp::RlpStream;
use web3::{
	signing::{
		Key,
		SigningError,
	},
	types::{
		Address,
		Bytes,
		H256,
		U256,
	},
};

use crate::{
	codec::keccak256,
	keys::PrivateKey,
};

/// Legacy transaction body, RLP-serialized and ECDSA-signed per EIP-155.
#[derive(Clone, Debug, Default)]
pub struct Transaction {
	pub nonce: U256,
	pub gas_price: U256,
	pub gas: U256,
	pub to: Option<Address>,
	pub value: U256,
	pub data: Vec<u8>,
}

pub struct SignedTransaction {
	pub raw: Bytes,
	pub hash: H256,
}

impl Transaction {
	fn rlp_append_body(&self, stream: &mut RlpStream) {
		stream.append(&self.nonce);
		stream.append(&self.gas_price);
		stream.append(&self.gas);
		match self.to {
			Some(to) => stream.append(&to),
			None => stream.append_empty_data(),
		};
		stream.append(&self.value);
		stream.append(&self.data);
	}

	/// Hash over `rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0])`,
	/// the payload a signature commits to.
	pub fn signing_hash(&self, chain_id: u64) -> H256 {
		let mut stream = RlpStream::new();
		stream.begin_list(9);
		self.rlp_append_body(&mut stream);
		stream.append(&chain_id);
		stream.append(&0u8);
		stream.append(&0u8);
		H256(keccak256(&stream.out()))
	}

	pub fn sign(
		&self,
		key: &PrivateKey,
		chain_id: u64,
	) -> Result<SignedTransaction, SigningError> {
		let hash = self.signing_hash(chain_id);
		let signature = key.sign(hash.as_bytes(), Some(chain_id))?;

		let mut stream = RlpStream::new();
		stream.begin_list(9);
		self.rlp_append_body(&mut stream);
		stream.append(&signature.v);
		stream.append(&U256::from_big_endian(signature.r.as_bytes()));
		stream.append(&U256::from_big_endian(signature.s.as_bytes()));

		let raw = stream.out().to_vec();
		let hash = H256(keccak256(&raw));
		Ok(SignedTransaction { raw: Bytes(raw), hash })
	}
}
