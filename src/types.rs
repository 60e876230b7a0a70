use serde::Deserialize;

pub use web3::types::{
	Address,
	BlockNumber,
	Bytes,
	CallRequest,
	Filter,
	FilterBuilder,
	Log,
	Trace,
	TraceFilter,
	TraceFilterBuilder,
	TransactionReceipt,
	H160,
	H256,
	U256,
	U64,
};

pub type BlockHash = H256;

pub type GasLimit = U256;

pub type GasPrice = U256;

pub type Nonce = U256;

pub type TransactionHash = H256;

/// Header of a chain head as pushed by the node's subscription channel.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHead {
	pub number: U64,
	pub hash: H256,
	pub parent_hash: H256,
	#[serde(default)]
	pub timestamp: U256,
}
