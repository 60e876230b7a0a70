use std::collections::HashMap;

use ethabi::{
	Event,
	EventParam,
	ParamType,
	Token,
};
use web3::types::Log;

/// A log matched against a contract's ABI. For a recognized `topics[0]` the
/// decoded event name and parameters are attached; an unrecognized log is
/// passed through with only `raw` set, so callers must tolerate
/// partially-decoded entries.
#[derive(Clone, Debug)]
pub struct ContractLog {
	pub raw: Log,
	pub event: Option<String>,
	pub params: Option<HashMap<String, Token>>,
}

impl ContractLog {
	pub fn decode(events: &[Event], log: Log) -> ContractLog {
		for event in events {
			if !log.topics.is_empty() && event.signature() == log.topics[0] {
				if let Ok(params) = decode_params(event, &log) {
					return ContractLog {
						raw: log,
						event: Some(event.name.clone()),
						params: Some(params),
					}
				}
				break
			}
		}
		ContractLog { raw: log, event: None, params: None }
	}
}

/// Indexed parameters decode from `topics[1..]`, non-indexed ones from the
/// data payload, both in ABI declaration order.
fn decode_params(event: &Event, log: &Log) -> Result<HashMap<String, Token>, ethabi::Error> {
	let indexed: Vec<&EventParam> =
		event.inputs.iter().filter(|input| input.indexed).collect();
	let non_indexed: Vec<&EventParam> =
		event.inputs.iter().filter(|input| !input.indexed).collect();

	let mut params = HashMap::new();

	for (topic, input) in log.topics[1..].iter().zip(indexed) {
		let decoded = ethabi::decode(&[input.kind.clone()], topic.as_bytes())?;
		if let Some(token) = decoded.into_iter().next() {
			params.insert(input.name.clone(), token);
		}
	}

	if !non_indexed.is_empty() {
		let kinds: Vec<ParamType> =
			non_indexed.iter().map(|input| input.kind.clone()).collect();
		let tokens = ethabi::decode(&kinds, &log.data.0)?;
		for (input, token) in non_indexed.into_iter().zip(tokens) {
			params.insert(input.name.clone(), token);
		}
	}

	Ok(params)
}
