mod cache;
mod transport;

use serde_json::{
	json,
	Value,
};
use slog::{
	o,
	Discard,
	Logger,
};

pub fn logger() -> Logger {
	Logger::root(Discard, o!())
}

pub fn head_json(number: u64) -> Value {
	json!({
		"number": format!("{:#x}", number),
		"hash": format!("0x{:064x}", number),
		"parentHash": format!("0x{:064x}", number.saturating_sub(1)),
		"timestamp": "0x0",
	})
}
