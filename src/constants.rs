use std::time::Duration;

pub const JSONRPC_VERSION: &str = "2.0";

/// Registration RPC for node-side push subscriptions.
pub const SUBSCRIBE_METHOD: &str = "parity_subscribe";
/// Notification method carried by push frames.
pub const SUBSCRIPTION_NOTIFICATION: &str = "parity_subscription";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(25);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub const REQUEST_CACHE_CAPACITY: usize = 10_000;

pub const RECEIPT_MAX_BLOCK_ATTEMPTS: u32 = 60;
pub const RECEIPT_MAX_TRANSPORT_ERRORS: u32 = 10;

pub const DEFAULT_NUMBER_OF_BLOCK_CONFIRMATIONS: u64 = 12;
pub const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(600);
