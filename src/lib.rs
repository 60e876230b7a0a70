pub mod codec;
pub mod connector;
pub mod constants;
pub mod contract;
pub mod keys;
pub mod transaction;
pub mod transport;
pub mod types;

#[cfg(test)]
mod tests;
