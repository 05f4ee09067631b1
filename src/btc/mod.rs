pub mod contract;
pub mod keys;
pub mod rpc;
