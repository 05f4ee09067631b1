pub mod bitcoind;
pub mod mock_rpc;
pub mod port;
