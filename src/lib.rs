pub mod btc;
pub mod logging;
pub mod swap;
