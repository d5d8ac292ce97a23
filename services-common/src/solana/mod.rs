pub mod any_tx;
pub mod endpoint;
pub mod pool;
