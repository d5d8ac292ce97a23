pub mod batch;
pub mod dispatch;
pub mod instructions;
pub mod keystore;
pub mod pipeline;
pub mod seal;

#[cfg(test)]
pub mod testing;
