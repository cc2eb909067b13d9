pub mod error;
pub mod platform;
pub mod protocol;
pub mod range;
pub mod registry;
pub mod sim;
pub mod storage;
pub mod trace;

#[cfg(test)]
mod test;
