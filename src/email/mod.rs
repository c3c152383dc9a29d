pub mod extractor;
pub mod filename;
pub mod gmail;
pub mod message;
pub mod provider;

#[cfg(test)]
pub(crate) mod mock;
