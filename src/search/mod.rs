pub mod download;
pub mod pipeline;
