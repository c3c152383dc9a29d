pub mod auth;
pub mod download;
pub mod error;
pub mod router;
pub mod search;
pub mod ui;
