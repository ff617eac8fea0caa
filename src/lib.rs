pub mod api;
pub mod app;
pub mod conversation;
pub mod directory;
pub mod error;
pub mod model;
pub mod storage;
pub mod ui;
pub mod utils;

#[cfg(test)]
mod testing;
