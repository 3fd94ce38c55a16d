//! JumpChat conversation core: session engine, storage, completion sources
//! and the pieces they share.

pub mod ai;
pub mod config;
pub mod history;
pub mod reachability;
pub mod session;
pub mod store;
pub mod title;
pub mod types;
