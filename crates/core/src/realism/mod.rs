//! Output humanization: typos and typing latency.

pub mod typing;
pub mod typo;
