//! Engine core for attune: a group-chat member that decides when to
//! speak, remembers who it talks to, and keeps its history safe.
//!
//! Messages flow in through [`io::input`], run through the
//! [`runtime`] pipeline (lexical screen, probability gate, model
//! decision, reply generation, cache promotion), and replies flow out
//! through [`io::output`]. Per-user warmth lives in [`attention`],
//! short-term history in [`cache`], and the durable logs in [`store`].

pub mod attention;
pub mod cache;
pub mod cognition;
pub mod config;
pub mod gate;
pub mod io;
pub mod realism;
pub mod runtime;
pub mod store;
pub mod types;
