pub mod context;
pub mod invoker;
pub mod media;

pub use invoker::CallOutcome;
