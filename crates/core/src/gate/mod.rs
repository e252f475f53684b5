mod frequency;
mod lexical;
mod probability;

pub use frequency::{FrequencyState, FrequencyVerdict, TOO_FREQUENT_FACTOR, TOO_SPARSE_FACTOR};
pub use lexical::screen;
pub use probability::{GateDecision, Trigger, evaluate, find_trigger};
