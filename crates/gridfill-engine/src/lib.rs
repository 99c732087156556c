//! gridfill_engine - Template commands, expressions and grid transformation.

pub(crate) mod builtins;
pub mod engine;
