//! voxflow-pipeline: the turn-processing core.
//!
//! Takes an assembled prompt from the gateway, streams a generated reply,
//! cuts it into sentences, synthesizes speech per sentence, and emits
//! response units in strict order. Cooperative interrupts can unwind a
//! turn at any stage boundary.

pub mod assembler;
pub mod commands;
pub mod extract;
pub mod interrupt;
pub mod orchestrator;
pub mod sentence;
