//! Background learning subsystem
//!
//! Hot-path matches become `LearningTask`s in bounded per-tier rings; a
//! single worker thread turns them into EWMA weight updates. The weight
//! table is single-writer/many-reader: the worker is the only writer, the
//! scanner reads lock-free on every match.

pub mod persist;
pub mod queue;
pub mod weights;
pub mod worker;

pub use queue::{LearningTask, TaskRings, WeightAdjust};
pub use weights::WeightTable;
pub use worker::Learner;
