//! Turn-structured transcript built from streamed text deltas
//!
//! Consecutive deltas from the same speaker coalesce into one growing turn;
//! a change of speaker always starts a new turn.

mod aggregator;

pub use aggregator::{Speaker, TranscriptAggregator, Turn};
