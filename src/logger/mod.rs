//! Append-only JSONL journal of reduction runs.

pub mod journal;
