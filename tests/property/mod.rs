//! Property-based tests for ordering and progress guarantees

mod progress;
