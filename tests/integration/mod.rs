//! Integration tests for flowrelay's session authority and event routing

mod dispatcher;
mod orchestrator_runs;
mod progress_flow;
