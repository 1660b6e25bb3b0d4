//! Generation progress: stage machine, percentage rules, and sub-phase bands.

mod bands;
mod machine;
mod state;

pub use bands::{Band, BandSpec, GenerationBands};
pub(crate) use bands::default_band_specs;
pub use machine::ProgressStateMachine;
pub use state::{ProgressState, Stage};
