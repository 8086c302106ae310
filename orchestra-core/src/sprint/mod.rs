//! Sprint planning: dependency waves refined by file contention.

pub mod conflict;
pub mod wave_planner;

pub use wave_planner::{split_by_file_contention, SubWave};
