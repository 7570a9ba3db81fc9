//! stayd library - presence sampling and daily stay-time reporting.

pub mod aggregate;
pub mod config;
pub mod detect;
pub mod error;
pub mod notify;
pub mod observation;
pub mod sampler;
pub mod schedule;
pub mod store;

pub use aggregate::{AggregationWindow, StayDuration};
pub use error::StayError;
pub use observation::Observation;
pub use sampler::{Collaborators, Sampler, TickOutcome};
pub use schedule::DailySchedule;
pub use store::{JsonFileStore, SampleStore};
