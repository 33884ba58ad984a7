//! Background workers.

pub mod projection_worker;

pub use projection_worker::{
    CycleReport, ProjectionWorker, Projector, ProjectorError, WorkerHandle,
};
