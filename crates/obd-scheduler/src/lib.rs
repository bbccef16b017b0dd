//! Scheduling for ELM327 Sessions
//!
//! An adapter handles one request at a time. [`TransactionGate`] owns the
//! client and admits a single job at once, [`AcquisitionLoop`] polls live
//! data through that gate while switched on, and [`jobs`] holds the batch
//! reads a front end triggers (frame data, freeze frames, vehicle info and
//! trouble codes).

mod acquisition;
mod error;
mod gate;
pub mod jobs;

pub use acquisition::{AcquisitionConfig, AcquisitionHandle, AcquisitionLoop};
pub use error::SchedulerError;
pub use gate::TransactionGate;
pub use jobs::{FreezeFrame, PidSample, TroubleInfo};
