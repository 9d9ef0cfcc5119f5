//! The flash-sale pipeline.
//!
//! - [`admission`]: request-time path from stock ledger to durable queue
//! - [`compensator`]: undo a taken seat when the intent cannot be queued
//! - [`materializer`]: queue consumers that persist orders exactly once
//! - [`catalog`]: cached product rows for open sales

pub mod admission;
pub mod catalog;
pub mod compensator;
pub mod materializer;

pub use admission::{Admitted, MissingComponent, SaleOpened, SeckillPipeline, SeckillPipelineBuilder};
pub use catalog::SaleCatalog;
pub use compensator::{CompensationReport, Compensator};
pub use materializer::{Handled, MaterializerPool, OrderMaterializer};
