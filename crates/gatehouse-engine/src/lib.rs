//! Runtime of the gatehouse gateway.
//!
//! This crate turns decoded reader frames into admission decisions and keeps
//! everything downstream of a decision moving: relay pulses, evidence
//! capture and upload, the durable transaction pipeline, credential sync and
//! disk housekeeping.
//!
//! # Flow
//!
//! ```text
//! ReaderManager ──frames──> DecisionEngine ──┬──> RelayActuator (pulse)
//!                                            ├──> CaptureDispatcher ──> CapturePool ──> UploadQueue
//!                                            ├──> DailyStats / RecentTransactions
//!                                            └──> TransactionSender ──> TransactionPipeline
//!
//! SyncWorker (timer): control document, change feed, cache drain, evidence re-queue
//! Eviction / StatsKeeper (timers): disk pressure, counter persistence
//! ```
//!
//! The decision path never awaits; every hand-off out of it is a
//! non-blocking send or a spawned task.
//!
//! # Entry points
//!
//! - [`Gateway::start`] wires everything from a [`GatewayConfig`] and a set
//!   of [`GatewayParts`]
//! - [`Gateway::admin`] returns the [`AdminService`]
//! - [`Gateway::status`] reports a [`GatewayStatus`]

pub mod admin;
pub mod capture;
pub mod config;
pub mod decision;
pub mod gateway;
pub mod maintenance;
pub mod pipeline;
pub mod rate_limiter;
pub mod recent;
pub mod relay;
pub mod status;
pub mod supervisor;
pub mod sync;
pub mod upload;

pub use admin::{AdminResponse, AdminService, ResponseStatus};
pub use capture::{AnyFrameGrabber, CaptureDispatcher, CapturePool, CommandGrabber, FrameGrabber, MockGrabber};
pub use crate::config::GatewayConfig;
pub use decision::{Decision, DecisionEngine, Rejection};
pub use gateway::{Gateway, GatewayParts};
pub use pipeline::{Delivery, SyncReport, TransactionPipeline, TransactionSender, transaction_channel};
pub use rate_limiter::ScanRateLimiter;
pub use recent::RecentTransactions;
pub use relay::{RelayActuator, RelayStatus};
pub use status::{GatewayStatus, ReaderState};
pub use sync::{SyncWorker, TickReport};
pub use upload::{UploadOutcome, UploadQueue};
