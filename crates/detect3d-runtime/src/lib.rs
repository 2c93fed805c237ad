//! `detect3d-runtime` – the fusion node and everything needed to run it.
//!
//! # Modules
//!
//! - [`fusion_node`] – [`FusionNode`][fusion_node::FusionNode]: calibration
//!   gate, back-projection and output gate around a matched pair, plus the
//!   [`DetectionSink`][fusion_node::DetectionSink] seam it publishes through.
//! - [`fusion_loop`] – [`FusionLoop`][fusion_loop::FusionLoop]: feeds bus
//!   events to a node until shutdown.
//! - [`config`] – [`FusionConfig`][config::FusionConfig], loaded from
//!   `~/.detect3d/config.toml` with `DETECT3D_*` overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console or
//!   JSON logs and optional OTLP span export.

pub mod config;
pub mod fusion_loop;
pub mod fusion_node;
pub mod telemetry;

pub use config::FusionConfig;
pub use fusion_loop::FusionLoop;
pub use fusion_node::{BusSink, CycleOutcome, DetectionSink, FusionNode, FusionStats, NodeState};
pub use telemetry::{TracerProviderGuard, init_tracing};
