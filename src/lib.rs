//! # Conflux
//!
//! A lazily-evaluated dataflow workflow engine: independent computational
//! nodes declare named ports, get wired together by name-mapped connections,
//! and are evaluated lazily and memoized against shared version counters.
//! A partitioner decomposes a graph into self-contained sub-systems for
//! distributed execution, and a pull-based dispatcher spreads opaque jobs
//! over a fixed worker pool.
//!
//! ## Features
//!
//! - **Lazy, memoized evaluation**: a node computes at most once per version
//!   tick, however many consumers ask for it
//! - **Flexible wiring**: by-name auto-matching, source/destination lists,
//!   explicit maps, positional pairing, aliases
//! - **Topological solving & partitioning**: execution-order resolution with
//!   cycle detection, and graph splitting with boundary-variable stand-ins
//! - **Master/worker job distribution**: a ready/assign/done/exit pull
//!   protocol over channels, with direct assignment when the pool is large
//!
//! ## Quick Start
//!
//! ```rust
//! use conflux::prelude::*;
//!
//! struct Doubler;
//!
//! impl NodeModel for Doubler {
//!     fn declare_ports(&self) -> Interface {
//!         Interface::new()
//!             .input("x", PortMeta::scalar(0.0))
//!             .output("y", PortMeta::scalar(0.0))
//!     }
//!
//!     fn compute(&mut self, inputs: &ValueMap, outputs: &mut ValueMap) -> Result<(), WorkflowError> {
//!         let x = inputs.get("x").and_then(Value::scalar).unwrap_or(0.0);
//!         outputs.insert("y".into(), Value::Scalar(2.0 * x));
//!         Ok(())
//!     }
//! }
//!
//! let mut wf = Workflow::new();
//! let x = wf.add_independent("x", "x", PortMeta::scalar(21.0));
//! let node = wf.add_node("doubler", Doubler);
//! wf.connect_auto(node, x).unwrap();
//! assert_eq!(wf.get_output(node).unwrap()["y"], Value::Scalar(42.0));
//! ```
//!
//! ## Module Organization
//!
//! - The core types are re-exported at the crate root: [`Workflow`],
//!   [`NodeModel`], [`ConnectSpec`], partitioning and tracing
//! - [`dispatch`]: the master/worker job dispatcher
//! - [`prelude`]: the workflow-building surface in one import

mod core;

pub mod dispatch;

// Core types
pub use core::audit::{ValidationIssue, ValidationResult};
pub use core::connect::{Alias, ConnectSpec};
pub use core::error::WorkflowError;
pub use core::node::{AsAny, IndependentVariable, NodeHandle, NodeModel};
pub use core::partition::{SplitConfiguration, SplitGroup, SplitWorkflow, SystemLink};
pub use core::subsystem::SubSystem;
pub use core::trace::{MemoryTrace, TraceEntry, TraceSink};
pub use core::value::{Interface, PortMeta, Value, ValueMap};
pub use core::version::StateVersion;
pub use core::workflow::Workflow;

/// The main prelude: everything needed to declare models, build a workflow,
/// and split or dispatch it.
///
/// # Example
/// ```rust
/// use conflux::prelude::*;
/// ```
pub mod prelude {
    pub use super::dispatch::{Dispatcher, Job, JobBatch, JobList};
    pub use super::{
        Alias,
        ConnectSpec,
        Interface,
        MemoryTrace,
        NodeHandle,
        // Core
        NodeModel,
        PortMeta,
        TraceSink,
        Value,
        ValueMap,
        Workflow,
        WorkflowError,
    };
}

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of this crate.
pub const NAME: &str = env!("CARGO_PKG_NAME");
