use std::any::Any;

use indexmap::IndexMap;

use crate::core::error::WorkflowError;
use crate::core::subsystem::SubSystem;
use crate::core::value::{Interface, PortMeta, Value, ValueMap};
use crate::core::version::VersionId;

/// A helper trait that just provides the `as_any` methods.
///
/// Needed for convenient downcasting of concrete models out of a boxed
/// [`NodeModel`].
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The contract an external model fulfils to participate in a workflow.
///
/// A model declares its ports once and computes outputs from inputs with no
/// other side channel. The engine owns memoization and input gathering; the
/// model only sees fully resolved input values.
pub trait NodeModel: AsAny + Send + 'static {
    /// Declare the node's input and output ports.
    ///
    /// Called once, lazily, on first interface access; the result is cached.
    fn declare_ports(&self) -> Interface;

    /// Compute output values from the gathered inputs.
    ///
    /// Must fill every declared output into `outputs`. The default body is
    /// the abstract-base behavior: it fails with
    /// [`WorkflowError::NotImplemented`].
    fn compute(&mut self, inputs: &ValueMap, outputs: &mut ValueMap) -> Result<(), WorkflowError> {
        let _ = (inputs, outputs);
        Err(WorkflowError::NotImplemented {
            node: String::new(),
        })
    }
}

/// A source node with no inputs and one fixed-name, externally settable
/// output.
///
/// Setting its data marks the owning version counter dirty, which is what
/// drives downstream cache invalidation.
#[derive(Debug, Clone)]
pub struct IndependentVariable {
    pub(crate) output: String,
    pub(crate) meta: PortMeta,
    pub(crate) data: Value,
}

impl IndependentVariable {
    pub fn new(output: impl Into<String>, meta: PortMeta) -> Self {
        let data = meta.resolved_default();
        IndependentVariable {
            output: output.into(),
            meta,
            data,
        }
    }

    /// Creates the variable pre-seeded with a value other than the default.
    pub fn with_data(output: impl Into<String>, meta: PortMeta, data: Value) -> Self {
        IndependentVariable {
            output: output.into(),
            meta,
            data,
        }
    }

    pub fn output_name(&self) -> &str {
        &self.output
    }

    pub fn data(&self) -> &Value {
        &self.data
    }
}

/// The closed set of things a node slot can be.
pub(crate) enum Behaviour {
    /// An external model behind the [`NodeModel`] contract.
    Model(Box<dyn NodeModel>),
    /// An externally driven source.
    Independent(IndependentVariable),
    /// An aggregate over an internal node set.
    System(SubSystem),
}

/// Handle to a node in a workflow arena.
///
/// Nodes are reference values with positional identity: two handles are the
/// same node exactly when their indices agree. Handles order and hash by
/// creation ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(pub(crate) usize);

impl NodeHandle {
    /// The creation ordinal backing this handle.
    pub fn index(self) -> usize {
        self.0
    }
}

/// One arena slot: a node's identity, wiring, and memoization state.
pub(crate) struct NodeData {
    pub(crate) name: String,
    pub(crate) behaviour: Behaviour,
    /// Built on first access, then cached.
    pub(crate) interface: Option<Interface>,
    /// `source -> { source output -> [local inputs] }`.
    pub(crate) connections: IndexMap<NodeHandle, IndexMap<String, Vec<String>>>,
    /// Inverse index: `local input -> (source, source output)`. Guarantees
    /// each input has at most one active source.
    pub(crate) owner: IndexMap<String, (NodeHandle, String)>,
    /// Version stamp of the last whole-node computation.
    pub(crate) last_seen: Option<u64>,
    /// Per-output version stamps for named requests.
    pub(crate) seen_by_output: IndexMap<String, u64>,
    /// Last computed output values.
    pub(crate) cache: ValueMap,
    /// The counter gating this node's recomputation.
    pub(crate) version: VersionId,
}

impl NodeData {
    pub(crate) fn new(name: String, behaviour: Behaviour, version: VersionId) -> Self {
        NodeData {
            name,
            behaviour,
            interface: None,
            connections: IndexMap::new(),
            owner: IndexMap::new(),
            last_seen: None,
            seen_by_output: IndexMap::new(),
            cache: ValueMap::new(),
            version,
        }
    }

    /// Checks that `connections` and `owner` agree: every owned input appears
    /// exactly once among the destination lists, and every destination is
    /// owned by the edge that carries it.
    pub(crate) fn check_consistency(&self) -> Result<(), WorkflowError> {
        for (input, (src, output)) in &self.owner {
            let hits = self
                .connections
                .get(src)
                .and_then(|m| m.get(output))
                .map(|dests| dests.iter().filter(|d| *d == input).count())
                .unwrap_or(0);
            if hits != 1 {
                return Err(WorkflowError::CorruptedConnectionState {
                    node: self.name.clone(),
                    detail: format!(
                        "input '{input}' owned by '{output}' appears {hits} times in its destination list"
                    ),
                });
            }
        }
        for (src, map) in &self.connections {
            for (output, dests) in map {
                for dest in dests {
                    match self.owner.get(dest) {
                        Some((s, o)) if s == src && o == output => {}
                        _ => {
                            return Err(WorkflowError::CorruptedConnectionState {
                                node: self.name.clone(),
                                detail: format!(
                                    "destination '{dest}' of '{output}' has no matching owner entry"
                                ),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
