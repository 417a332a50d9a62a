use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::core::audit::ValidationResult;
use crate::core::error::WorkflowError;
use crate::core::node::{Behaviour, IndependentVariable, NodeData, NodeHandle, NodeModel};
use crate::core::trace::{TraceEntry, TraceSink};
use crate::core::value::{Interface, PortMeta, Value, ValueMap};
use crate::core::version::{StateVersion, VersionId};

/// The arena owning every node of a dataflow graph, the version counters
/// gating their recomputation, and the evaluation machinery.
///
/// Nodes are created once during construction and live for the lifetime of
/// the workflow; they are referenced by copyable [`NodeHandle`]s.
pub struct Workflow {
    pub(crate) nodes: Vec<NodeData>,
    pub(crate) versions: Vec<StateVersion>,
    trace: Option<Arc<dyn TraceSink>>,
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new()
    }
}

impl Workflow {
    pub fn new() -> Self {
        Workflow {
            nodes: Vec::new(),
            // Counter 0 is the workflow's own; sub-systems carve out more.
            versions: vec![StateVersion::new()],
            trace: None,
        }
    }

    /// Installs a sink receiving a record for every recomputation.
    pub fn set_trace_sink(&mut self, sink: Arc<dyn TraceSink>) {
        self.trace = Some(sink);
    }

    /// Adds a node backed by an external model.
    pub fn add_node(&mut self, name: impl Into<String>, model: impl NodeModel) -> NodeHandle {
        self.add_node_data(name.into(), Behaviour::Model(Box::new(model)), VersionId::ROOT)
    }

    /// Adds an independent variable with one output of the given metadata.
    pub fn add_independent(
        &mut self,
        name: impl Into<String>,
        output: impl Into<String>,
        meta: PortMeta,
    ) -> NodeHandle {
        self.add_node_data(
            name.into(),
            Behaviour::Independent(IndependentVariable::new(output, meta)),
            VersionId::ROOT,
        )
    }

    pub(crate) fn add_node_data(
        &mut self,
        name: String,
        behaviour: Behaviour,
        version: VersionId,
    ) -> NodeHandle {
        let handle = NodeHandle(self.nodes.len());
        self.nodes.push(NodeData::new(name, behaviour, version));
        handle
    }

    pub(crate) fn new_version(&mut self) -> VersionId {
        let id = VersionId(self.versions.len());
        self.versions.push(StateVersion::new());
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All handles in creation order.
    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> + use<> {
        (0..self.nodes.len()).map(NodeHandle)
    }

    pub fn node_name(&self, handle: NodeHandle) -> &str {
        &self.nodes[handle.0].name
    }

    /// Whether the node is an independent variable (original or stand-in).
    pub fn is_independent(&self, handle: NodeHandle) -> bool {
        matches!(self.nodes[handle.0].behaviour, Behaviour::Independent(_))
    }

    /// The fixed output name of an independent variable.
    pub fn independent_output(&self, handle: NodeHandle) -> Option<&str> {
        match &self.nodes[handle.0].behaviour {
            Behaviour::Independent(iv) => Some(iv.output_name()),
            _ => None,
        }
    }

    /// The node's declared interface, built lazily on first access.
    pub fn interface(&mut self, handle: NodeHandle) -> &Interface {
        self.ensure_interface(handle);
        match self.nodes[handle.0].interface {
            Some(ref iface) => iface,
            None => unreachable!("ensure_interface populates the cache"),
        }
    }

    pub(crate) fn ensure_interface(&mut self, handle: NodeHandle) {
        if self.nodes[handle.0].interface.is_some() {
            return;
        }
        let built = match &self.nodes[handle.0].behaviour {
            Behaviour::Model(model) => Some(model.declare_ports()),
            Behaviour::Independent(iv) => {
                Some(Interface::new().output(iv.output.clone(), iv.meta.clone()))
            }
            Behaviour::System(_) => None,
        };
        let iface = match built {
            Some(iface) => iface,
            None => self.build_system_interface(handle),
        };
        self.nodes[handle.0].interface = Some(iface);
    }

    /// A sub-system's interface merges its members' exported ports; the
    /// members' own interfaces have to exist first.
    fn build_system_interface(&mut self, handle: NodeHandle) -> Interface {
        let (inputs, outputs) = match &self.nodes[handle.0].behaviour {
            Behaviour::System(sys) => (
                sys.input_map
                    .iter()
                    .map(|(global, (member, local))| (global.clone(), *member, local.clone()))
                    .collect::<Vec<_>>(),
                sys.output_map
                    .iter()
                    .map(|(global, (member, local))| (global.clone(), *member, local.clone()))
                    .collect::<Vec<_>>(),
            ),
            _ => (Vec::new(), Vec::new()),
        };
        let mut iface = Interface::new();
        for (global, member, local) in inputs {
            self.ensure_interface(member);
            let meta = self.output_meta(member, &local);
            iface.input.insert(global, meta);
        }
        for (global, member, local) in outputs {
            self.ensure_interface(member);
            let meta = self.output_meta(member, &local);
            iface.output.insert(global, meta);
        }
        iface
    }

    fn output_meta(&self, handle: NodeHandle, output: &str) -> PortMeta {
        self.nodes[handle.0]
            .interface
            .as_ref()
            .and_then(|iface| iface.output.get(output))
            .cloned()
            .unwrap_or_default()
    }

    /// Overwrites an independent variable's data and marks its version
    /// counter dirty, invalidating every cache gated by that counter.
    pub fn set_data(&mut self, handle: NodeHandle, value: Value) -> Result<(), WorkflowError> {
        let vid = self.nodes[handle.0].version;
        match &mut self.nodes[handle.0].behaviour {
            Behaviour::Independent(iv) => iv.data = value,
            _ => {
                return Err(WorkflowError::NotIndependent {
                    node: self.nodes[handle.0].name.clone(),
                });
            }
        }
        self.versions[vid.0].mark_dirty();
        Ok(())
    }

    /// Returns every declared output of the node, recomputing only when the
    /// node's version counter moved since the last computation.
    pub fn get_output(&mut self, handle: NodeHandle) -> Result<ValueMap, WorkflowError> {
        self.eval(handle, None)
    }

    /// Returns the named outputs, gated per output name so already-fresh
    /// values never trigger a recompute.
    pub fn get_output_named(
        &mut self,
        handle: NodeHandle,
        names: &[&str],
    ) -> Result<ValueMap, WorkflowError> {
        let owned: Vec<String> = names.iter().map(|n| (*n).to_string()).collect();
        self.eval(handle, Some(&owned))
    }

    pub(crate) fn eval(
        &mut self,
        handle: NodeHandle,
        requested: Option<&[String]>,
    ) -> Result<ValueMap, WorkflowError> {
        self.nodes[handle.0].check_consistency()?;
        self.ensure_interface(handle);

        if let Some(names) = requested {
            for name in names {
                let known = self.nodes[handle.0]
                    .interface
                    .as_ref()
                    .is_some_and(|iface| iface.output.contains_key(name));
                if !known {
                    return Err(WorkflowError::UnknownVariable {
                        node: self.nodes[handle.0].name.clone(),
                        name: name.clone(),
                    });
                }
            }
        }

        let vid = self.nodes[handle.0].version;
        let current = self.versions[vid.0].read();
        let fresh = {
            let node = &self.nodes[handle.0];
            let gated = match requested {
                None => node.last_seen == Some(current),
                Some(names) => names
                    .iter()
                    .all(|n| node.seen_by_output.get(n).copied() == Some(current)),
            };
            // A sub-system is also stale when its carved-out counter moved,
            // e.g. because a member stand-in was driven directly.
            gated
                && match &node.behaviour {
                    Behaviour::System(sys) => {
                        sys.internal_seen == Some(self.versions[sys.version.0].peek())
                    }
                    _ => true,
                }
        };
        if !fresh {
            self.recompute(handle, current)?;
        }

        let node = &self.nodes[handle.0];
        match requested {
            None => Ok(node.cache.clone()),
            Some(names) => {
                let mut out = ValueMap::new();
                for name in names {
                    match node.cache.get(name) {
                        Some(value) => {
                            out.insert(name.clone(), value.clone());
                        }
                        None => {
                            return Err(WorkflowError::MissingOutput {
                                node: node.name.clone(),
                                name: name.clone(),
                            });
                        }
                    }
                }
                Ok(out)
            }
        }
    }

    /// Builds the input vector: resolved defaults overlaid with every value
    /// scattered in from connected sources. Sources are evaluated by
    /// requesting exactly the mapped output names. Also reports which inputs
    /// were driven by a connection rather than left at their default.
    fn gather_inputs(
        &mut self,
        handle: NodeHandle,
    ) -> Result<(ValueMap, IndexSet<String>), WorkflowError> {
        let mut inputs = self.nodes[handle.0]
            .interface
            .as_ref()
            .map(Interface::input_defaults)
            .unwrap_or_default();
        let mut driven = IndexSet::new();

        let edges: Vec<(NodeHandle, Vec<(String, Vec<String>)>)> = self.nodes[handle.0]
            .connections
            .iter()
            .map(|(src, map)| {
                (
                    *src,
                    map.iter().map(|(o, d)| (o.clone(), d.clone())).collect(),
                )
            })
            .collect();

        for (src, pairs) in edges {
            let names: Vec<String> = pairs.iter().map(|(output, _)| output.clone()).collect();
            let values = self.eval(src, Some(&names))?;
            for (output, dests) in pairs {
                if let Some(value) = values.get(&output) {
                    for dest in dests {
                        inputs.insert(dest.clone(), value.clone());
                        driven.insert(dest);
                    }
                }
            }
        }
        Ok((inputs, driven))
    }

    fn recompute(&mut self, handle: NodeHandle, current: u64) -> Result<(), WorkflowError> {
        log::trace!(
            "recomputing '{}' at version {current}",
            self.nodes[handle.0].name
        );
        let (inputs, driven) = self.gather_inputs(handle)?;
        let mut outputs = self.nodes[handle.0].cache.clone();

        // A sub-system needs the arena back to drive its members, so its
        // evaluation plan is lifted out of the slot borrow first.
        struct SystemPlan {
            inputs: Vec<(String, NodeHandle)>,
            boundary: Vec<NodeHandle>,
            outputs: Vec<(String, NodeHandle, String)>,
            version: VersionId,
        }
        let name = self.nodes[handle.0].name.clone();
        let plan = {
            let node = &mut self.nodes[handle.0];
            match &mut node.behaviour {
                Behaviour::Model(model) => {
                    model.compute(&inputs, &mut outputs).map_err(|e| match e {
                        WorkflowError::NotImplemented { .. } => {
                            WorkflowError::NotImplemented { node: name.clone() }
                        }
                        other => other,
                    })?;
                    None
                }
                Behaviour::Independent(iv) => {
                    outputs.insert(iv.output.clone(), iv.data.clone());
                    None
                }
                Behaviour::System(sys) => Some(SystemPlan {
                    inputs: sys
                        .input_map
                        .iter()
                        .map(|(global, (member, _))| (global.clone(), *member))
                        .collect(),
                    boundary: sys.boundary.clone(),
                    outputs: sys
                        .output_map
                        .iter()
                        .map(|(global, (member, local))| (global.clone(), *member, local.clone()))
                        .collect(),
                    version: sys.version,
                }),
            }
        };

        if let Some(plan) = plan {
            // Scatter externally driven inputs onto the member stand-ins;
            // defaults stay whatever the stand-ins currently hold.
            for (global, member) in &plan.inputs {
                if driven.contains(global) {
                    if let Some(value) = inputs.get(global) {
                        self.set_data(*member, value.clone())?;
                    }
                }
            }
            let mut gathered: IndexMap<(NodeHandle, String), Value> = IndexMap::new();
            for member in &plan.boundary {
                for (local, value) in self.eval(*member, None)? {
                    gathered.insert((*member, local), value);
                }
            }
            for (global, member, local) in plan.outputs {
                if let Some(value) = gathered.get(&(member, local)) {
                    outputs.insert(global, value.clone());
                }
            }
            let internal = self.versions[plan.version.0].peek();
            if let Behaviour::System(sys) = &mut self.nodes[handle.0].behaviour {
                sys.internal_seen = Some(internal);
            }
        }

        let declared: Vec<String> = self.nodes[handle.0]
            .interface
            .as_ref()
            .map(|iface| iface.output.keys().cloned().collect())
            .unwrap_or_default();
        let node = &mut self.nodes[handle.0];
        let mut complete = true;
        for name in &declared {
            if outputs.contains_key(name) {
                node.seen_by_output.insert(name.clone(), current);
            } else {
                complete = false;
            }
        }
        if complete {
            node.last_seen = Some(current);
        }
        node.cache = outputs;

        if let Some(sink) = &self.trace {
            sink.record(TraceEntry {
                node: node.name.clone(),
                version: current,
                inputs,
                outputs: node.cache.clone(),
            });
        }
        Ok(())
    }

    /// Replaces the live edge from `src` into `dst` with freshly created
    /// independent-variable stand-ins, one per source output, each carrying
    /// the source output's port metadata and seeded from the source's
    /// current value. Returns `(source output, stand-in)` pairs; no live
    /// edge is a no-op.
    pub fn split_connection(
        &mut self,
        dst: NodeHandle,
        src: NodeHandle,
    ) -> Result<Vec<(String, NodeHandle)>, WorkflowError> {
        let Some(edge) = self.nodes[dst.0].connections.get(&src).cloned() else {
            log::debug!(
                "split_connection: no live edge from '{}' into '{}'",
                self.nodes[src.0].name,
                self.nodes[dst.0].name
            );
            return Ok(Vec::new());
        };
        self.ensure_interface(src);

        self.nodes[dst.0].connections.shift_remove(&src);
        for dests in edge.values() {
            for dest in dests {
                self.nodes[dst.0].owner.shift_remove(dest);
            }
        }

        let mut created = Vec::new();
        for (output, dests) in edge {
            let meta = self.output_meta(src, &output);
            let seed = self.nodes[src.0]
                .cache
                .get(&output)
                .cloned()
                .unwrap_or_else(|| meta.resolved_default());
            let name = format!("{}_{}", self.nodes[dst.0].name, output);
            let version = self.nodes[dst.0].version;
            let stand_in = self.add_node_data(
                name,
                Behaviour::Independent(IndependentVariable::with_data(
                    output.clone(),
                    meta,
                    seed,
                )),
                version,
            );
            for dest in &dests {
                self.nodes[dst.0]
                    .owner
                    .insert(dest.clone(), (stand_in, output.clone()));
            }
            self.nodes[dst.0]
                .connections
                .entry(stand_in)
                .or_default()
                .insert(output.clone(), dests);
            created.push((output, stand_in));
        }
        self.nodes[dst.0].check_consistency()?;
        Ok(created)
    }

    /// Non-fatal data-flow audit across the whole arena.
    ///
    /// Reports nodes declaring no outputs and inputs left at a zero default
    /// with no source; corrupted connection state surfaces as an error.
    pub fn audit(&mut self) -> ValidationResult {
        let mut result = ValidationResult::new();
        for handle in self.handles().collect::<Vec<_>>() {
            if let Err(err) = self.nodes[handle.0].check_consistency() {
                result.add_error(err.to_string());
                continue;
            }
            self.ensure_interface(handle);
            let node = &self.nodes[handle.0];
            let Some(iface) = node.interface.as_ref() else {
                continue;
            };
            if iface.output.is_empty() {
                result.add_warning(format!("node '{}' declares no outputs", node.name));
            }
            for (input, meta) in &iface.input {
                let unconnected = !node.owner.contains_key(input);
                if unconnected && meta.resolved_default() == Value::default() {
                    result.add_warning(format!(
                        "input '{}' of node '{}' has no source and a zero default",
                        input, node.name
                    ));
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Adds its two inputs; counts how many times compute ran.
    struct Adder {
        calls: Arc<AtomicUsize>,
    }

    impl NodeModel for Adder {
        fn declare_ports(&self) -> Interface {
            Interface::new()
                .input("a", PortMeta::scalar(0.0))
                .input("b", PortMeta::scalar(0.0))
                .output("sum", PortMeta::scalar(0.0))
        }

        fn compute(
            &mut self,
            inputs: &ValueMap,
            outputs: &mut ValueMap,
        ) -> Result<(), WorkflowError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let a = inputs.get("a").and_then(Value::scalar).unwrap_or(0.0);
            let b = inputs.get("b").and_then(Value::scalar).unwrap_or(0.0);
            outputs.insert("sum".into(), Value::Scalar(a + b));
            Ok(())
        }
    }

    struct Abstract;

    impl NodeModel for Abstract {
        fn declare_ports(&self) -> Interface {
            Interface::new().output("out", PortMeta::scalar(0.0))
        }
    }

    #[test]
    fn defaults_flow_through_unconnected_inputs() {
        let mut wf = Workflow::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let adder = wf.add_node("adder", Adder {
            calls: Arc::clone(&calls),
        });
        let out = wf.get_output(adder).unwrap();
        assert_eq!(out["sum"], Value::Scalar(0.0));
    }

    #[test]
    fn memoized_until_upstream_set_data() {
        use crate::core::connect::{Alias, ConnectSpec};

        let mut wf = Workflow::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let x = wf.add_independent("x", "x", PortMeta::scalar(2.0));
        let y = wf.add_independent("y", "y", PortMeta::scalar(3.0));
        let adder = wf.add_node("adder", Adder {
            calls: Arc::clone(&calls),
        });
        wf.connect(adder, x, ConnectSpec::map([("a", "x")]), &Alias::new())
            .unwrap();
        wf.connect(adder, y, ConnectSpec::map([("b", "y")]), &Alias::new())
            .unwrap();

        assert_eq!(wf.get_output(adder).unwrap()["sum"], Value::Scalar(5.0));
        assert_eq!(wf.get_output(adder).unwrap()["sum"], Value::Scalar(5.0));
        // Two reads, one compute: the second read hit the cache.
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        wf.set_data(x, Value::Scalar(10.0)).unwrap();
        assert_eq!(wf.get_output(adder).unwrap()["sum"], Value::Scalar(13.0));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn split_connection_replaces_edge_with_stand_in() {
        use crate::core::connect::{Alias, ConnectSpec};

        let mut wf = Workflow::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let x = wf.add_independent("x", "x", PortMeta::scalar(4.0));
        let adder = wf.add_node("adder", Adder {
            calls: Arc::clone(&calls),
        });
        wf.connect(adder, x, ConnectSpec::map([("a", "x")]), &Alias::new())
            .unwrap();
        assert_eq!(wf.get_output(adder).unwrap()["sum"], Value::Scalar(4.0));

        let stand_ins = wf.split_connection(adder, x).unwrap();
        assert_eq!(stand_ins.len(), 1);
        assert_eq!(stand_ins[0].0, "x");
        // The stand-in carried the source's current value, so nothing moved.
        assert_eq!(wf.get_output(adder).unwrap()["sum"], Value::Scalar(4.0));

        // The original source is detached: driving it no longer reaches the
        // adder, driving the stand-in does.
        wf.set_data(x, Value::Scalar(100.0)).unwrap();
        assert_eq!(wf.get_output(adder).unwrap()["sum"], Value::Scalar(4.0));
        wf.set_data(stand_ins[0].1, Value::Scalar(7.0)).unwrap();
        assert_eq!(wf.get_output(adder).unwrap()["sum"], Value::Scalar(7.0));
    }

    #[test]
    fn abstract_compute_fails_with_node_name() {
        let mut wf = Workflow::new();
        let node = wf.add_node("ghost", Abstract);
        let err = wf.get_output(node).unwrap_err();
        match err {
            WorkflowError::NotImplemented { node } => assert_eq!(node, "ghost"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn set_data_rejects_model_nodes() {
        let mut wf = Workflow::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let adder = wf.add_node("adder", Adder { calls });
        let err = wf.set_data(adder, Value::Scalar(1.0)).unwrap_err();
        assert!(matches!(err, WorkflowError::NotIndependent { .. }));
    }
}
