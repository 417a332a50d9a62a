use indexmap::{IndexMap, IndexSet};

use crate::core::error::WorkflowError;
use crate::core::node::NodeHandle;
use crate::core::workflow::Workflow;

impl Workflow {
    /// Transitive closure of everything `handle` reads from, including
    /// itself.
    pub(crate) fn dependency_set(&self, handle: NodeHandle) -> IndexSet<NodeHandle> {
        let mut closure = IndexSet::new();
        let mut stack = vec![handle];
        while let Some(current) = stack.pop() {
            if closure.insert(current) {
                stack.extend(self.nodes[current.0].connections.keys().copied());
            }
        }
        closure
    }

    /// Transitive closure of everything reading from `handle` (its
    /// downstream consumers), including itself, restricted to `within`.
    pub(crate) fn source_set(
        &self,
        handle: NodeHandle,
        within: &IndexSet<NodeHandle>,
    ) -> IndexSet<NodeHandle> {
        let mut closure = IndexSet::new();
        let mut stack = vec![handle];
        while let Some(current) = stack.pop() {
            if closure.insert(current) {
                for &candidate in within {
                    if self.nodes[candidate.0].connections.contains_key(&current) {
                        stack.push(candidate);
                    }
                }
            }
        }
        closure
    }

    /// Resequences `nodes` so every node appears after everything its
    /// subgraph depends on, ties broken by iteration order of the remaining
    /// candidates.
    ///
    /// Peeling test: a node is ready when its dependency closure intersected
    /// with the working set is just the node itself. Quadratic in the worst
    /// case, which is fine for workflows in the hundreds of nodes.
    pub fn execution_order(
        &self,
        nodes: &[NodeHandle],
    ) -> Result<Vec<NodeHandle>, WorkflowError> {
        let deps: IndexMap<NodeHandle, IndexSet<NodeHandle>> = nodes
            .iter()
            .map(|&n| (n, self.dependency_set(n)))
            .collect();
        let mut working: IndexSet<NodeHandle> = nodes.iter().copied().collect();
        let mut order = Vec::with_capacity(working.len());

        while !working.is_empty() {
            let ready = working.iter().copied().find(|n| {
                deps[n].iter().filter(|d| working.contains(*d)).count() == 1
            });
            match ready {
                Some(n) => {
                    order.push(n);
                    working.shift_remove(&n);
                }
                None => {
                    return Err(WorkflowError::CircularDependency {
                        remaining: working
                            .iter()
                            .map(|n| self.nodes[n.0].name.clone())
                            .collect(),
                    });
                }
            }
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connect::{Alias, ConnectSpec};
    use crate::core::error::WorkflowError;
    use crate::core::node::NodeModel;
    use crate::core::value::{Interface, PortMeta, Value, ValueMap};

    struct Relay {
        input: &'static str,
        output: &'static str,
    }

    impl NodeModel for Relay {
        fn declare_ports(&self) -> Interface {
            Interface::new()
                .input(self.input, PortMeta::scalar(0.0))
                .output(self.output, PortMeta::scalar(0.0))
        }

        fn compute(
            &mut self,
            inputs: &ValueMap,
            outputs: &mut ValueMap,
        ) -> Result<(), WorkflowError> {
            outputs.insert(
                self.output.to_string(),
                inputs.get(self.input).cloned().unwrap_or_default(),
            );
            Ok(())
        }
    }

    fn relay(wf: &mut Workflow, name: &str, input: &'static str, output: &'static str) -> NodeHandle {
        wf.add_node(name, Relay { input, output })
    }

    #[test]
    fn chain_orders_upstream_first() {
        let mut wf = Workflow::new();
        let a = relay(&mut wf, "a", "in", "x");
        let b = relay(&mut wf, "b", "x", "y");
        let c = relay(&mut wf, "c", "y", "z");
        wf.connect_auto(b, a).unwrap();
        wf.connect_auto(c, b).unwrap();

        let order = wf.execution_order(&[c, b, a]).unwrap();
        assert_eq!(order, vec![a, b, c]);
    }

    struct Join;

    impl NodeModel for Join {
        fn declare_ports(&self) -> Interface {
            Interface::new()
                .input("l", PortMeta::scalar(0.0))
                .input("r", PortMeta::scalar(0.0))
                .output("out", PortMeta::scalar(0.0))
        }

        fn compute(
            &mut self,
            inputs: &ValueMap,
            outputs: &mut ValueMap,
        ) -> Result<(), WorkflowError> {
            let l = inputs.get("l").and_then(Value::scalar).unwrap_or(0.0);
            let r = inputs.get("r").and_then(Value::scalar).unwrap_or(0.0);
            outputs.insert("out".into(), Value::Scalar(l + r));
            Ok(())
        }
    }

    #[test]
    fn diamond_respects_every_edge() {
        let mut wf = Workflow::new();
        let src = relay(&mut wf, "src", "in", "x");
        let left = relay(&mut wf, "left", "x", "l");
        let right = relay(&mut wf, "right", "x", "r");
        let join = wf.add_node("join", Join);
        wf.connect_auto(left, src).unwrap();
        wf.connect_auto(right, src).unwrap();
        wf.connect_auto(join, left).unwrap();
        wf.connect(join, right, ConnectSpec::map([("r", "r")]), &Alias::new())
            .unwrap();

        let order = wf.execution_order(&[join, right, left, src]).unwrap();
        let pos = |h: NodeHandle| order.iter().position(|&o| o == h).unwrap();
        assert!(pos(src) < pos(left));
        assert!(pos(src) < pos(right));
        assert!(pos(left) < pos(join));
        assert!(pos(right) < pos(join));
    }

    #[test]
    fn cycle_is_detected() {
        let mut wf = Workflow::new();
        let a = relay(&mut wf, "a", "y", "x");
        let b = relay(&mut wf, "b", "x", "y");
        wf.connect_auto(b, a).unwrap();
        wf.connect_auto(a, b).unwrap();

        let err = wf.execution_order(&[a, b]).unwrap_err();
        match err {
            WorkflowError::CircularDependency { remaining } => {
                assert_eq!(remaining.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn nodes_outside_the_working_set_do_not_block() {
        let mut wf = Workflow::new();
        let a = relay(&mut wf, "a", "in", "x");
        let b = relay(&mut wf, "b", "x", "y");
        wf.connect_auto(b, a).unwrap();
        // Ordering only b must not wait for a.
        assert_eq!(wf.execution_order(&[b]).unwrap(), vec![b]);
    }
}
