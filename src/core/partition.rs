use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::core::error::WorkflowError;
use crate::core::node::{Behaviour, IndependentVariable, NodeHandle};
use crate::core::subsystem::{SubSystem, merged_names};
use crate::core::value::Value;
use crate::core::version::VersionId;
use crate::core::workflow::Workflow;

/// One partition group: a split point plus the territory it owns.
#[derive(Debug, Clone)]
pub struct SplitGroup {
    pub split_point: NodeHandle,
    pub members: Vec<NodeHandle>,
    /// Members supplying output consumed outside the group (the split point
    /// always counts as one).
    pub boundary_outputs: Vec<NodeHandle>,
    /// Members consuming input supplied from outside the group.
    pub external_inputs: Vec<NodeHandle>,
}

/// The grouping produced by [`Workflow::split_configuration`].
#[derive(Debug, Clone)]
pub struct SplitConfiguration {
    /// The full transitive node set behind the split points.
    pub nodes: Vec<NodeHandle>,
    /// One group per split point, in the order the split points were given.
    pub groups: Vec<SplitGroup>,
}

/// One inter-sub-system connection, in the two systems' exported names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemLink {
    pub from_system: usize,
    pub from_output: String,
    pub to_system: usize,
    pub to_input: String,
}

/// The result of [`Workflow::split_workflow`]: one self-contained system per
/// group and the connection map a distributed driver replays between them.
pub struct SplitWorkflow {
    pub systems: Vec<NodeHandle>,
    pub links: Vec<SystemLink>,
}

impl Workflow {
    /// Orders split points so that every one precedes the split points it
    /// depends on: the peeling test of the execution-order solver, driven by
    /// downstream source sets instead of dependency sets.
    fn peel_split_points(
        &self,
        split_points: &[NodeHandle],
        all: &IndexSet<NodeHandle>,
    ) -> Result<Vec<NodeHandle>, WorkflowError> {
        let sp_set: IndexSet<NodeHandle> = split_points.iter().copied().collect();
        let sources: IndexMap<NodeHandle, IndexSet<NodeHandle>> = sp_set
            .iter()
            .map(|&sp| {
                let downstream = self.source_set(sp, all);
                (sp, &downstream & &sp_set)
            })
            .collect();

        let mut working = sp_set;
        let mut order = Vec::with_capacity(working.len());
        while !working.is_empty() {
            let ready = working.iter().copied().find(|sp| {
                sources[sp].iter().filter(|s| working.contains(*s)).count() == 1
            });
            match ready {
                Some(sp) => {
                    order.push(sp);
                    working.shift_remove(&sp);
                }
                None => {
                    return Err(WorkflowError::CircularDependency {
                        remaining: working
                            .iter()
                            .map(|sp| self.nodes[sp.0].name.clone())
                            .collect(),
                    });
                }
            }
        }
        Ok(order)
    }

    /// Groups the full dependency graph behind `split_points` into one group
    /// per split point.
    ///
    /// Peeling runs most-downstream-first; each peeled split point takes its
    /// dependencies except those still reserved by a not-yet-peeled split
    /// point, so shared territory settles on the most upstream split point
    /// that needs it. Independent variables needed by several split points
    /// join every one of their groups instead of being partitioned away.
    pub fn split_configuration(
        &self,
        split_points: &[NodeHandle],
    ) -> Result<SplitConfiguration, WorkflowError> {
        let mut all: IndexSet<NodeHandle> = IndexSet::new();
        let deps: IndexMap<NodeHandle, IndexSet<NodeHandle>> = split_points
            .iter()
            .map(|&sp| (sp, self.dependency_set(sp)))
            .collect();
        for set in deps.values() {
            all.extend(set.iter().copied());
        }

        let peel_order = self.peel_split_points(split_points, &all)?;

        let mut claimed: IndexSet<NodeHandle> = IndexSet::new();
        let mut members_by_sp: IndexMap<NodeHandle, IndexSet<NodeHandle>> = IndexMap::new();
        for (position, &sp) in peel_order.iter().enumerate() {
            let reserved: IndexSet<NodeHandle> = peel_order[position + 1..]
                .iter()
                .flat_map(|later| deps[later].iter().copied())
                .collect();
            let mut members: IndexSet<NodeHandle> = IndexSet::new();
            for &node in &all {
                if !deps[&sp].contains(&node) {
                    continue;
                }
                if node == sp {
                    members.insert(node);
                    claimed.insert(node);
                } else if self.is_independent(node) {
                    // Handled below: attached wherever directly consumed.
                } else if !claimed.contains(&node) && !reserved.contains(&node) {
                    members.insert(node);
                    claimed.insert(node);
                }
            }
            members_by_sp.insert(sp, members);
        }

        // An independent variable joins every group with a member that reads
        // it, however many split points that turns out to be.
        for &node in &all {
            if !self.is_independent(node) {
                continue;
            }
            for (&sp, members) in members_by_sp.iter_mut() {
                if sp == node {
                    continue;
                }
                let consumed = members
                    .iter()
                    .any(|&m| self.nodes[m.0].connections.contains_key(&node));
                if consumed {
                    members.insert(node);
                }
            }
        }

        let groups = split_points
            .iter()
            .map(|&sp| {
                let members = &members_by_sp[&sp];
                let boundary_outputs: Vec<NodeHandle> = members
                    .iter()
                    .copied()
                    .filter(|&m| {
                        m == sp
                            || (!self.is_independent(m)
                                && all.iter().any(|&c| {
                                    !members.contains(&c)
                                        && self.nodes[c.0].connections.contains_key(&m)
                                }))
                    })
                    .collect();
                let external_inputs: Vec<NodeHandle> = members
                    .iter()
                    .copied()
                    .filter(|&m| {
                        self.nodes[m.0]
                            .connections
                            .keys()
                            .any(|src| !members.contains(src))
                    })
                    .collect();
                SplitGroup {
                    split_point: sp,
                    members: members.iter().copied().collect(),
                    boundary_outputs,
                    external_inputs,
                }
            })
            .collect();

        Ok(SplitConfiguration {
            nodes: all.into_iter().collect(),
            groups,
        })
    }

    /// Partitions the workflow at `split_points` into self-contained,
    /// externally drivable systems.
    ///
    /// Every cross-group edge is replaced by an independent-variable
    /// stand-in inside the consuming group; each post-split group with more
    /// than one member becomes a [`SubSystem`] on a fresh version counter,
    /// while a genuinely standalone node passes through unwrapped. The
    /// returned links say which exported output feeds which exported input.
    pub fn split_workflow(
        &mut self,
        split_points: &[NodeHandle],
    ) -> Result<SplitWorkflow, WorkflowError> {
        let cfg = self.split_configuration(split_points)?;
        let mut group_members: Vec<IndexSet<NodeHandle>> = cfg
            .groups
            .iter()
            .map(|g| g.members.iter().copied().collect())
            .collect();

        self.duplicate_shared_independents(&mut group_members)?;

        // Sever cross-group edges, remembering where each stand-in came from.
        struct CrossRec {
            src_gid: usize,
            src: NodeHandle,
            output: String,
            dst_gid: usize,
            stand_in: NodeHandle,
        }
        let mut records: Vec<CrossRec> = Vec::new();
        for gid in 0..group_members.len() {
            let consumers: Vec<NodeHandle> = group_members[gid].iter().copied().collect();
            for consumer in consumers {
                let externals: Vec<NodeHandle> = self.nodes[consumer.0]
                    .connections
                    .keys()
                    .copied()
                    .filter(|src| !group_members[gid].contains(src))
                    .collect();
                for src in externals {
                    let src_gid = group_members
                        .iter()
                        .position(|members| members.contains(&src))
                        .unwrap_or(gid);
                    for (output, stand_in) in self.split_connection(consumer, src)? {
                        group_members[gid].insert(stand_in);
                        records.push(CrossRec {
                            src_gid,
                            src,
                            output,
                            dst_gid: gid,
                            stand_in,
                        });
                    }
                }
            }
        }

        let mut systems = Vec::with_capacity(cfg.groups.len());
        for (gid, group) in cfg.groups.iter().enumerate() {
            let members: Vec<NodeHandle> = group_members[gid].iter().copied().collect();
            if members.len() == 1 {
                systems.push(members[0]);
                continue;
            }
            systems.push(self.wrap_group(group, &members));
        }

        let links = records
            .into_iter()
            .map(|rec| {
                let from_output = self
                    .exported_output(systems[rec.src_gid], rec.src, &rec.output)
                    .unwrap_or_else(|| rec.output.clone());
                let to_input = self
                    .exported_input(systems[rec.dst_gid], rec.stand_in, &rec.output)
                    .unwrap_or_else(|| rec.output.clone());
                SystemLink {
                    from_system: rec.src_gid,
                    from_output,
                    to_system: rec.dst_gid,
                    to_input,
                }
            })
            .collect();

        Ok(SplitWorkflow { systems, links })
    }

    /// An independent variable sitting in several groups stays in the first
    /// and is cloned, same metadata and current value, into the others, with
    /// those groups' consumers rewired onto their clone.
    fn duplicate_shared_independents(
        &mut self,
        group_members: &mut [IndexSet<NodeHandle>],
    ) -> Result<(), WorkflowError> {
        let mut seen: IndexMap<NodeHandle, Vec<usize>> = IndexMap::new();
        for (gid, members) in group_members.iter().enumerate() {
            for &m in members {
                if self.is_independent(m) {
                    seen.entry(m).or_default().push(gid);
                }
            }
        }
        for (original, gids) in seen {
            for &gid in gids.iter().skip(1) {
                let (output, meta, data) = match &self.nodes[original.0].behaviour {
                    Behaviour::Independent(iv) => {
                        (iv.output.clone(), iv.meta.clone(), iv.data.clone())
                    }
                    _ => continue,
                };
                let name = format!("{}_{}", self.nodes[original.0].name, gid);
                let version = self.nodes[original.0].version;
                let clone = self.add_node_data(
                    name,
                    Behaviour::Independent(IndependentVariable::with_data(output, meta, data)),
                    version,
                );
                let consumers: Vec<NodeHandle> = group_members[gid].iter().copied().collect();
                for consumer in consumers {
                    let Some(edge) = self.nodes[consumer.0].connections.shift_remove(&original)
                    else {
                        continue;
                    };
                    for (out, dests) in &edge {
                        for dest in dests {
                            self.nodes[consumer.0]
                                .owner
                                .insert(dest.clone(), (clone, out.clone()));
                        }
                    }
                    self.nodes[consumer.0].connections.insert(clone, edge);
                    self.nodes[consumer.0].check_consistency()?;
                }
                group_members[gid].shift_remove(&original);
                group_members[gid].insert(clone);
            }
        }
        Ok(())
    }

    /// Wraps a post-split group in a [`SubSystem`] node on a fresh version
    /// counter.
    fn wrap_group(&mut self, group: &SplitGroup, members: &[NodeHandle]) -> NodeHandle {
        let version = self.new_version();
        for &m in members {
            self.nodes[m.0].version = version;
        }

        let input_entries: Vec<(NodeHandle, String)> = members
            .iter()
            .copied()
            .filter_map(|m| {
                self.independent_output(m)
                    .map(|output| (m, output.to_string()))
            })
            .collect();

        let mut output_entries: Vec<(NodeHandle, String)> = Vec::new();
        for &b in &group.boundary_outputs {
            self.ensure_interface(b);
            let outputs: Vec<String> = self.nodes[b.0]
                .interface
                .as_ref()
                .map(|iface| iface.output.keys().cloned().collect())
                .unwrap_or_default();
            output_entries.extend(outputs.into_iter().map(|o| (b, o)));
        }

        let input_map = merged_names(&input_entries, |h| self.nodes[h.0].name.clone());
        let output_map = merged_names(&output_entries, |h| self.nodes[h.0].name.clone());
        let input_names = input_map
            .iter()
            .map(|(global, key)| (key.clone(), global.clone()))
            .collect();
        let output_names = output_map
            .iter()
            .map(|(global, key)| (key.clone(), global.clone()))
            .collect();

        let name = format!("{}_system", self.nodes[group.split_point.0].name);
        self.add_node_data(
            name,
            Behaviour::System(SubSystem {
                members: members.to_vec(),
                boundary: group.boundary_outputs.clone(),
                version,
                internal_seen: None,
                input_map,
                input_names,
                output_map,
                output_names,
            }),
            VersionId::ROOT,
        )
    }

    fn exported_output(
        &self,
        system: NodeHandle,
        member: NodeHandle,
        local: &str,
    ) -> Option<String> {
        match &self.nodes[system.0].behaviour {
            Behaviour::System(sys) => sys.global_output_name(member, local).map(String::from),
            _ => Some(local.to_string()),
        }
    }

    fn exported_input(
        &self,
        system: NodeHandle,
        member: NodeHandle,
        local: &str,
    ) -> Option<String> {
        match &self.nodes[system.0].behaviour {
            Behaviour::System(sys) => sys.global_input_name(member, local).map(String::from),
            _ => Some(local.to_string()),
        }
    }

    /// Drives a wrapped system's exported input, resolving the global name
    /// to the member stand-in behind it.
    pub fn set_system_input(
        &mut self,
        system: NodeHandle,
        global: &str,
        value: Value,
    ) -> Result<(), WorkflowError> {
        let member = match &self.nodes[system.0].behaviour {
            Behaviour::System(sys) => sys.resolve_input(global).map(|(m, _)| m),
            Behaviour::Independent(_) => Some(system),
            _ => None,
        };
        match member {
            Some(m) => self.set_data(m, value),
            None => Err(WorkflowError::UnknownVariable {
                node: self.nodes[system.0].name.clone(),
                name: global.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connect::{Alias, ConnectSpec};
    use crate::core::node::NodeModel;
    use crate::core::value::{Interface, PortMeta, ValueMap};

    /// `out = gain * input`, for building little chains.
    struct Gain {
        input: &'static str,
        output: &'static str,
        gain: f64,
    }

    impl NodeModel for Gain {
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
            let v = inputs.get(self.input).and_then(Value::scalar).unwrap_or(0.0);
            outputs.insert(self.output.to_string(), Value::Scalar(self.gain * v));
            Ok(())
        }
    }

    struct Sum2 {
        a: &'static str,
        b: &'static str,
        output: &'static str,
    }

    impl NodeModel for Sum2 {
        fn declare_ports(&self) -> Interface {
            Interface::new()
                .input(self.a, PortMeta::scalar(0.0))
                .input(self.b, PortMeta::scalar(0.0))
                .output(self.output, PortMeta::scalar(0.0))
        }

        fn compute(
            &mut self,
            inputs: &ValueMap,
            outputs: &mut ValueMap,
        ) -> Result<(), WorkflowError> {
            let a = inputs.get(self.a).and_then(Value::scalar).unwrap_or(0.0);
            let b = inputs.get(self.b).and_then(Value::scalar).unwrap_or(0.0);
            outputs.insert(self.output.to_string(), Value::Scalar(a + b));
            Ok(())
        }
    }

    /// x -> a -> b(split) and x, a -> c -> d(split), d also reads b.
    fn shared_territory(wf: &mut Workflow) -> (NodeHandle, NodeHandle, NodeHandle, NodeHandle, NodeHandle) {
        let x = wf.add_independent("x", "x", PortMeta::scalar(1.0));
        let a = wf.add_node("a", Gain {
            input: "x",
            output: "a_out",
            gain: 2.0,
        });
        let b = wf.add_node("b", Gain {
            input: "a_out",
            output: "b_out",
            gain: 3.0,
        });
        let c = wf.add_node("c", Gain {
            input: "a_out",
            output: "c_out",
            gain: 5.0,
        });
        let d = wf.add_node("d", Sum2 {
            a: "b_out",
            b: "c_out",
            output: "d_out",
        });
        wf.connect_auto(a, x).unwrap();
        wf.connect_auto(b, a).unwrap();
        wf.connect_auto(c, a).unwrap();
        wf.connect_auto(d, b).unwrap();
        wf.connect_auto(d, c).unwrap();
        (x, a, b, c, d)
    }

    #[test]
    fn shared_territory_settles_upstream() {
        let mut wf = Workflow::new();
        let (x, a, b, c, d) = shared_territory(&mut wf);
        let cfg = wf.split_configuration(&[b, d]).unwrap();

        assert_eq!(cfg.nodes.len(), 5);
        let group_b = &cfg.groups[0];
        let group_d = &cfg.groups[1];

        // a is needed by both split points; the upstream one keeps it. The
        // independent variable x lands with its only direct reader, a.
        assert!(group_b.members.contains(&a));
        assert!(group_b.members.contains(&x));
        assert!(!group_d.members.contains(&a));
        assert!(!group_d.members.contains(&x));
        assert!(group_d.members.contains(&c));
        assert!(group_d.members.contains(&d));

        // b's group exports both b_out (the split point) and a_out (read by
        // c and d outside), and consumes nothing external.
        assert!(group_b.boundary_outputs.contains(&b));
        assert!(group_b.boundary_outputs.contains(&a));
        assert!(group_b.external_inputs.is_empty());

        // d's group pulls a_out and b_out across the boundary.
        assert!(group_d.external_inputs.contains(&c));
        assert!(group_d.external_inputs.contains(&d));
    }

    #[test]
    fn split_workflow_builds_self_contained_systems() {
        let mut wf = Workflow::new();
        let (_x, _a, b, _c, d) = shared_territory(&mut wf);
        // x = 1: a_out = 2, b_out = 6, c_out = 10, d_out = 16.
        let before = wf.get_output(d).unwrap()["d_out"].clone();
        assert_eq!(before, Value::Scalar(16.0));

        let split = wf.split_workflow(&[b, d]).unwrap();
        assert_eq!(split.systems.len(), 2);

        // Both groups have several members, so both got wrapped.
        let sys_b = split.systems[0];
        let sys_d = split.systems[1];
        assert_eq!(wf.node_name(sys_b), "b_system");
        assert_eq!(wf.node_name(sys_d), "d_system");

        // Stand-ins were seeded from the live values, so each system
        // reproduces its pre-split answers without any external driving.
        let out_b = wf.get_output(sys_b).unwrap();
        assert_eq!(out_b["b_out"], Value::Scalar(6.0));
        assert_eq!(out_b["a_out"], Value::Scalar(2.0));
        let out_d = wf.get_output(sys_d).unwrap();
        assert_eq!(out_d["d_out"], Value::Scalar(16.0));

        // Links route b's exports into d's stand-ins.
        assert!(
            split
                .links
                .iter()
                .any(|l| l.from_system == 0 && l.to_system == 1 && l.from_output == "a_out")
        );
        assert!(
            split
                .links
                .iter()
                .any(|l| l.from_system == 0 && l.to_system == 1 && l.from_output == "b_out")
        );

        // Replaying a link by hand: drive d's stand-in with a new b_out.
        let link = split
            .links
            .iter()
            .find(|l| l.from_output == "b_out")
            .unwrap()
            .clone();
        wf.set_system_input(sys_d, &link.to_input, Value::Scalar(0.0))
            .unwrap();
        let out_d = wf.get_output(sys_d).unwrap();
        assert_eq!(out_d["d_out"], Value::Scalar(10.0));

        // The original split point still answers through its system, and
        // the duplicated independent variable decouples the two systems.
        wf.set_system_input(sys_b, "x", Value::Scalar(2.0)).unwrap();
        assert_eq!(wf.get_output(sys_b).unwrap()["b_out"], Value::Scalar(12.0));
        assert_eq!(wf.get_output(sys_d).unwrap()["d_out"], Value::Scalar(10.0));
    }

    #[test]
    fn whole_graph_split_point_wraps_everything_once() {
        let mut wf = Workflow::new();
        let x = wf.add_independent("x", "speed", PortMeta::scalar(3.0));
        let top = wf.add_node("top", Gain {
            input: "speed",
            output: "power",
            gain: 10.0,
        });
        wf.connect_auto(top, x).unwrap();
        let top_iface = wf.interface(top).clone();

        let split = wf.split_workflow(&[top]).unwrap();
        assert_eq!(split.systems.len(), 1);
        assert!(split.links.is_empty());

        let sys = split.systems[0];
        let sys_iface = wf.interface(sys).clone();
        // Up to the boundary independent-variable substitution, the system
        // interface mirrors the unpartitioned top node's own.
        let inputs: Vec<&str> = sys_iface.input.keys().map(String::as_str).collect();
        let outputs: Vec<&str> = sys_iface.output.keys().map(String::as_str).collect();
        assert_eq!(inputs, vec!["speed"]);
        assert_eq!(
            outputs,
            top_iface.output.keys().map(String::as_str).collect::<Vec<_>>()
        );
        assert_eq!(wf.get_output(sys).unwrap()["power"], Value::Scalar(30.0));
    }

    #[test]
    fn standalone_split_point_passes_through_unwrapped() {
        let mut wf = Workflow::new();
        let lone = wf.add_independent("lone", "value", PortMeta::scalar(1.0));
        let split = wf.split_workflow(&[lone]).unwrap();
        assert_eq!(split.systems, vec![lone]);
        assert!(split.links.is_empty());
    }

    #[test]
    fn shared_independent_variable_joins_both_groups() {
        let mut wf = Workflow::new();
        let x = wf.add_independent("x", "x", PortMeta::scalar(2.0));
        let p = wf.add_node("p", Gain {
            input: "x",
            output: "p_out",
            gain: 3.0,
        });
        let q = wf.add_node("q", Gain {
            input: "x",
            output: "q_out",
            gain: 7.0,
        });
        wf.connect_auto(p, x).unwrap();
        wf.connect_auto(q, x).unwrap();

        let cfg = wf.split_configuration(&[p, q]).unwrap();
        assert!(cfg.groups[0].members.contains(&x));
        assert!(cfg.groups[1].members.contains(&x));

        let split = wf.split_workflow(&[p, q]).unwrap();
        assert!(split.links.is_empty());

        // Each system owns its own copy of x now; driving one copy leaves
        // the other system untouched.
        let (sys_p, sys_q) = (split.systems[0], split.systems[1]);
        assert_eq!(wf.get_output(sys_p).unwrap()["p_out"], Value::Scalar(6.0));
        assert_eq!(wf.get_output(sys_q).unwrap()["q_out"], Value::Scalar(14.0));
        wf.set_system_input(sys_p, "x", Value::Scalar(10.0)).unwrap();
        assert_eq!(wf.get_output(sys_p).unwrap()["p_out"], Value::Scalar(30.0));
        assert_eq!(wf.get_output(sys_q).unwrap()["q_out"], Value::Scalar(14.0));
    }

    #[test]
    fn cyclic_split_points_are_rejected() {
        let mut wf = Workflow::new();
        let a = wf.add_node("a", Gain {
            input: "y",
            output: "x",
            gain: 1.0,
        });
        let b = wf.add_node("b", Gain {
            input: "x",
            output: "y",
            gain: 1.0,
        });
        wf.connect(b, a, ConnectSpec::map([("x", "x")]), &Alias::new())
            .unwrap();
        wf.connect(a, b, ConnectSpec::map([("y", "y")]), &Alias::new())
            .unwrap();
        let err = wf.split_configuration(&[a, b]).unwrap_err();
        assert!(matches!(err, WorkflowError::CircularDependency { .. }));
    }
}
