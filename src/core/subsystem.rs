use indexmap::IndexMap;

use crate::core::node::NodeHandle;
use crate::core::version::VersionId;

/// An aggregate node exposing a merged input/output interface over an
/// internal node set.
///
/// Inputs map onto member independent variables (originals and the stand-ins
/// created when cross-group edges were split); outputs map onto the boundary
/// members' declared outputs. Internal invalidation runs on the sub-system's
/// own version counter, decoupled from the parent workflow's.
pub struct SubSystem {
    pub(crate) members: Vec<NodeHandle>,
    /// Members whose outputs the sub-system exports.
    pub(crate) boundary: Vec<NodeHandle>,
    pub(crate) version: VersionId,
    /// Last value of the carved-out counter observed by an evaluation; lets
    /// the parent notice members driven directly between its own ticks.
    pub(crate) internal_seen: Option<u64>,
    /// `global input name -> (member, local output name)`.
    pub(crate) input_map: IndexMap<String, (NodeHandle, String)>,
    /// Reverse of `input_map`.
    pub(crate) input_names: IndexMap<(NodeHandle, String), String>,
    /// `global output name -> (member, local output name)`.
    pub(crate) output_map: IndexMap<String, (NodeHandle, String)>,
    /// Reverse of `output_map`.
    pub(crate) output_names: IndexMap<(NodeHandle, String), String>,
}

impl SubSystem {
    pub fn members(&self) -> &[NodeHandle] {
        &self.members
    }

    pub fn boundary(&self) -> &[NodeHandle] {
        &self.boundary
    }

    /// Global input names in export order.
    pub fn input_globals(&self) -> impl Iterator<Item = &str> {
        self.input_map.keys().map(String::as_str)
    }

    /// Global output names in export order.
    pub fn output_globals(&self) -> impl Iterator<Item = &str> {
        self.output_map.keys().map(String::as_str)
    }

    /// The member port a global input name resolves to.
    pub fn resolve_input(&self, global: &str) -> Option<(NodeHandle, &str)> {
        self.input_map
            .get(global)
            .map(|(h, local)| (*h, local.as_str()))
    }

    /// The member port a global output name resolves to.
    pub fn resolve_output(&self, global: &str) -> Option<(NodeHandle, &str)> {
        self.output_map
            .get(global)
            .map(|(h, local)| (*h, local.as_str()))
    }

    /// The exported global name of a member port, if it is exported.
    pub fn global_output_name(&self, member: NodeHandle, local: &str) -> Option<&str> {
        self.output_names
            .get(&(member, local.to_string()))
            .map(String::as_str)
    }

    pub fn global_input_name(&self, member: NodeHandle, local: &str) -> Option<&str> {
        self.input_names
            .get(&(member, local.to_string()))
            .map(String::as_str)
    }
}

/// Merges member-local port names into globally unique export names.
///
/// A local name exposed by exactly one member keeps its name. Colliding
/// locals become `<node>__<local>`; if member names collide too, the entry
/// ordinal disambiguates as `<node>_<ordinal>__<local>`.
pub(crate) fn merged_names(
    entries: &[(NodeHandle, String)],
    node_name: impl Fn(NodeHandle) -> String,
) -> IndexMap<String, (NodeHandle, String)> {
    let mut local_counts: IndexMap<&str, usize> = IndexMap::new();
    for (_, local) in entries {
        *local_counts.entry(local.as_str()).or_insert(0) += 1;
    }

    let mut merged: IndexMap<String, (NodeHandle, String)> = IndexMap::new();
    for (ordinal, (handle, local)) in entries.iter().enumerate() {
        let global = if local_counts[local.as_str()] == 1 {
            local.clone()
        } else {
            let qualified = format!("{}__{}", node_name(*handle), local);
            if merged.contains_key(&qualified) {
                format!("{}_{}__{}", node_name(*handle), ordinal, local)
            } else {
                qualified
            }
        };
        merged.insert(global, (*handle, local.clone()));
    }
    merged
}
