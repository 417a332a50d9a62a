use indexmap::IndexMap;

use crate::core::error::WorkflowError;
use crate::core::node::NodeHandle;
use crate::core::value::Interface;
use crate::core::workflow::Workflow;

/// Destination-local-name to source-name renames applied during resolution.
pub type Alias = IndexMap<String, String>;

/// The calling conventions accepted by [`Workflow::connect`], normalized into
/// one canonical `{destination -> source}` map before any mutation.
///
/// Single-name conventions are one-element lists of the list forms, so the
/// original seven spellings collapse into five closed variants.
#[derive(Debug, Clone, Default)]
pub enum ConnectSpec {
    /// Wire every destination input whose (de-aliased) name matches a source
    /// output. Non-matches are skipped, not errors.
    #[default]
    Auto,
    /// Wire the named source outputs to identically named (or de-aliased)
    /// destination inputs.
    Source(Vec<String>),
    /// Wire the named destination inputs from identically named (or
    /// de-aliased) source outputs.
    Dest(Vec<String>),
    /// Explicit `{destination -> source}` pairs.
    Map(IndexMap<String, String>),
    /// Positional pairing of two equally long name lists.
    Paired {
        dest: Vec<String>,
        source: Vec<String>,
    },
}

impl ConnectSpec {
    pub fn source(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ConnectSpec::Source(names.into_iter().map(Into::into).collect())
    }

    pub fn dest(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ConnectSpec::Dest(names.into_iter().map(Into::into).collect())
    }

    pub fn map(
        pairs: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        ConnectSpec::Map(
            pairs
                .into_iter()
                .map(|(d, s)| (d.into(), s.into()))
                .collect(),
        )
    }

    pub fn paired(
        dest: impl IntoIterator<Item = impl Into<String>>,
        source: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        ConnectSpec::Paired {
            dest: dest.into_iter().map(Into::into).collect(),
            source: source.into_iter().map(Into::into).collect(),
        }
    }
}

/// Resolves a spec against the two interfaces into the canonical
/// `{destination -> source}` map. Pure; no mutation happens here.
fn resolve_spec(
    spec: &ConnectSpec,
    alias: &Alias,
    dst_name: &str,
    dst_iface: &Interface,
    src_name: &str,
    src_iface: &Interface,
) -> Result<IndexMap<String, String>, WorkflowError> {
    let unknown_dst = |name: &str| WorkflowError::UnknownVariable {
        node: dst_name.to_string(),
        name: name.to_string(),
    };
    let unknown_src = |name: &str| WorkflowError::UnknownVariable {
        node: src_name.to_string(),
        name: name.to_string(),
    };
    // Source name a destination input answers to, after de-aliasing.
    let source_name_for = |dest: &str| -> String {
        alias.get(dest).cloned().unwrap_or_else(|| dest.to_string())
    };
    // Destination input answering to a source name (reverse alias lookup).
    let dest_name_for = |source: &str| -> String {
        alias
            .iter()
            .find(|(_, s)| s.as_str() == source)
            .map(|(d, _)| d.clone())
            .unwrap_or_else(|| source.to_string())
    };

    let mut resolved: IndexMap<String, String> = IndexMap::new();
    let mut insert = |dest: String, source: String| -> Result<(), WorkflowError> {
        if resolved.insert(dest.clone(), source).is_some() {
            return Err(WorkflowError::DuplicateTarget { name: dest });
        }
        Ok(())
    };

    match spec {
        ConnectSpec::Auto => {
            for dest in dst_iface.input.keys() {
                let source = source_name_for(dest);
                if src_iface.output.contains_key(&source) {
                    insert(dest.clone(), source)?;
                }
            }
        }
        ConnectSpec::Source(names) => {
            for source in names {
                if !src_iface.output.contains_key(source) {
                    return Err(unknown_src(source));
                }
                let dest = dest_name_for(source);
                if !dst_iface.input.contains_key(&dest) {
                    return Err(unknown_dst(&dest));
                }
                insert(dest, source.clone())?;
            }
        }
        ConnectSpec::Dest(names) => {
            for dest in names {
                if !dst_iface.input.contains_key(dest) {
                    return Err(unknown_dst(dest));
                }
                let source = source_name_for(dest);
                if !src_iface.output.contains_key(&source) {
                    return Err(unknown_src(&source));
                }
                insert(dest.clone(), source)?;
            }
        }
        ConnectSpec::Map(pairs) => {
            for (dest, source) in pairs {
                if !dst_iface.input.contains_key(dest) {
                    return Err(unknown_dst(dest));
                }
                if !src_iface.output.contains_key(source) {
                    return Err(unknown_src(source));
                }
                insert(dest.clone(), source.clone())?;
            }
        }
        ConnectSpec::Paired { dest, source } => {
            if dest.len() != source.len() {
                return Err(WorkflowError::PairingMismatch {
                    dest: dest.len(),
                    source_count: source.len(),
                });
            }
            for (dest, source) in dest.iter().zip(source) {
                if !dst_iface.input.contains_key(dest) {
                    return Err(unknown_dst(dest));
                }
                if !src_iface.output.contains_key(source) {
                    return Err(unknown_src(source));
                }
                insert(dest.clone(), source.clone())?;
            }
        }
    }
    Ok(resolved)
}

impl Workflow {
    /// Wires `src`'s outputs into `dst`'s inputs.
    ///
    /// Returns `Ok(true)` when at least one edge was made. An empty
    /// resolution is not an error: auto-wiring is best-effort, so the call
    /// is a no-op that returns `Ok(false)` and leaves a debug record.
    ///
    /// Reconnecting an already-bound input silently detaches it from its old
    /// source first; an emptied source entry is pruned.
    pub fn connect(
        &mut self,
        dst: NodeHandle,
        src: NodeHandle,
        spec: ConnectSpec,
        alias: &Alias,
    ) -> Result<bool, WorkflowError> {
        self.ensure_interface(dst);
        self.ensure_interface(src);
        let resolved = {
            let dst_node = &self.nodes[dst.0];
            let src_node = &self.nodes[src.0];
            match (dst_node.interface.as_ref(), src_node.interface.as_ref()) {
                (Some(dst_iface), Some(src_iface)) => resolve_spec(
                    &spec,
                    alias,
                    &dst_node.name,
                    dst_iface,
                    &src_node.name,
                    src_iface,
                )?,
                _ => IndexMap::new(),
            }
        };

        if resolved.is_empty() {
            log::debug!(
                "connect: nothing to wire from '{}' into '{}' ({spec:?})",
                self.nodes[src.0].name,
                self.nodes[dst.0].name
            );
            return Ok(false);
        }

        for (dest, source) in resolved {
            self.detach_input(dst, &dest);
            self.nodes[dst.0]
                .owner
                .insert(dest.clone(), (src, source.clone()));
            self.nodes[dst.0]
                .connections
                .entry(src)
                .or_default()
                .entry(source)
                .or_default()
                .push(dest);
        }
        self.nodes[dst.0].check_consistency()?;
        Ok(true)
    }

    /// `connect` with name matching and no renames.
    pub fn connect_auto(&mut self, dst: NodeHandle, src: NodeHandle) -> Result<bool, WorkflowError> {
        self.connect(dst, src, ConnectSpec::Auto, &Alias::new())
    }

    /// Removes the input's active edge, if any, pruning emptied entries on
    /// the old source.
    fn detach_input(&mut self, dst: NodeHandle, input: &str) {
        let Some((old_src, old_output)) = self.nodes[dst.0].owner.shift_remove(input) else {
            return;
        };
        log::debug!(
            "connect: input '{input}' of '{}' detached from '{}.{old_output}'",
            self.nodes[dst.0].name,
            self.nodes[old_src.0].name
        );
        let node = &mut self.nodes[dst.0];
        if let Some(edge) = node.connections.get_mut(&old_src) {
            if let Some(dests) = edge.get_mut(&old_output) {
                dests.retain(|d| d != input);
                if dests.is_empty() {
                    edge.shift_remove(&old_output);
                }
            }
            if edge.is_empty() {
                node.connections.shift_remove(&old_src);
            }
        }
    }
}
