use thiserror::Error;

/// Errors raised by the workflow core.
///
/// All of these are local, synchronous failures surfaced to the immediate
/// caller; none are retried.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A referenced name is not present in a node's interface.
    #[error("unknown variable '{name}' on node '{node}'")]
    UnknownVariable { node: String, name: String },

    /// The same destination input was targeted twice within one connect call.
    #[error("destination input '{name}' targeted twice in one connect call")]
    DuplicateTarget { name: String },

    /// Positional destination/source specs differ in length.
    #[error("positional connect specs differ in length: {dest} destinations vs {source_count} sources")]
    PairingMismatch { dest: usize, source_count: usize },

    /// The execution-order solver could not make progress.
    #[error("circular dependency among nodes: {remaining:?}")]
    CircularDependency { remaining: Vec<String> },

    /// An abstract compute callback was invoked.
    #[error("node '{node}' does not implement compute()")]
    NotImplemented { node: String },

    /// `set_data` was called on a node that is not an independent variable.
    #[error("node '{node}' is not an independent variable")]
    NotIndependent { node: String },

    /// A compute callback did not fill a declared, requested output.
    #[error("node '{node}' did not produce declared output '{name}'")]
    MissingOutput { node: String, name: String },

    /// The connection maps disagree. Internal consistency failure; should
    /// never trigger from correct API usage.
    #[error("connection state corrupted on node '{node}': {detail}")]
    CorruptedConnectionState { node: String, detail: String },
}
