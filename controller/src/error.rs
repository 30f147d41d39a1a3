use models::node::StartupClientError;

use snafu::Snafu;

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The crate-wide error type.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Unable to fetch Node '{}': '{}'", node_name, source))]
    FetchNode {
        node_name: String,
        source: StartupClientError,
    },

    #[snafu(display(
        "Unable to list Pods on Node '{}' to determine startup state: '{}'",
        node_name,
        source
    ))]
    ListNodePods {
        node_name: String,
        source: StartupClientError,
    },

    #[snafu(display("Unable to remove startup taint from Node '{}': '{}'", node_name, source))]
    RemoveStartupTaint {
        node_name: String,
        source: StartupClientError,
    },

    #[snafu(display("Unable to list Nodes for backfill: '{}'", source))]
    BackfillListNodes { source: StartupClientError },

    #[snafu(display("Unable to add startup taint to Node '{}': '{}'", node_name, source))]
    AddStartupTaint {
        node_name: String,
        source: StartupClientError,
    },

    #[snafu(display("Attempted to process a Node without a name"))]
    NodeWithoutName,
}
