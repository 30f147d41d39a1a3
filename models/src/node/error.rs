use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

// HTTP status codes the Kubernetes API uses for retryable failures.
const CONFLICT: u16 = 409;
const TOO_MANY_REQUESTS: u16 = 429;
const SERVER_ERROR_MIN: u16 = 500;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Unable to get Node '{}': '{}'", node_name, source))]
    GetNode {
        node_name: String,
        source: kube::Error,
    },

    #[snafu(display("Unable to list Nodes: '{}'", source))]
    ListNodes { source: kube::Error },

    #[snafu(display("Unable to update Node '{}': '{}'", node_name, source))]
    UpdateNode {
        node_name: String,
        source: kube::Error,
    },

    #[snafu(display("Unable to list Pods on Node '{}': '{}'", node_name, source))]
    ListPods {
        node_name: String,
        source: kube::Error,
    },

    #[snafu(display("Node object is missing a name"))]
    MissingNodeName,
}

impl Error {
    fn kube_source(&self) -> Option<&kube::Error> {
        match self {
            Self::GetNode { source, .. }
            | Self::ListNodes { source }
            | Self::UpdateNode { source, .. }
            | Self::ListPods { source, .. } => Some(source),
            Self::MissingNodeName => None,
        }
    }

    /// Whether the k8s API rejected a write because the object changed since it was read.
    pub fn is_conflict(&self) -> bool {
        matches!(self.kube_source(), Some(kube::Error::Api(response)) if response.code == CONFLICT)
    }

    /// Whether repeating the request could plausibly succeed.
    ///
    /// Version conflicts, throttling, server errors and transport failures are retryable. Other API
    /// responses (not found, forbidden, invalid) will not change on retry.
    pub fn is_retryable(&self) -> bool {
        match self.kube_source() {
            Some(kube::Error::Api(response)) => {
                response.code == CONFLICT
                    || response.code == TOO_MANY_REQUESTS
                    || response.code >= SERVER_ERROR_MIN
            }
            Some(_) => true,
            None => false,
        }
    }
}
