//! Kubernetes-backed node client.

use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams, PostParams};
use kube::Client;

use crate::error::ClientError;
use crate::node_client::NodeClient;
use async_trait::async_trait;

/// Node client backed by the cluster apiserver.
pub struct KubeNodeClient {
    api: Api<Node>,
}

impl KubeNodeClient {
    /// Create a client over the cluster-scoped node API.
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl NodeClient for KubeNodeClient {
    async fn list_nodes(&self) -> Result<Vec<Node>, ClientError> {
        let nodes = self
            .api
            .list(&ListParams::default())
            .await
            .map_err(|err| classify(err, "<list>"))?;

        Ok(nodes.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node, ClientError> {
        self.api.get(name).await.map_err(|err| classify(err, name))
    }

    async fn replace_node(&self, node: &Node) -> Result<Node, ClientError> {
        let name = node
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ClientError::NotFound("node without a name".to_string()))?;

        self.api
            .replace(name, &PostParams::default(), node)
            .await
            .map_err(|err| classify(err, name))
    }
}

/// Map apiserver status codes onto the error kinds callers branch on.
fn classify(err: kube::Error, name: &str) -> ClientError {
    if let kube::Error::Api(response) = &err {
        if response.code == 409 {
            return ClientError::Conflict(name.to_string());
        }
        if response.code == 404 {
            return ClientError::NotFound(name.to_string());
        }
    }

    ClientError::Api(err)
}
