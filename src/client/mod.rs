//! Client subtree detection and bundling.
//!
//! Detection is a single typed pass over the tree: every [`Node::Client`] is
//! swapped for a [`Node::Placeholder`] carrying a stable id, and described by
//! a [`ClientComponentInfo`] that the [`bundle`] step turns into a script.

pub mod bundle;
pub mod modules;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::tree::{Element, Node};

pub use bundle::{bundle, BundleManifest, ClientBundle};
pub use modules::{FsModuleResolver, MemoryModuleResolver, ModuleResolver, SourceModule};

/// Prefix of every client id.
pub const CLIENT_ID_PREFIX: &str = "dp-";

/// One detected client-only subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientComponentInfo {
    pub id: String,
    /// Module specifier of the component.
    pub source: String,
    /// Props snapshot taken at detection time.
    pub props: serde_json::Value,
    /// Tree path of the original node.
    pub path: Vec<usize>,
}

/// Result of the detection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// The tree with every client node replaced by its placeholder.
    pub tree: Vec<Node>,
    pub clients: Vec<ClientComponentInfo>,
}

/// Stable id for a client node: `dp-` + 16 hex digits of
/// SHA-256(path, specifier, key).
pub fn client_id(path: &[usize], source: &str, key: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    let path = path
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(".");
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    if let Some(key) = key {
        hasher.update(key.as_bytes());
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("{CLIENT_ID_PREFIX}{hex}")
}

/// Walk the tree once, isolating client subtrees.
pub fn detect(nodes: &[Node]) -> Detection {
    let mut clients = Vec::new();
    let mut path = Vec::new();
    let tree = rewrite(nodes, &mut path, &mut clients);
    log::debug!("detected {} client component(s)", clients.len());
    Detection { tree, clients }
}

fn rewrite(
    nodes: &[Node],
    path: &mut Vec<usize>,
    clients: &mut Vec<ClientComponentInfo>,
) -> Vec<Node> {
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            path.push(i);
            let out = match node {
                Node::Client(client) => {
                    let id = client_id(path, &client.source, client.key.as_deref());
                    clients.push(ClientComponentInfo {
                        id: id.clone(),
                        source: client.source.clone(),
                        props: client.props.clone(),
                        path: path.clone(),
                    });
                    // Nested client nodes belong to this subtree.
                    Node::Placeholder {
                        id,
                        source: client.source.clone(),
                    }
                }
                Node::Element(e) => Node::Element(Element {
                    tag: e.tag.clone(),
                    attrs: e.attrs.clone(),
                    children: rewrite(&e.children, path, clients),
                }),
                other => other.clone(),
            };
            path.pop();
            out
        })
        .collect()
}
