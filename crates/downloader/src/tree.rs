// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::path::PathBuf;

use strum_macros::{Display, EnumString};

use crate::client::NodeInfo;

/// Kind of a remote filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum NodeKind {
    #[strum(to_string = "file", serialize = "reg", serialize = "regular")]
    File,
    #[strum(to_string = "directory", serialize = "dir")]
    Directory,
}

/// Stable index of a node inside its [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("#{_0}")]
pub struct NodeId(usize);

/// One remote filesystem entry.
///
/// The parent link and child list are indices into the owning [`Tree`], so a
/// node never owns its relatives.
#[derive(Debug, Clone)]
pub struct Node {
    pub identifier: String,
    /// Name as reported by the service, unsanitized.
    pub name:       String,
    pub kind:       NodeKind,
    /// Byte size for files; not used for directories.
    pub size:       Option<u64>,
    pub parent:     Option<NodeId>,
    /// Children in listing order. Always empty for files.
    pub children:   Vec<NodeId>,
}

impl Node {
    pub const fn is_dir(&self) -> bool { matches!(self.kind, NodeKind::Directory) }

    /// Transfer size of a file; zero for directories.
    pub fn file_size(&self) -> u64 {
        match self.kind {
            NodeKind::File => self.size.unwrap_or(0),
            NodeKind::Directory => 0,
        }
    }
}

/// Arena holding a fully resolved remote tree.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Start a tree whose root is described by `root`.
    #[must_use]
    pub fn new(root: NodeInfo) -> Self {
        Self {
            nodes: vec![Self::node_from(root, None)],
        }
    }

    pub const fn root(&self) -> NodeId { NodeId(0) }

    pub fn get(&self, id: NodeId) -> &Node { &self.nodes[id.0] }

    pub fn len(&self) -> usize { self.nodes.len() }

    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    /// Append `info` as the last child of `parent`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is a file.
    pub fn add_child(&mut self, parent: NodeId, info: NodeInfo) -> NodeId {
        assert!(
            self.get(parent).is_dir(),
            "file node {parent} cannot have children"
        );
        let id = NodeId(self.nodes.len());
        self.nodes.push(Self::node_from(info, Some(parent)));
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &Node> + '_ {
        self.get(id).children.iter().map(|child| self.get(*child))
    }

    /// Node ids in depth-first pre-order: every directory precedes its
    /// descendants and siblings keep listing order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.get(id).children.iter().rev().copied());
        }
        order
    }

    /// Local path of `id` relative to the output directory, built from
    /// sanitized names from the root down.
    pub fn relative_path(&self, id: NodeId) -> PathBuf {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.get(node_id);
            names.push(sanitize_name(&node.name));
            current = node.parent;
        }
        names.iter().rev().collect()
    }

    /// `/`-joined remote names of `id`, for diagnostics.
    pub fn display_path(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.get(node_id);
            names.push(node.name.as_str());
            current = node.parent;
        }
        names.reverse();
        names.join("/")
    }

    pub fn file_count(&self) -> usize { self.nodes.iter().filter(|n| !n.is_dir()).count() }

    pub fn total_file_bytes(&self) -> u64 { self.nodes.iter().map(Node::file_size).sum() }

    fn node_from(info: NodeInfo, parent: Option<NodeId>) -> Node {
        Node {
            identifier: info.identifier,
            name: info.name,
            kind: info.kind,
            size: info.size,
            parent,
            children: Vec::new(),
        }
    }
}

/// Make a remote name safe to use as a single local path component.
///
/// Separators and NUL become `_`; names that would escape or alias the
/// parent (`""`, `.`, `..`) are replaced by `_`.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            other => other,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn info(identifier: &str, name: &str, kind: NodeKind, size: Option<u64>) -> NodeInfo {
        NodeInfo {
            identifier: identifier.to_string(),
            name: name.to_string(),
            kind,
            size,
        }
    }

    /// space/
    ///   A/
    ///     B/
    ///       file.txt
    ///   top.bin
    fn sample_tree() -> Tree {
        let mut tree = Tree::new(info("root", "space", NodeKind::Directory, None));
        let a = tree.add_child(tree.root(), info("a", "A", NodeKind::Directory, None));
        tree.add_child(tree.root(), info("top", "top.bin", NodeKind::File, Some(7)));
        let b = tree.add_child(a, info("b", "B", NodeKind::Directory, None));
        tree.add_child(b, info("f", "file.txt", NodeKind::File, Some(5)));
        tree
    }

    #[test]
    fn kind_parses_service_spellings() {
        assert_eq!("reg".parse::<NodeKind>().unwrap(), NodeKind::File);
        assert_eq!("REG".parse::<NodeKind>().unwrap(), NodeKind::File);
        assert_eq!("dir".parse::<NodeKind>().unwrap(), NodeKind::Directory);
        assert_eq!("Directory".parse::<NodeKind>().unwrap(), NodeKind::Directory);
        assert!("symlnk".parse::<NodeKind>().is_err());
        assert_eq!(NodeKind::File.to_string(), "file");
    }

    #[test]
    fn preorder_puts_directories_before_descendants() {
        let tree = sample_tree();
        let names: Vec<_> = tree
            .preorder()
            .into_iter()
            .map(|id| tree.get(id).name.clone())
            .collect();
        assert_eq!(names, ["space", "A", "B", "file.txt", "top.bin"]);
    }

    #[test]
    fn paths_follow_parent_links() {
        let tree = sample_tree();
        let file = tree
            .preorder()
            .into_iter()
            .find(|id| tree.get(*id).name == "file.txt")
            .unwrap();
        assert_eq!(
            tree.relative_path(file),
            Path::new("space").join("A").join("B").join("file.txt")
        );
        assert_eq!(tree.display_path(file), "space/A/B/file.txt");
        assert_eq!(tree.get(tree.get(file).parent.unwrap()).name, "B");
    }

    #[test]
    fn counts_files_and_bytes() {
        let tree = sample_tree();
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.file_count(), 2);
        assert_eq!(tree.total_file_bytes(), 12);
        assert_eq!(tree.children(tree.root()).count(), 2);
    }

    #[test]
    #[should_panic(expected = "cannot have children")]
    fn files_reject_children() {
        let mut tree = Tree::new(info("f", "f.txt", NodeKind::File, Some(1)));
        tree.add_child(tree.root(), info("g", "g.txt", NodeKind::File, Some(1)));
    }

    #[test]
    fn sanitizes_dangerous_names() {
        assert_eq!(sanitize_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_name("a/b"), "a_b");
        assert_eq!(sanitize_name("..\\x"), ".._x");
        assert_eq!(sanitize_name(".."), "_");
        assert_eq!(sanitize_name("."), "_");
        assert_eq!(sanitize_name(""), "_");
    }
}
