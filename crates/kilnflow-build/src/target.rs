//! ビルド対象イメージと依存グラフ
//!
//! `images.yaml` からイメージ定義を読み込み、parent 関係を DAG として保持します。

use crate::error::{BuildError, Result};
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// ビルド対象のイメージ
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageTarget {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl ImageTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
        }
    }

    pub fn with_parent(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent.into()),
        }
    }
}

/// イメージ名のバリデーション
///
/// 名前はイメージ名とログファイル名にそのまま使われるため
/// `^[a-z0-9][a-z0-9._-]*$` に限る。
fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(BuildError::InvalidManifest(
            "image name must not be empty".to_string(),
        ));
    };

    let valid_first = first.is_ascii_lowercase() || first.is_ascii_digit();
    let valid_rest = chars.all(|c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
    });
    if !valid_first || !valid_rest {
        return Err(BuildError::InvalidManifest(format!(
            "invalid image name '{}': use lowercase letters, digits, '.', '_' or '-'",
            name.escape_debug()
        )));
    }
    Ok(())
}

/// images.yaml の構造
#[derive(Debug, Default, Deserialize)]
struct TargetManifest {
    #[serde(default)]
    images: Vec<ImageTarget>,
}

/// イメージ依存グラフ
///
/// エッジは parent -> child の向き。構築時に重複・未知の parent・循環を検出する。
#[derive(Debug, Clone)]
pub struct TargetGraph {
    graph: DiGraph<ImageTarget, ()>,
    nodes: HashMap<String, NodeIndex>,
    order: Vec<NodeIndex>,
}

impl TargetGraph {
    pub fn new(targets: Vec<ImageTarget>) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();

        for target in targets {
            validate_name(&target.name)?;
            if nodes.contains_key(&target.name) {
                return Err(BuildError::DuplicateTarget(target.name));
            }
            let name = target.name.clone();
            let idx = graph.add_node(target);
            nodes.insert(name, idx);
        }

        let edges: Vec<(NodeIndex, NodeIndex)> = graph
            .node_indices()
            .filter_map(|idx| {
                let target = &graph[idx];
                target.parent.as_ref().map(|parent| (parent, idx))
            })
            .map(|(parent, idx)| match nodes.get(parent) {
                Some(&parent_idx) => Ok((parent_idx, idx)),
                None => Err(BuildError::UnknownParent {
                    target: graph[idx].name.clone(),
                    parent: parent.clone(),
                }),
            })
            .collect::<Result<_>>()?;

        for (parent_idx, child_idx) in edges {
            graph.add_edge(parent_idx, child_idx, ());
        }

        let order = toposort(&graph, None)
            .map_err(|cycle| BuildError::CycleDetected(graph[cycle.node_id()].name.clone()))?;

        Ok(Self {
            graph,
            nodes,
            order,
        })
    }

    /// YAML 文字列から読み込み
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let manifest: TargetManifest = serde_yaml::from_str(content)
            .map_err(|e| BuildError::InvalidManifest(e.to_string()))?;
        Self::new(manifest.images)
    }

    /// images.yaml を読み込み
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading targets manifest");
        Self::from_yaml_str(&content)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ImageTarget> {
        self.nodes.get(name).map(|&idx| &self.graph[idx])
    }

    /// トポロジカル順 (親が必ず子より先)
    pub fn order(&self) -> impl Iterator<Item = &ImageTarget> {
        self.order.iter().map(|&idx| &self.graph[idx])
    }

    /// 直接の子イメージ (トポロジカル順)
    pub fn children(&self, name: &str) -> Vec<&str> {
        let Some(&idx) = self.nodes.get(name) else {
            return Vec::new();
        };
        let children: HashSet<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        self.order
            .iter()
            .filter(|i| children.contains(i))
            .map(|&i| self.graph[i].name.as_str())
            .collect()
    }

    /// 直接の親イメージ数
    pub fn parent_count(&self, name: &str) -> usize {
        self.nodes
            .get(name)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count()
            })
            .unwrap_or(0)
    }

    /// 全ての子孫イメージ (自身を除く、トポロジカル順)
    pub fn descendants(&self, name: &str) -> Vec<&str> {
        let Some(&start) = self.nodes.get(name) else {
            return Vec::new();
        };

        let mut reached = HashSet::new();
        let mut bfs = Bfs::new(&self.graph, start);
        while let Some(idx) = bfs.next(&self.graph) {
            if idx != start {
                reached.insert(idx);
            }
        }

        self.order
            .iter()
            .filter(|i| reached.contains(i))
            .map(|&i| self.graph[i].name.as_str())
            .collect()
    }

    /// パターンに一致するイメージとその祖先のみを残す
    ///
    /// パターンが空の場合は全てを残す。
    pub fn filter(&self, patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            return Ok(self.clone());
        }

        let regexes = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| BuildError::InvalidPattern {
                    pattern: p.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut keep: HashSet<NodeIndex> = HashSet::new();
        for idx in self.graph.node_indices() {
            if !regexes.iter().any(|re| re.is_match(&self.graph[idx].name)) {
                continue;
            }
            let mut current = Some(idx);
            while let Some(i) = current {
                if !keep.insert(i) {
                    break;
                }
                current = self
                    .graph
                    .neighbors_directed(i, Direction::Incoming)
                    .next();
            }
        }

        let targets = self
            .order
            .iter()
            .filter(|i| keep.contains(i))
            .map(|&i| self.graph[i].clone())
            .collect();

        Self::new(targets)
    }
}
