use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use weft_config::{TriggerPolicy, WorkflowDefinition};

use crate::error::DefinitionError;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
  White,
  Gray,
  Black,
}

/// Validated graph structure for traversal and scheduling.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Node ids in definition order.
  nodes: Vec<String>,
  /// Node types in definition order.
  node_types: Vec<String>,
  /// Position of each node in the definition.
  index: HashMap<String, usize>,
  /// Adjacency list: node_id -> downstream node_ids, in edge order.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: node_id -> upstream node_ids, in edge order.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Nodes with no incoming edges, in definition order.
  entry_points: Vec<String>,
  /// Nodes with multiple incoming edges (join points).
  join_points: HashSet<String>,
  /// Deterministic topological order.
  order: Vec<String>,
}

impl Graph {
  /// Validate a definition and build its graph.
  ///
  /// Running this twice on the same definition yields identical graphs.
  pub fn build(definition: &WorkflowDefinition) -> Result<Self, DefinitionError> {
    if definition.nodes.is_empty() {
      return Err(DefinitionError::Empty);
    }

    let mut index: HashMap<String, usize> = HashMap::with_capacity(definition.nodes.len());
    let mut nodes = Vec::with_capacity(definition.nodes.len());
    let mut node_types = Vec::with_capacity(definition.nodes.len());
    for (i, node) in definition.nodes.iter().enumerate() {
      if index.insert(node.id.clone(), i).is_some() {
        return Err(DefinitionError::DuplicateNode(node.id.clone()));
      }
      nodes.push(node.id.clone());
      node_types.push(node.node_type.clone());
    }

    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();
    for node_id in &nodes {
      adjacency.entry(node_id.clone()).or_default();
      reverse_adjacency.entry(node_id.clone()).or_default();
    }

    let mut seen_edges: HashSet<(&str, &str)> = HashSet::new();
    for edge in &definition.edges {
      for endpoint in [&edge.source, &edge.target] {
        if !index.contains_key(endpoint) {
          return Err(DefinitionError::UnknownNode {
            source_node: edge.source.clone(),
            target_node: edge.target.clone(),
            unknown: endpoint.clone(),
          });
        }
      }
      // Parallel edges between the same pair (different handles) are one dependency.
      if !seen_edges.insert((edge.source.as_str(), edge.target.as_str())) {
        continue;
      }
      adjacency
        .entry(edge.source.clone())
        .or_default()
        .push(edge.target.clone());
      reverse_adjacency
        .entry(edge.target.clone())
        .or_default()
        .push(edge.source.clone());
    }

    let mut graph = Self {
      entry_points: Vec::new(),
      join_points: HashSet::new(),
      order: Vec::new(),
      nodes,
      node_types,
      index,
      adjacency,
      reverse_adjacency,
    };

    graph.detect_cycle()?;
    graph.order = graph.topological_sort();

    graph.entry_points = graph
      .nodes
      .iter()
      .filter(|id| graph.upstream(id).is_empty())
      .cloned()
      .collect();

    graph.join_points = graph
      .reverse_adjacency
      .iter()
      .filter(|(_, incoming)| incoming.len() > 1)
      .map(|(id, _)| id.clone())
      .collect();

    if graph.entry_points.is_empty() {
      return Err(DefinitionError::NoEntryPoints);
    }

    if definition.trigger_policy == TriggerPolicy::Single && graph.entry_points.len() != 1 {
      return Err(DefinitionError::EntryPointCount {
        found: graph.entry_points.clone(),
      });
    }

    Ok(graph)
  }

  /// Check entry points against component kinds.
  ///
  /// Every node without incoming edges must be a trigger, and no trigger may
  /// have incoming edges. `is_trigger` answers for a node type.
  pub fn check_entry_kinds(
    &self,
    is_trigger: impl Fn(&str) -> bool,
  ) -> Result<(), DefinitionError> {
    for (node_id, node_type) in self.nodes.iter().zip(&self.node_types) {
      let has_incoming = !self.upstream(node_id).is_empty();
      let trigger = is_trigger(node_type);
      if trigger && has_incoming {
        return Err(DefinitionError::TriggerHasIncoming {
          node_id: node_id.clone(),
        });
      }
      if !trigger && !has_incoming {
        return Err(DefinitionError::OrphanNode {
          node_id: node_id.clone(),
          node_type: node_type.clone(),
        });
      }
    }
    Ok(())
  }

  /// Three-color DFS over the nodes in definition order.
  fn detect_cycle(&self) -> Result<(), DefinitionError> {
    let mut color = vec![Color::White; self.nodes.len()];

    for start in 0..self.nodes.len() {
      if color[start] != Color::White {
        continue;
      }

      // Stack of (node index, next child position).
      let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
      color[start] = Color::Gray;

      while let Some(frame) = stack.last_mut() {
        let (current, child_pos) = *frame;
        let children = self.downstream(&self.nodes[current]);

        if child_pos >= children.len() {
          color[current] = Color::Black;
          stack.pop();
          continue;
        }
        frame.1 += 1;

        let child = self.index[&children[child_pos]];
        match color[child] {
          Color::White => {
            color[child] = Color::Gray;
            stack.push((child, 0));
          }
          Color::Gray => {
            let from = stack
              .iter()
              .position(|(idx, _)| *idx == child)
              .unwrap_or(0);
            let mut path: Vec<String> = stack[from..]
              .iter()
              .map(|(idx, _)| self.nodes[*idx].clone())
              .collect();
            path.push(self.nodes[child].clone());
            return Err(DefinitionError::Cycle { path });
          }
          Color::Black => {}
        }
      }
    }

    Ok(())
  }

  /// Kahn's algorithm; among ready nodes the earliest in the definition wins.
  fn topological_sort(&self) -> Vec<String> {
    let mut in_degree: Vec<usize> = self
      .nodes
      .iter()
      .map(|id| self.upstream(id).len())
      .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
      .iter()
      .enumerate()
      .filter(|(_, degree)| **degree == 0)
      .map(|(i, _)| Reverse(i))
      .collect();

    let mut order = Vec::with_capacity(self.nodes.len());
    while let Some(Reverse(i)) = ready.pop() {
      let node_id = &self.nodes[i];
      order.push(node_id.clone());
      for child in self.downstream(node_id) {
        let c = self.index[child];
        in_degree[c] -= 1;
        if in_degree[c] == 0 {
          ready.push(Reverse(c));
        }
      }
    }

    order
  }

  /// Deterministic topological order of all nodes.
  pub fn topological_order(&self) -> &[String] {
    &self.order
  }

  /// Get entry points (nodes with no incoming edges).
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Get downstream nodes for a given node.
  pub fn downstream(&self, node_id: &str) -> &[String] {
    self
      .adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Get upstream nodes for a given node.
  pub fn upstream(&self, node_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Forward adjacency map: node -> successor ids.
  pub fn adjacency(&self) -> &HashMap<String, Vec<String>> {
    &self.adjacency
  }

  /// Reverse adjacency map: node -> predecessor ids.
  pub fn reverse_adjacency(&self) -> &HashMap<String, Vec<String>> {
    &self.reverse_adjacency
  }

  /// Check if a node is a join point (has multiple incoming edges).
  pub fn is_join_point(&self, node_id: &str) -> bool {
    self.join_points.contains(node_id)
  }

  /// Position of a node in the definition.
  pub fn position(&self, node_id: &str) -> Option<usize> {
    self.index.get(node_id).copied()
  }

  pub fn contains(&self, node_id: &str) -> bool {
    self.index.contains_key(node_id)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// All transitive descendants of a node, in topological order.
  pub fn descendants(&self, node_id: &str) -> Vec<String> {
    let mut reached: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = self.downstream(node_id).iter().map(|s| s.as_str()).collect();
    while let Some(current) = stack.pop() {
      if reached.insert(current) {
        stack.extend(self.downstream(current).iter().map(|s| s.as_str()));
      }
    }
    self
      .order
      .iter()
      .filter(|id| reached.contains(id.as_str()))
      .cloned()
      .collect()
  }
}
