//! Control-flow graph analysis over implementation blocks.
//!
//! Provides predecessor/successor relations, traversal orders, dominators,
//! back edges and natural loops. The graph is a snapshot: rebuild it after
//! every structural edit of the implementation.

use indexmap::IndexSet;
use std::collections::{HashMap, VecDeque};

use crate::program::Implementation;

type NodeId = usize;

/// Control-flow graph of an implementation, keyed by block label.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    labels: Vec<String>,
    index: HashMap<String, NodeId>,
    successors: Vec<Vec<NodeId>>,
    predecessors: Vec<Vec<NodeId>>,
    /// Immediate dominator of every reachable node except the entry.
    idom: HashMap<NodeId, NodeId>,
    rpo: Vec<NodeId>,
    post_order: Vec<NodeId>,
    /// Enter/exit numbers of reachable nodes in the dominator tree.
    dom_intervals: Vec<Option<(usize, usize)>>,
}

impl ControlFlowGraph {
    /// Builds the graph rooted at the first block. Goto targets naming no
    /// block are ignored.
    pub fn build(implementation: &Implementation) -> Self {
        let labels: Vec<String> = implementation
            .blocks
            .iter()
            .map(|b| b.label.clone())
            .collect();
        let index: HashMap<String, NodeId> = labels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.clone(), i))
            .collect();

        let mut successors = vec![Vec::new(); labels.len()];
        let mut predecessors = vec![Vec::new(); labels.len()];
        for (id, block) in implementation.blocks.iter().enumerate() {
            for target in block.successors() {
                if let Some(&succ) = index.get(target) {
                    if !successors[id].contains(&succ) {
                        successors[id].push(succ);
                        predecessors[succ].push(id);
                    }
                }
            }
        }

        let mut cfg = ControlFlowGraph {
            labels,
            index,
            successors,
            predecessors,
            idom: HashMap::new(),
            rpo: Vec::new(),
            post_order: Vec::new(),
            dom_intervals: Vec::new(),
        };
        cfg.compute_post_order();
        cfg.compute_dominators();
        cfg.compute_dominator_intervals();
        cfg
    }

    fn compute_post_order(&mut self) {
        if self.labels.is_empty() {
            return;
        }
        let mut visited = vec![false; self.labels.len()];
        let mut post_order = Vec::with_capacity(self.labels.len());
        // (node, index of the next successor to visit)
        let mut stack: Vec<(NodeId, usize)> = vec![(0, 0)];
        visited[0] = true;
        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            match self.successors[node].get(next) {
                Some(&succ) => {
                    top.1 += 1;
                    if !visited[succ] {
                        visited[succ] = true;
                        stack.push((succ, 0));
                    }
                }
                None => {
                    post_order.push(node);
                    stack.pop();
                }
            }
        }
        self.rpo = post_order.iter().rev().copied().collect();
        self.post_order = post_order;
    }

    fn compute_dominators(&mut self) {
        if self.labels.is_empty() {
            return;
        }
        let entry = 0;
        let rpo_index: HashMap<NodeId, usize> =
            self.rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();

        let mut doms: HashMap<NodeId, NodeId> = HashMap::new();
        doms.insert(entry, entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &node in &self.rpo {
                if node == entry {
                    continue;
                }
                let preds = &self.predecessors[node];
                let Some(mut new_idom) = preds.iter().copied().find(|p| doms.contains_key(p)) else {
                    continue;
                };
                for &pred in preds {
                    if pred != new_idom && doms.contains_key(&pred) {
                        new_idom = intersect(pred, new_idom, &doms, &rpo_index);
                    }
                }
                if doms.get(&node) != Some(&new_idom) {
                    doms.insert(node, new_idom);
                    changed = true;
                }
            }
        }

        doms.remove(&entry);
        self.idom = doms;
    }

    /// Numbers the dominator tree so that `a` dominates `b` iff the
    /// interval of `b` nests inside the interval of `a`.
    fn compute_dominator_intervals(&mut self) {
        if self.labels.is_empty() {
            return;
        }
        let mut children = vec![Vec::new(); self.labels.len()];
        for &node in &self.rpo {
            if let Some(&dom) = self.idom.get(&node) {
                children[dom].push(node);
            }
        }

        let mut intervals = vec![None; self.labels.len()];
        let mut enter = vec![0; self.labels.len()];
        let mut clock = 0;
        let mut stack: Vec<(NodeId, usize)> = vec![(0, 0)];
        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            if next == 0 {
                enter[node] = clock;
                clock += 1;
            }
            match children[node].get(next) {
                Some(&child) => {
                    top.1 += 1;
                    stack.push((child, 0));
                }
                None => {
                    intervals[node] = Some((enter[node], clock));
                    clock += 1;
                    stack.pop();
                }
            }
        }
        self.dom_intervals = intervals;
    }

    fn id(&self, label: &str) -> Option<NodeId> {
        self.index.get(label).copied()
    }

    fn label(&self, id: NodeId) -> &str {
        &self.labels[id]
    }

    pub fn entry(&self) -> Option<&str> {
        self.labels.first().map(String::as_str)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.index.contains_key(label)
    }

    pub fn successors(&self, label: &str) -> Vec<&str> {
        self.id(label)
            .map(|id| self.successors[id].iter().map(|&s| self.label(s)).collect())
            .unwrap_or_default()
    }

    pub fn predecessors(&self, label: &str) -> Vec<&str> {
        self.id(label)
            .map(|id| self.predecessors[id].iter().map(|&p| self.label(p)).collect())
            .unwrap_or_default()
    }

    pub fn reverse_post_order(&self) -> Vec<&str> {
        self.rpo.iter().map(|&id| self.label(id)).collect()
    }

    pub fn post_order(&self) -> Vec<&str> {
        self.post_order.iter().map(|&id| self.label(id)).collect()
    }

    /// Whether `label` is reachable from the entry.
    pub fn is_reachable(&self, label: &str) -> bool {
        self.id(label)
            .is_some_and(|id| id == 0 || self.idom.contains_key(&id))
    }

    pub fn immediate_dominator(&self, label: &str) -> Option<&str> {
        let id = self.id(label)?;
        self.idom.get(&id).map(|&d| self.label(d))
    }

    /// Whether `a` dominates `b`. Every block dominates itself.
    pub fn dominates(&self, a: &str, b: &str) -> bool {
        match (self.id(a), self.id(b)) {
            (Some(a), Some(b)) => self.dominates_id(a, b),
            _ => false,
        }
    }

    fn dominates_id(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return true;
        }
        match (self.dom_intervals[a], self.dom_intervals[b]) {
            (Some((a_in, a_out)), Some((b_in, b_out))) => a_in <= b_in && b_out <= a_out,
            _ => false,
        }
    }

    fn back_edge_ids(&self) -> Vec<(NodeId, NodeId)> {
        let mut edges = Vec::new();
        for &node in &self.rpo {
            for &succ in &self.successors[node] {
                if self.dominates_id(succ, node) {
                    edges.push((node, succ));
                }
            }
        }
        edges
    }

    /// Back edges `(source, header)`: edges whose target dominates their source.
    pub fn back_edges(&self) -> Vec<(&str, &str)> {
        self.back_edge_ids()
            .into_iter()
            .map(|(s, h)| (self.label(s), self.label(h)))
            .collect()
    }

    /// Sources of the back edges into `header`.
    pub fn back_edge_sources(&self, header: &str) -> Vec<&str> {
        let Some(h) = self.id(header) else {
            return Vec::new();
        };
        self.back_edge_ids()
            .into_iter()
            .filter(|&(_, target)| target == h)
            .map(|(s, _)| self.label(s))
            .collect()
    }

    /// Headers of natural loops, in reverse post order.
    pub fn loop_headers(&self) -> IndexSet<String> {
        let headers: IndexSet<NodeId> = self.back_edge_ids().into_iter().map(|(_, h)| h).collect();
        self.rpo
            .iter()
            .filter(|id| headers.contains(*id))
            .map(|&id| self.labels[id].clone())
            .collect()
    }

    /// Natural loop of the back edge `source -> header`: the header plus every
    /// block that reaches `source` without passing through the header.
    pub fn natural_loop(&self, header: &str, source: &str) -> IndexSet<String> {
        let (Some(h), Some(s)) = (self.id(header), self.id(source)) else {
            return IndexSet::new();
        };
        let mut members: IndexSet<NodeId> = IndexSet::new();
        members.insert(h);

        let mut worklist = VecDeque::new();
        if members.insert(s) {
            worklist.push_back(s);
        }
        while let Some(node) = worklist.pop_front() {
            for &pred in &self.predecessors[node] {
                if members.insert(pred) {
                    worklist.push_back(pred);
                }
            }
        }
        members.into_iter().map(|id| self.labels[id].clone()).collect()
    }

    /// Union of the natural loops of every back edge into any of `headers`.
    pub fn blocks_in_loops_of<'a>(&self, headers: impl IntoIterator<Item = &'a str>) -> IndexSet<String> {
        let back_edges = self.back_edges();
        let mut blocks = IndexSet::new();
        for header in headers {
            for &(source, _) in back_edges.iter().filter(|&&(_, h)| h == header) {
                blocks.extend(self.natural_loop(header, source));
            }
        }
        blocks
    }

    /// A graph is reducible iff removing its back edges leaves the reachable
    /// part acyclic.
    pub fn is_reducible(&self) -> bool {
        let back_edges: IndexSet<(NodeId, NodeId)> = self.back_edge_ids().into_iter().collect();
        let reachable: Vec<bool> = (0..self.labels.len())
            .map(|id| id == 0 || self.idom.contains_key(&id))
            .collect();

        let mut in_degree = vec![0usize; self.labels.len()];
        for node in 0..self.labels.len() {
            if !reachable[node] {
                continue;
            }
            for &succ in &self.successors[node] {
                if !back_edges.contains(&(node, succ)) {
                    in_degree[succ] += 1;
                }
            }
        }

        let mut ready: Vec<NodeId> = (0..self.labels.len())
            .filter(|&n| reachable[n] && in_degree[n] == 0)
            .collect();
        let mut visited = 0;
        while let Some(node) = ready.pop() {
            visited += 1;
            for &succ in &self.successors[node] {
                if back_edges.contains(&(node, succ)) {
                    continue;
                }
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    ready.push(succ);
                }
            }
        }
        visited == reachable.iter().filter(|&&r| r).count()
    }
}

fn intersect(
    b1: NodeId,
    b2: NodeId,
    doms: &HashMap<NodeId, NodeId>,
    rpo_index: &HashMap<NodeId, usize>,
) -> NodeId {
    let get_idx = |b: NodeId| rpo_index.get(&b).copied().unwrap_or(usize::MAX);

    let mut finger1 = b1;
    let mut finger2 = b2;
    while finger1 != finger2 {
        while get_idx(finger1) > get_idx(finger2) {
            match doms.get(&finger1) {
                Some(&dom) if dom != finger1 => finger1 = dom,
                _ => return finger2,
            }
        }
        while get_idx(finger2) > get_idx(finger1) {
            match doms.get(&finger2) {
                Some(&dom) if dom != finger2 => finger2 = dom,
                _ => return finger1,
            }
        }
    }
    finger1
}

/// Removes blocks unreachable from the entry, keeping the order of the rest.
/// Returns the labels of the removed blocks.
pub fn prune_unreachable_blocks(implementation: &mut Implementation) -> Vec<String> {
    let cfg = ControlFlowGraph::build(implementation);
    let mut removed = Vec::new();
    implementation.blocks.retain(|b| {
        let keep = cfg.is_reachable(&b.label);
        if !keep {
            removed.push(b.label.clone());
        }
        keep
    });
    removed
}
