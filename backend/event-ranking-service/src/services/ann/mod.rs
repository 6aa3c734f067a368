//! Angular random-projection forest
//!
//! Approximate nearest-neighbor index over unit-normalised vectors. Each tree
//! recursively splits the item set with a hyperplane through the origin whose
//! normal is the difference of two sampled items. Queries walk all trees with a
//! shared priority queue ordered by hyperplane margin, collect candidate items
//! until `n * num_trees` have been seen, then rank candidates by exact angular
//! distance.
//!
//! Distance is `sqrt(2 - 2 cos)`, so it lies in `[0, 2]`: identical direction
//! is 0 and opposite direction is 2.
//!
//! More trees means higher recall at the cost of build time and blob size.
//! A built forest is immutable; it is serialized with bincode for storage in
//! an index snapshot.

use crate::error::{AppError, Result};
use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

const FORMAT_VERSION: u32 = 1;

/// Items per leaf before a node is split
const LEAF_SIZE: usize = 16;

/// Recursion guard for degenerate inputs
const MAX_DEPTH: usize = 64;

/// Attempts at sampling two items with distinct directions
const SPLIT_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf(Vec<u32>),
    Split {
        normal: Vec<f32>,
        left: u32,
        right: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AngularForest {
    version: u32,
    dimension: usize,
    items: Vec<Vec<f32>>,
    nodes: Vec<Node>,
    roots: Vec<u32>,
}

impl AngularForest {
    /// Build a forest over the rows of `vectors`
    pub fn build<R: Rng>(
        vectors: &Array2<f32>,
        num_trees: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if vectors.nrows() == 0 {
            return Err(AppError::Build("cannot index zero vectors".to_string()));
        }
        if vectors.nrows() > u32::MAX as usize {
            return Err(AppError::Build(format!(
                "too many vectors for one index: {}",
                vectors.nrows()
            )));
        }

        let items: Vec<Vec<f32>> = vectors.rows().into_iter().map(|r| unit(r.to_vec())).collect();
        let mut nodes = Vec::new();
        let mut roots = Vec::with_capacity(num_trees.max(1));

        for _ in 0..num_trees.max(1) {
            let all: Vec<u32> = (0..items.len() as u32).collect();
            roots.push(build_node(&items, &mut nodes, all, 0, rng));
        }

        Ok(Self {
            version: FORMAT_VERSION,
            dimension: vectors.ncols(),
            items,
            nodes,
            roots,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn num_trees(&self) -> usize {
        self.roots.len()
    }

    /// Up to `n` nearest items to the item in `slot`, as `(slot, distance)`
    /// pairs in ascending distance. The query item itself is included.
    pub fn nearest_by_item(&self, slot: usize, n: usize) -> Result<Vec<(usize, f32)>> {
        let query = self
            .items
            .get(slot)
            .ok_or_else(|| AppError::NotFound(format!("slot {} not in index", slot)))?;

        if n == 0 {
            return Ok(Vec::new());
        }

        let search_k = n * self.roots.len();
        let mut heap: BinaryHeap<(Priority, u32)> = self
            .roots
            .iter()
            .map(|&root| (Priority(f32::INFINITY), root))
            .collect();
        let mut seen: HashSet<u32> = HashSet::new();

        while let Some((Priority(priority), node_idx)) = heap.pop() {
            if seen.len() >= search_k {
                break;
            }
            let node = self.nodes.get(node_idx as usize).ok_or_else(|| {
                AppError::Internal(format!("corrupt index: missing node {}", node_idx))
            })?;
            match node {
                Node::Leaf(members) => seen.extend(members.iter().copied()),
                Node::Split {
                    normal,
                    left,
                    right,
                } => {
                    let margin = dot(normal, query);
                    heap.push((Priority(priority.min(margin)), *right));
                    heap.push((Priority(priority.min(-margin)), *left));
                }
            }
        }

        let mut scored: Vec<(usize, f32)> = seen
            .into_iter()
            .filter_map(|idx| {
                let idx = idx as usize;
                self.items
                    .get(idx)
                    .map(|item| (idx, angular_distance(query, item)))
            })
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(n);

        Ok(scored)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let forest: Self = bincode::deserialize(bytes)?;
        if forest.version != FORMAT_VERSION {
            return Err(AppError::Serialization(format!(
                "unsupported index format version {}",
                forest.version
            )));
        }
        Ok(forest)
    }
}

fn build_node<R: Rng>(
    items: &[Vec<f32>],
    nodes: &mut Vec<Node>,
    mut members: Vec<u32>,
    depth: usize,
    rng: &mut R,
) -> u32 {
    if members.len() <= LEAF_SIZE || depth >= MAX_DEPTH {
        nodes.push(Node::Leaf(members));
        return (nodes.len() - 1) as u32;
    }

    let mut normal = sample_normal(items, &members, rng);

    let (mut left, mut right) = (Vec::new(), Vec::new());
    if let Some(normal) = &normal {
        for &idx in &members {
            let margin = dot(normal, &items[idx as usize]);
            let goes_right = if margin == 0.0 {
                rng.gen_bool(0.5)
            } else {
                margin > 0.0
            };
            if goes_right {
                right.push(idx);
            } else {
                left.push(idx);
            }
        }
    }

    // Degenerate split (identical vectors): random halving under a zero normal
    if left.is_empty() || right.is_empty() {
        normal = None;
        members.shuffle(rng);
        right = members.split_off(members.len() / 2);
        left = members;
    }

    let normal = normal.unwrap_or_else(|| vec![0.0; items[0].len()]);
    let left_idx = build_node(items, nodes, left, depth + 1, rng);
    let right_idx = build_node(items, nodes, right, depth + 1, rng);

    nodes.push(Node::Split {
        normal,
        left: left_idx,
        right: right_idx,
    });
    (nodes.len() - 1) as u32
}

fn sample_normal<R: Rng>(
    items: &[Vec<f32>],
    members: &[u32],
    rng: &mut R,
) -> Option<Vec<f32>> {
    for _ in 0..SPLIT_ATTEMPTS {
        let mut pair = members.choose_multiple(rng, 2);
        let (a, b) = match (pair.next(), pair.next()) {
            (Some(&a), Some(&b)) => (a as usize, b as usize),
            _ => return None,
        };
        let diff: Vec<f32> = items[a].iter().zip(&items[b]).map(|(x, y)| x - y).collect();
        if norm(&diff) > f32::EPSILON {
            return Some(unit(diff));
        }
    }
    None
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn unit(mut v: Vec<f32>) -> Vec<f32> {
    let n = norm(&v);
    if n > 0.0 {
        v.iter_mut().for_each(|x| *x /= n);
    }
    v
}

/// `sqrt(2 - 2 cos)` for unit vectors, clamped to `[0, 2]`
pub fn angular_distance(a: &[f32], b: &[f32]) -> f32 {
    (2.0 - 2.0 * dot(a, b)).max(0.0).sqrt().min(2.0)
}

#[derive(Debug, Clone, Copy)]
struct Priority(f32);

impl PartialEq for Priority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Priority {}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}
