//! Binding of decay-pattern positions to the nodes of a concrete decay tree.

use std::collections::BTreeMap;

use crate::event::{CandidateStore, Event};
use crate::particles::{Arrow, DecayNode, ParticleId, ParticleTable};
use crate::types::{CandidateId, McKey};

use super::TupleError;

/// Position in a decay pattern: daughter indices from the head.
pub type TreePath = Vec<usize>;

/// A decay tree the matcher can walk.
pub trait TreeView {
    type Node: Copy + Eq;

    fn particle(&self, node: Self::Node) -> ParticleId;
    fn children(&self, node: Self::Node) -> Vec<Self::Node>;
}

impl TreeView for CandidateStore {
    type Node = CandidateId;

    fn particle(&self, node: CandidateId) -> ParticleId {
        self.get(node).id
    }

    fn children(&self, node: CandidateId) -> Vec<CandidateId> {
        self.get(node).daughters.clone()
    }
}

/// Generated decay trees of one event.
pub struct McTree<'a>(pub &'a Event);

impl<'a> TreeView for McTree<'a> {
    type Node = McKey;

    fn particle(&self, node: McKey) -> ParticleId {
        self.0
            .mc_particle(node)
            .map(|p| p.id)
            .unwrap_or(ParticleId(0))
    }

    fn children(&self, node: McKey) -> Vec<McKey> {
        self.0
            .mc_particle(node)
            .map(|p| p.daughters.clone())
            .unwrap_or_default()
    }
}

const PHOTON: ParticleId = ParticleId(22);

/// A decay pattern with particle names resolved.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    id: ParticleId,
    /// Extra photons among the daughters are tolerated (`=>`).
    radiative: bool,
    daughters: Vec<CompiledPattern>,
}

impl CompiledPattern {
    pub fn compile(node: &DecayNode, table: &ParticleTable) -> Result<Self, TupleError> {
        let id = table
            .by_name(&node.particle)
            .map(|p| p.id)
            .ok_or_else(|| TupleError::UnknownParticle(node.particle.clone()))?;
        Ok(Self {
            id,
            radiative: node.arrow == Some(Arrow::Generated),
            daughters: node
                .daughters
                .iter()
                .map(|d| Self::compile(d, table))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn head(&self) -> ParticleId {
        self.id
    }

    /// Maps every pattern position to a tree node, or `None` if the tree
    /// does not have the pattern's shape. Daughters may appear in any order.
    pub fn bind<V: TreeView>(&self, view: &V, head: V::Node) -> Option<BTreeMap<TreePath, V::Node>> {
        let mut out = BTreeMap::new();
        self.bind_into(view, head, &mut Vec::new(), &mut out)
            .then_some(out)
    }

    fn bind_into<V: TreeView>(
        &self,
        view: &V,
        node: V::Node,
        path: &mut TreePath,
        out: &mut BTreeMap<TreePath, V::Node>,
    ) -> bool {
        if view.particle(node) != self.id {
            return false;
        }
        out.insert(path.clone(), node);
        if self.daughters.is_empty() {
            return true;
        }
        let children = view.children(node);
        let extra_allowed = if self.radiative {
            children.iter().filter(|&&c| view.particle(c) == PHOTON).count()
        } else {
            0
        };
        if children.len() < self.daughters.len()
            || children.len() > self.daughters.len() + extra_allowed
        {
            return false;
        }
        let mut used = vec![false; children.len()];
        self.assign(view, 0, &children, &mut used, path, out)
    }

    // Backtracking assignment of pattern daughters to tree children.
    fn assign<V: TreeView>(
        &self,
        view: &V,
        k: usize,
        children: &[V::Node],
        used: &mut [bool],
        path: &mut TreePath,
        out: &mut BTreeMap<TreePath, V::Node>,
    ) -> bool {
        if k == self.daughters.len() {
            // leftovers may only be photons
            return children
                .iter()
                .zip(used.iter())
                .all(|(&c, &u)| u || view.particle(c) == PHOTON);
        }
        for (i, &child) in children.iter().enumerate() {
            if used[i] {
                continue;
            }
            let snapshot = out.clone();
            path.push(k);
            let ok = self.daughters[k].bind_into(view, child, path, out);
            path.pop();
            if ok {
                used[i] = true;
                if self.assign(view, k + 1, children, used, path, out) {
                    return true;
                }
                used[i] = false;
            }
            *out = snapshot;
        }
        false
    }
}

/// Binds against each pattern in turn (explicit pattern first, then its
/// charge conjugate).
pub fn bind_any<V: TreeView>(
    patterns: &[CompiledPattern],
    view: &V,
    head: V::Node,
) -> Option<BTreeMap<TreePath, V::Node>> {
    patterns.iter().find_map(|p| p.bind(view, head))
}
