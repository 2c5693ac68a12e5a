//! Execution-order resolution for body elements.
//!
//! Generation needs a deterministic order for a body's declarations, calls,
//! scatters, and conditionals. Each element gets a dependency depth: 0 when
//! it reads nothing from the rest of the set, otherwise one more than the
//! deepest element it depends on. The input is then stably sorted by depth,
//! so ties keep their insertion order and the result is reproducible.
//!
//! An element X depends on Y when any parameter in X's subtree has an
//! inbound connection whose source lives in Y's subtree, or when X is a
//! call listing Y's reference in its `after` clause. A plain parameter
//! passed as an element depends through its own inbound connections.
//!
//! Cycles do not abort: a depth-first visit keeps an in-progress stack, and
//! an element found on that stack scores 0 instead of recursing. Malformed
//! (cyclic) input therefore still yields a total order; reporting the cycle
//! is validation's job, not this module's.

use std::collections::HashMap;

use super::{Document, EntityId};

impl Document {
    /// Orders a set of body elements by ascending dependency depth, ties by
    /// insertion order. Always a permutation of the input, even for cyclic
    /// dependency graphs. Stale ids sort as independent elements.
    pub fn execution_order(&self, elements: &[EntityId]) -> Vec<EntityId> {
        let dependencies = self.intra_set_dependencies(elements);
        let mut depths: HashMap<EntityId, usize> = HashMap::new();
        let mut visiting: Vec<EntityId> = Vec::new();
        for element in elements {
            self.dependency_depth(*element, &dependencies, &mut depths, &mut visiting);
        }
        let mut ordered = elements.to_vec();
        ordered.sort_by_key(|element| depths.get(element).copied().unwrap_or(0));
        ordered
    }

    fn dependency_depth(
        &self,
        element: EntityId,
        dependencies: &HashMap<EntityId, Vec<EntityId>>,
        depths: &mut HashMap<EntityId, usize>,
        visiting: &mut Vec<EntityId>,
    ) -> usize {
        // in-progress element: break the cycle at depth 0
        if visiting.contains(&element) {
            return 0;
        }
        if let Some(depth) = depths.get(&element) {
            return *depth;
        }
        visiting.push(element);
        let depth = dependencies
            .get(&element)
            .into_iter()
            .flatten()
            .map(|dependency| 1 + self.dependency_depth(*dependency, dependencies, depths, visiting))
            .max()
            .unwrap_or(0);
        visiting.pop();
        depths.insert(element, depth);
        depth
    }

    /// For each element, the other elements of the set it depends on, in a
    /// deterministic order.
    fn intra_set_dependencies(&self, elements: &[EntityId]) -> HashMap<EntityId, Vec<EntityId>> {
        let mut out: HashMap<EntityId, Vec<EntityId>> = HashMap::new();
        for element in elements {
            let mut dependencies: Vec<EntityId> = Vec::new();
            for parameter in self.subtree_parameters(*element) {
                for source in self.inbound(parameter) {
                    if let Some(owner) = self.element_owning(elements, source) {
                        if owner != *element && !dependencies.contains(&owner) {
                            dependencies.push(owner);
                        }
                    }
                }
            }
            for after in self.call_after(*element) {
                if elements.contains(&after) && after != *element && !dependencies.contains(&after)
                {
                    dependencies.push(after);
                }
            }
            out.insert(*element, dependencies);
        }
        out
    }

    /// Parameters in an element's subtree, the element itself included when
    /// it is one.
    fn subtree_parameters(&self, element: EntityId) -> Vec<EntityId> {
        self.subtree(element)
            .into_iter()
            .filter(|id| {
                self.get(*id)
                    .is_some_and(|entity| entity.kind().is_parameter())
            })
            .collect()
    }

    /// The element of the set a parameter belongs to: the parameter itself
    /// when listed, otherwise its nearest listed ancestor.
    fn element_owning(&self, elements: &[EntityId], parameter: EntityId) -> Option<EntityId> {
        if elements.contains(&parameter) {
            return Some(parameter);
        }
        self.ancestors(parameter)
            .into_iter()
            .find(|ancestor| elements.contains(ancestor))
    }
}
