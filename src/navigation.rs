use log::debug;
use ordered_float::OrderedFloat;
use petgraph::Direction;
use petgraph::graphmap::DiGraphMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::road_network::Way;

/// A named group of ways, decomposed into branches of way ids
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Road {
    pub name: String,
    pub branches: Vec<Vec<i32>>,
}

/// A simple directed path through ways, with its summed length in meters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Branch {
    pub ids: Vec<i32>,
    pub length: f64,
}

/// Directed adjacency between ways that share an end node.
///
/// Ties between several candidate ways are always broken by the lowest way
/// id, so results do not depend on the order ways were loaded in.
pub struct NavigationTable {
    ways: BTreeMap<i32, Way>,
    graph: DiGraphMap<i32, ()>,
}

impl NavigationTable {
    /// Build adjacency by comparing every pair of ways: B follows A when
    /// `A.node_end == B.node_start`
    pub fn new(ways: impl IntoIterator<Item = Way>) -> Self {
        let ways: BTreeMap<i32, Way> = ways.into_iter().map(|way| (way.id, way)).collect();
        let mut graph = DiGraphMap::with_capacity(ways.len(), ways.len());

        for id in ways.keys() {
            graph.add_node(*id);
        }

        for a in ways.values() {
            for b in ways.values() {
                if a.node_end == b.node_start {
                    graph.add_edge(a.id, b.id, ());
                }
            }
        }

        debug!(
            "Navigation table built with {} ways and {} connections",
            graph.node_count(),
            graph.edge_count()
        );

        Self { ways, graph }
    }

    pub fn way_ids(&self) -> Vec<i32> {
        self.ways.keys().copied().collect()
    }

    /// Successors of a way, lowest id first
    pub fn next(&self, id: i32) -> Vec<i32> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Predecessors of a way, lowest id first
    pub fn prev(&self, id: i32) -> Vec<i32> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: i32, direction: Direction) -> Vec<i32> {
        let mut ids: Vec<i32> = self.graph.neighbors_directed(id, direction).collect();
        ids.sort_unstable();
        ids
    }

    fn length_of(&self, id: i32) -> f64 {
        self.ways.get(&id).map_or(0.0, |way| way.length)
    }

    /// Longest path starting at `start`, by total way length.
    ///
    /// At every way the successor whose remaining path is longest wins. Only
    /// the current chain of ancestors is excluded from the search, so two
    /// sibling branches may both pass through the same way.
    pub fn longest_branch(&self, start: i32) -> Branch {
        let mut ancestors = HashSet::new();
        self.longest_branch_from(start, &mut ancestors)
    }

    fn longest_branch_from(&self, start: i32, ancestors: &mut HashSet<i32>) -> Branch {
        ancestors.insert(start);

        let mut candidates = Vec::new();
        for next in self.next(start) {
            if ancestors.contains(&next) {
                continue;
            }
            candidates.push(self.longest_branch_from(next, ancestors));
        }

        ancestors.remove(&start);

        // max_by_key keeps the last maximum, reversing keeps the lowest id on ties
        let best = candidates
            .into_iter()
            .rev()
            .max_by_key(|branch| OrderedFloat(branch.length));

        let mut ids = vec![start];
        let mut length = self.length_of(start);
        if let Some(best) = best {
            ids.extend(best.ids);
            length += best.length;
        }

        Branch { ids, length }
    }

    /// Partition ways into disjoint branches covering every id once.
    ///
    /// A branch starts at a head, a way whose start node is not the end node
    /// of any other way still in the pool, and follows successors until none
    /// is left in the pool. When only cycles remain the lowest id starts the
    /// next branch.
    pub fn group_road_branches(&self, way_ids: &[i32]) -> Vec<Vec<i32>> {
        let mut pool: BTreeSet<i32> = BTreeSet::new();
        for id in way_ids {
            if self.ways.contains_key(id) {
                pool.insert(*id);
            } else {
                debug!("Way {} is not part of the navigation table, skipping", id);
            }
        }

        let mut branches = Vec::new();
        while !pool.is_empty() {
            let head = pool
                .iter()
                .copied()
                .find(|id| self.is_branch_head(*id, &pool))
                .or_else(|| pool.first().copied());
            let Some(head) = head else {
                break;
            };

            pool.remove(&head);
            let mut branch = vec![head];
            let mut current = head;

            while let Some(next) = self.next(current).into_iter().find(|id| pool.contains(id)) {
                pool.remove(&next);
                branch.push(next);
                current = next;
            }

            branches.push(branch);
        }

        branches
    }

    fn is_branch_head(&self, id: i32, pool: &BTreeSet<i32>) -> bool {
        let Some(way) = self.ways.get(&id) else {
            return false;
        };

        !pool.iter().any(|other| {
            *other != id
                && self
                    .ways
                    .get(other)
                    .is_some_and(|candidate| candidate.node_end == way.node_start)
        })
    }
}

/// Group ways by name and decompose every group into branches
pub fn group_roads(ways: Vec<Way>) -> Vec<Road> {
    let mut by_name: BTreeMap<String, Vec<Way>> = BTreeMap::new();
    for way in ways {
        by_name.entry(way.name.clone()).or_default().push(way);
    }

    by_name
        .into_iter()
        .map(|(name, ways)| {
            let table = NavigationTable::new(ways);
            let branches = table.group_road_branches(&table.way_ids());
            Road { name, branches }
        })
        .collect()
}
