/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Deterministic linearization of the causal DAG formed by all writers' logs.
//!
//! The linearizer keeps every node that has not been *yielded* yet in an arena keyed by the node's
//! [`Head`]. A node is yielded once a majority of the indexers have confirmed it, after which it
//! leaves the arena and its position in the order can never change again.
//!
//! ## Ordering
//!
//! Every call to [`update`](Linearizer::update) produces the full order of non-yielded nodes in two
//! parts:
//! 1. **Indexed**: nodes confirmed in this update, in the order they were confirmed. A tail (a node
//!    whose dependencies have all been yielded) is confirmed when a majority of the indexers' latest
//!    nodes "vote" for it with a majority tally. Only indexer nodes vote. Each votes for the tail
//!    that most of the indexer nodes it builds on vote for (ties going to the smaller writer key),
//!    a tail votes for itself, and a node whose previous node already held a majority tally keeps
//!    that vote. Nodes of other writers never count, so a replica that sees more of them cannot
//!    confirm a different tail.
//! 2. **Tip**: all other nodes, ordered by repeatedly taking a tail. Among tails, the one contained
//!    in the heaviest DAG head wins, where the weight of a head is the number of non-yielded nodes in
//!    its causal past. Equal weights are broken by ascending writer key.
//!
//! Both rules only depend on the DAG, so every base holding the same nodes computes the same order.
//!
//! ## Batches
//!
//! Nodes with `batch > 1` are always followed immediately by the next node of the same writer, so an
//! atomic group is never split by nodes of other writers.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use crate::types::{
    data_types::{Head, LogKey},
    indexer_set::IndexerSet,
};

use self::{clock::Clock, node::Node};

pub use self::node::NodeData;

pub(crate) mod clock;

pub mod node;

/// The change in the linearized order caused by one call to [`Linearizer::update`].
///
/// The new order is `indexed ++ tip`. Its first `shared` nodes are the same as in the order the
/// previous update produced, the previous order's last `popped` nodes must be undone, and the last
/// `pushed` nodes are new.
#[derive(Clone, Debug)]
pub struct LinearizerUpdate {
    pub shared: usize,
    pub popped: usize,
    pub pushed: usize,
    pub length: usize,
    pub indexed: Vec<Arc<NodeData>>,
    pub tip: Vec<Arc<NodeData>>,
}

impl LinearizerUpdate {
    /// The `i`-th node of the new order.
    pub fn node(&self, i: usize) -> &Arc<NodeData> {
        if i < self.indexed.len() {
            &self.indexed[i]
        } else {
            &self.tip[i - self.indexed.len()]
        }
    }
}

pub struct Linearizer {
    indexers: IndexerSet,
    nodes: HashMap<Head, Node>,
    /// For every writer, the length up to which its nodes have left the arena.
    yielded: HashMap<LogKey, u64>,
    /// For every writer, the length of the latest node added.
    latest: HashMap<LogKey, u64>,
    /// Frontier of the DAG, which may include yielded nodes.
    heads: Vec<Head>,
    /// Non-yielded nodes whose dependencies have all been yielded.
    tails: BTreeSet<Head>,
    /// Order of the non-yielded nodes produced by the last update.
    tip: Vec<Arc<NodeData>>,
    updated: bool,
}

#[derive(Clone)]
struct Vote {
    best: usize,
    tally: Vec<u32>,
}

#[derive(Clone, Default)]
struct Aggregate {
    votes: usize,
    majority_votes: usize,
    indexed: bool,
}

impl Linearizer {
    /// Create a linearizer that orders the DAG beyond `heads`, with `yielded` giving, per writer, the
    /// length up to which its nodes are already part of the indexed order.
    pub fn new(
        indexers: IndexerSet,
        heads: Vec<Head>,
        yielded: impl IntoIterator<Item = (LogKey, u64)>,
    ) -> Linearizer {
        let yielded: HashMap<LogKey, u64> = yielded.into_iter().collect();
        Linearizer {
            indexers,
            nodes: HashMap::new(),
            latest: yielded.clone(),
            yielded,
            heads,
            tails: BTreeSet::new(),
            tip: Vec::new(),
            updated: false,
        }
    }

    pub fn indexers(&self) -> &IndexerSet {
        &self.indexers
    }

    /// Frontier of the DAG.
    pub fn heads(&self) -> &[Head] {
        &self.heads
    }

    /// Length of the latest node of `writer` that was added (or yielded before this linearizer was
    /// created).
    pub fn latest(&self, writer: &LogKey) -> u64 {
        self.latest.get(writer).copied().unwrap_or(0)
    }

    /// Set the yielded length of a writer the linearizer has not heard of yet.
    pub fn init_writer(&mut self, writer: &LogKey, yielded: u64) {
        if !self.latest.contains_key(writer) {
            self.yielded.insert(*writer, yielded);
            self.latest.insert(*writer, yielded);
        }
    }

    pub fn is_yielded(&self, head: &Head) -> bool {
        head.length <= self.yielded.get(&head.key).copied().unwrap_or(0)
    }

    /// Whether `head` has been added, either as a node in the arena or as a yielded node.
    pub fn contains(&self, head: &Head) -> bool {
        self.is_yielded(head) || self.nodes.contains_key(head)
    }

    pub fn node(&self, head: &Head) -> Option<&Arc<NodeData>> {
        self.nodes.get(head).map(|node| &node.data)
    }

    /// Number of nodes that are waiting to be indexed.
    pub fn pending(&self) -> usize {
        self.nodes.len()
    }

    /// Register the next node of its writer.
    pub fn add_head(&mut self, data: NodeData) -> Result<Head, LinearizerError> {
        let id = data.head();
        let expected = self.latest(&data.writer) + 1;
        if data.length != expected {
            return Err(LinearizerError::Corruption(CorruptionError {
                writer: data.writer,
                length: data.length,
                expected,
            }));
        }

        let mut dependencies = Vec::new();
        let previous = Head::new(data.writer, data.length - 1);
        if previous.length > 0 && !self.is_yielded(&previous) {
            dependencies.push(previous);
        }
        for head in &data.heads {
            if head.length == 0 || head.key == data.writer || self.is_yielded(head) {
                continue;
            }
            if !self.nodes.contains_key(head) {
                return Err(LinearizerError::MissingDependency {
                    node: id,
                    dependency: *head,
                });
            }
            if !dependencies.contains(head) {
                dependencies.push(*head);
            }
        }

        let mut clock = Clock::new();
        for dependency in &dependencies {
            if let Some(node) = self.nodes.get_mut(dependency) {
                clock.merge(&node.clock);
                node.dependents.insert(id);
            }
        }
        clock.set(&data.writer, data.length);

        if dependencies.is_empty() {
            self.tails.insert(id);
        }

        self.heads.retain(|head| {
            head.key != data.writer && !clock.includes(head) && !data.heads.contains(head)
        });
        self.heads.push(id);
        self.heads.sort();

        self.latest.insert(data.writer, data.length);
        self.nodes.insert(
            id,
            Node {
                data: Arc::new(data),
                dependencies,
                dependents: BTreeSet::new(),
                clock,
            },
        );
        self.updated = true;
        Ok(id)
    }

    /// Recompute the order. Returns `None` if no node was added since the last update.
    pub fn update(&mut self) -> Option<LinearizerUpdate> {
        if !self.updated {
            return None;
        }
        self.updated = false;

        let mut indexed = Vec::new();
        while let Some(tail) = self.next_confirmed() {
            self.shift_batch(tail, &mut indexed);
        }

        let tip = self.order_tip();

        let previous: Vec<Head> = self.tip.iter().map(|node| node.head()).collect();
        let next: Vec<Head> = indexed
            .iter()
            .chain(tip.iter())
            .map(|node| node.head())
            .collect();
        let shared = previous
            .iter()
            .zip(next.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let update = LinearizerUpdate {
            shared,
            popped: previous.len() - shared,
            pushed: next.len() - shared,
            length: next.len(),
            indexed,
            tip: tip.clone(),
        };
        self.tip = tip;
        Some(update)
    }

    /// Whether `writer` should append an acknowledgement to help the network confirm nodes.
    ///
    /// True iff `writer` is an indexer, some node that carries a value is waiting to be indexed, and
    /// the writer's latest node does not already cast a majority vote for the next tail in line.
    pub fn should_ack(&self, writer: &LogKey) -> bool {
        if !self.indexers.contains(writer) || self.tails.is_empty() {
            return false;
        }
        if self.nodes.values().all(|node| node.data.value.is_none()) {
            return false;
        }

        let tails: Vec<Head> = self.tails.iter().copied().collect();
        let mut cache = HashMap::new();
        let (best, aggregate) = match self.tally_tails(&tails, &mut cache) {
            Some(result) => result,
            None => return false,
        };
        if aggregate.indexed {
            return false;
        }

        let latest = Head::new(*writer, self.latest(writer));
        if !self.nodes.contains_key(&latest) {
            return true;
        }
        let vote = self.votes_for(latest, &tails, &mut cache);
        !(vote.best == best && vote.tally[best] as usize >= self.majority())
    }

    fn majority(&self) -> usize {
        self.indexers.len() / 2 + 1
    }

    /// The tail that a majority of indexers confirm, if any.
    fn next_confirmed(&self) -> Option<Head> {
        if self.tails.is_empty() {
            return None;
        }
        let tails: Vec<Head> = self.tails.iter().copied().collect();
        let mut cache = HashMap::new();
        match self.tally_tails(&tails, &mut cache) {
            Some((best, aggregate)) if aggregate.indexed => Some(tails[best]),
            _ => None,
        }
    }

    /// Count the indexers' votes for each of `tails`, returning the leading tail.
    fn tally_tails(
        &self,
        tails: &[Head],
        cache: &mut HashMap<Head, Vote>,
    ) -> Option<(usize, Aggregate)> {
        if tails.is_empty() {
            return None;
        }
        let majority = self.majority();
        let mut results = vec![Aggregate::default(); tails.len()];

        for indexer in self.indexers.iter() {
            let head = Head::new(*indexer, self.latest(indexer));
            if !self.nodes.contains_key(&head) {
                continue;
            }
            let vote = self.votes_for(head, tails, cache);
            let result = &mut results[vote.best];
            result.votes += 1;
            if vote.tally[vote.best] as usize >= majority {
                result.majority_votes += 1;
                if result.majority_votes >= majority {
                    result.indexed = true;
                }
            }
        }

        let mut best = 0;
        for i in 1..tails.len() {
            let (r, b) = (&results[i], &results[best]);
            if (r.majority_votes, r.votes) > (b.majority_votes, b.votes)
                || ((r.majority_votes, r.votes) == (b.majority_votes, b.votes)
                    && tails[i].key < tails[best].key)
            {
                best = i;
            }
        }
        Some((best, results[best].clone()))
    }

    /// The votes an indexer node's vote is derived from: its own previous node, and the latest
    /// node of every other indexer in its causal past. Nodes that have left the arena do not vote.
    fn voters(&self, node: &Node) -> (Option<Head>, Vec<Head>) {
        let writer = node.data.writer;
        let previous = Head::new(writer, node.data.length - 1);
        let previous = if self.nodes.contains_key(&previous) {
            Some(previous)
        } else {
            None
        };
        let others = self
            .indexers
            .iter()
            .filter(|indexer| **indexer != writer)
            .map(|indexer| Head::new(*indexer, node.clock.get(indexer)))
            .filter(|head| head.length > 0 && self.nodes.contains_key(head))
            .collect();
        (previous, others)
    }

    /// Compute the vote of the indexer node `start`, memoizing the votes of every node visited in
    /// `cache`.
    ///
    /// A node's tally counts one vote per indexer: the votes of the other indexers' latest nodes it
    /// links, plus its own. Once a node's tally reaches a majority, the writer's later nodes keep
    /// that vote.
    fn votes_for(&self, start: Head, tails: &[Head], cache: &mut HashMap<Head, Vote>) -> Vote {
        let majority = self.majority();
        let mut stack = vec![(start, false)];
        while let Some((id, expanded)) = stack.pop() {
            if cache.contains_key(&id) {
                continue;
            }

            let mut tally = vec![0u32; tails.len()];
            if let Some(i) = tails.iter().position(|tail| *tail == id) {
                tally[i] = 1;
                cache.insert(id, Vote { best: i, tally });
                continue;
            }

            let node = match self.nodes.get(&id) {
                Some(node) => node,
                None => {
                    cache.insert(id, Vote { best: 0, tally });
                    continue;
                }
            };
            let (previous, others) = self.voters(node);

            if !expanded {
                stack.push((id, true));
                for voter in previous.iter().chain(others.iter()) {
                    if !cache.contains_key(voter) {
                        stack.push((*voter, false));
                    }
                }
                continue;
            }

            let previous = previous.and_then(|head| cache.get(&head).cloned());
            if let Some(vote) = &previous {
                if vote.tally[vote.best] as usize >= majority {
                    cache.insert(id, vote.clone());
                    continue;
                }
            }

            for other in &others {
                if let Some(vote) = cache.get(other) {
                    tally[vote.best] += 1;
                }
            }
            let mut preference = tally.clone();
            if let Some(vote) = &previous {
                preference[vote.best] += 1;
            }

            let best = if preference.iter().all(|count| *count == 0) {
                // Nothing to follow: the first tail in the node's causal past.
                tails
                    .iter()
                    .position(|tail| node.clock.includes(tail))
                    .unwrap_or(0)
            } else {
                let mut best = 0;
                for i in 1..tails.len() {
                    if preference[i] > preference[best]
                        || (preference[i] == preference[best] && tails[i].key < tails[best].key)
                    {
                        best = i;
                    }
                }
                best
            };
            tally[best] += 1;
            cache.insert(id, Vote { best, tally });
        }

        cache.get(&start).cloned().unwrap_or(Vote {
            best: 0,
            tally: vec![0; tails.len()],
        })
    }

    /// Yield `tail`, and the rest of its batch, into `indexed`.
    fn shift_batch(&mut self, tail: Head, indexed: &mut Vec<Arc<NodeData>>) {
        let mut next = Some(tail);
        while let Some(id) = next.take() {
            let node = match self.nodes.remove(&id) {
                Some(node) => node,
                None => return,
            };
            self.tails.remove(&id);
            self.yielded.insert(id.key, id.length);

            for dependent in &node.dependents {
                let ready = self
                    .nodes
                    .get(dependent)
                    .map(|d| d.dependencies.iter().all(|dep| self.is_yielded(dep)))
                    .unwrap_or(false);
                if ready {
                    self.tails.insert(*dependent);
                }
            }

            if node.data.batch > 1 {
                next = Some(Head::new(id.key, id.length + 1));
            }
            indexed.push(node.data);
        }
    }

    /// Order every node still in the arena.
    fn order_tip(&self) -> Vec<Arc<NodeData>> {
        // Weight of every head that is still in the arena.
        let weights: Vec<(&Clock, u64)> = self
            .heads
            .iter()
            .filter_map(|head| self.nodes.get(head))
            .map(|node| {
                let weight = node
                    .clock
                    .iter()
                    .map(|(writer, length)| {
                        length.saturating_sub(self.yielded.get(writer).copied().unwrap_or(0))
                    })
                    .sum();
                (&node.clock, weight)
            })
            .collect();
        let weight_of = |tail: &Head| {
            weights
                .iter()
                .filter(|(clock, _)| clock.includes(tail))
                .map(|(_, weight)| *weight)
                .max()
                .unwrap_or(0)
        };

        let mut order: Vec<Arc<NodeData>> = Vec::with_capacity(self.nodes.len());
        let mut done: BTreeSet<Head> = BTreeSet::new();
        let mut tails = self.tails.clone();

        while let Some(first) = tails
            .iter()
            .copied()
            .max_by(|a, b| weight_of(a).cmp(&weight_of(b)).then(b.key.cmp(&a.key)))
        {
            let mut next = Some(first);
            while let Some(id) = next.take() {
                tails.remove(&id);
                let node = match self.nodes.get(&id) {
                    Some(node) => node,
                    None => break,
                };
                done.insert(id);
                order.push(node.data.clone());

                for dependent in &node.dependents {
                    let ready = self
                        .nodes
                        .get(dependent)
                        .map(|d| {
                            d.dependencies
                                .iter()
                                .all(|dep| self.is_yielded(dep) || done.contains(dep))
                        })
                        .unwrap_or(false);
                    if ready {
                        tails.insert(*dependent);
                    }
                }

                if node.data.batch > 1 {
                    next = Some(Head::new(id.key, id.length + 1));
                }
            }
        }

        order
    }
}

/// A node's length does not match the length its writer's log implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionError {
    pub writer: LogKey,
    pub length: u64,
    pub expected: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinearizerError {
    Corruption(CorruptionError),
    /// `node` depends on `dependency`, which has not been added.
    MissingDependency { node: Head, dependency: Head },
}
