/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Nodes of the causal DAG.

use std::{collections::BTreeSet, sync::Arc};

use crate::types::data_types::{Head, LogKey};

use super::clock::Clock;

/// One block of a writer's log, as seen by the linearizer and handed to `apply`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NodeData {
    pub writer: LogKey,
    /// 1-based position of the node in its writer's log.
    pub length: u64,
    /// Causal predecessors in other writers' logs.
    pub heads: Vec<Head>,
    /// Number of nodes left in this node's atomic group, including itself.
    pub batch: u32,
    pub value: Option<Vec<u8>>,
    pub optimistic: bool,
}

impl NodeData {
    pub fn head(&self) -> Head {
        Head::new(self.writer, self.length)
    }
}

/// A node in the linearizer's arena, linked to its neighbours by [`Head`]s.
pub(crate) struct Node {
    pub(crate) data: Arc<NodeData>,
    /// Predecessors that had not been yielded when the node was added.
    pub(crate) dependencies: Vec<Head>,
    pub(crate) dependents: BTreeSet<Head>,
    /// Non-yielded causal past of the node, including the node itself.
    pub(crate) clock: Clock,
}
