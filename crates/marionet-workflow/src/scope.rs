//! Conditional scope / merge point computation.
//!
//! For each conditional block we trace the default-next chain of every
//! unique branch target. A block reachable through *every* chain is a merge
//! point: the divergent paths have reunited and it no longer belongs to any
//! single branch. Blocks reachable through a strict subset of chains, and
//! everything strictly before the merge point on its chain, are scoped to
//! the conditional.

use std::collections::{HashMap, HashSet};

use marionet_config::{BlockDef, BlockType};

/// Compute the conditional scope map: block label -> owning conditional.
///
/// Chain tracing stops at the chain end, at a nested conditional (which is
/// included, but its descendants are not), or on re-visitation.
pub fn compute_conditional_scope(
  blocks: &[BlockDef],
  default_next: &HashMap<String, Option<String>>,
) -> HashMap<String, String> {
  let block_map: HashMap<&str, &BlockDef> = blocks.iter().map(|b| (b.label.as_str(), b)).collect();
  let mut scope: HashMap<String, String> = HashMap::new();

  for block in blocks {
    let BlockType::Conditional { branches } = &block.block_type else {
      continue;
    };

    // Deduplicate branch targets, preserving branch order.
    let mut targets: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    for branch in branches {
      if let Some(target) = branch.next_block_label.as_deref() {
        if seen.insert(target) {
          targets.push(target);
        }
      }
    }
    if targets.is_empty() {
      continue;
    }

    let chains: Vec<Vec<&str>> = targets
      .iter()
      .map(|t| trace_chain(t, &block_map, default_next))
      .collect();

    // A merge point appears in the chain of every unique branch target.
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for chain in &chains {
      for label in chain {
        *counts.entry(label).or_insert(0) += 1;
      }
    }
    let merge_points: HashSet<&str> = counts
      .iter()
      .filter(|(_, count)| **count == chains.len())
      .map(|(label, _)| *label)
      .collect();

    // Nothing at or after a merge point is scoped to this conditional.
    for chain in &chains {
      for label in chain {
        if merge_points.contains(label) {
          break;
        }
        scope
          .entry(label.to_string())
          .or_insert_with(|| block.label.clone());
      }
    }
  }

  scope
}

/// Trace a default-next chain starting at `start`.
fn trace_chain<'a>(
  start: &'a str,
  block_map: &HashMap<&'a str, &'a BlockDef>,
  default_next: &'a HashMap<String, Option<String>>,
) -> Vec<&'a str> {
  let mut chain = Vec::new();
  let mut visited = HashSet::new();
  let mut current = Some(start);

  while let Some(label) = current {
    if !visited.insert(label) {
      break;
    }
    chain.push(label);

    // A nested conditional belongs to the chain, but its own descendants
    // are scoped to the nested conditional, not to this one.
    if let Some(block) = block_map.get(label) {
      if matches!(block.block_type, BlockType::Conditional { .. }) {
        break;
      }
    }

    current = default_next
      .get(label)
      .and_then(|next| next.as_deref());
  }

  chain
}
