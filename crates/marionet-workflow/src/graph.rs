use std::collections::{HashMap, HashSet};

use marionet_config::{BlockDef, BlockType, ParameterDef, WorkflowDefinition};

use crate::error::DefinitionError;
use crate::scope::compute_conditional_scope;

/// A validated, traversable workflow DAG.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
  /// The unique root block (zero incoming edges).
  pub start_label: String,
  /// Top-level blocks by label. The finally block, if any, is not here.
  pub blocks: HashMap<String, BlockDef>,
  /// Default edge per label, total over all labels. Edges that pointed at
  /// the finally block are nullified.
  pub default_next: HashMap<String, Option<String>>,
  /// Array order of top-level labels, used for failure reporting.
  pub order: Vec<String>,
  /// Block label -> label of the conditional whose branches scope it.
  /// Merge points are absent by construction.
  pub conditional_scope: HashMap<String, String>,
}

impl WorkflowGraph {
  /// Look up a block by label.
  pub fn get_block(&self, label: &str) -> Option<&BlockDef> {
    self.blocks.get(label)
  }

  /// Position of a block in the authored array, used in failure reasons.
  pub fn block_index(&self, label: &str) -> Option<usize> {
    self.order.iter().position(|l| l == label)
  }

  /// Whether a block has no outgoing edge (default or branch).
  ///
  /// "Last" is defined by DAG position, not array index: a block with no
  /// default edge and no branch targets is last even if other blocks
  /// follow it in the authored array.
  pub fn is_last(&self, label: &str) -> bool {
    let no_default = matches!(self.default_next.get(label), Some(None) | None);
    let no_branches = self
      .blocks
      .get(label)
      .is_none_or(|b| b.branch_targets().is_empty());
    no_default && no_branches
  }
}

/// Build a traversable DAG from a block list.
///
/// The finally block, when designated, is stripped before validation and
/// any edge pointing at it is nullified; the finally block itself must be
/// terminal.
pub fn build_graph(
  blocks: &[BlockDef],
  finally_block_label: Option<&str>,
) -> Result<WorkflowGraph, DefinitionError> {
  if blocks.is_empty() {
    return Err(DefinitionError::EmptyWorkflow);
  }

  check_unique_labels(blocks)?;
  check_default_branches(blocks)?;

  // Strip the finally block before any structural validation.
  let mut working: Vec<BlockDef> = blocks.to_vec();
  if let Some(finally_label) = finally_block_label {
    strip_finally_block(&mut working, finally_label)?;
  }

  let labels: HashSet<&str> = working.iter().map(|b| b.label.as_str()).collect();

  // Sequential array-order defaulting is only sound when no conditional is
  // present: with branches, array order need not match execution order.
  let has_conditional = working
    .iter()
    .any(|b| matches!(b.block_type, BlockType::Conditional { .. }));

  let mut default_next: HashMap<String, Option<String>> = HashMap::new();
  for (i, block) in working.iter().enumerate() {
    let next = match &block.next_block_label {
      Some(next) => Some(next.clone()),
      None if !has_conditional => working.get(i + 1).map(|b| b.label.clone()),
      None => None,
    };
    default_next.insert(block.label.clone(), next);
  }

  // Every edge must resolve to an existing label.
  for block in &working {
    if let Some(Some(next)) = default_next.get(&block.label) {
      if !labels.contains(next.as_str()) {
        return Err(DefinitionError::UnknownBlock {
          label: next.clone(),
          referenced_by: block.label.clone(),
        });
      }
    }
    for target in block.branch_targets() {
      if !labels.contains(target) {
        return Err(DefinitionError::UnknownBlock {
          label: target.to_string(),
          referenced_by: block.label.clone(),
        });
      }
    }
  }

  // Cycle detection first: a pure cycle leaves no zero-incoming block, and
  // reporting it as a missing root would bury the real defect.
  check_acyclic(&working, &default_next)?;
  let start_label = find_root(&working, &default_next)?;

  let block_map: HashMap<String, BlockDef> = working
    .iter()
    .map(|b| (b.label.clone(), b.clone()))
    .collect();
  let conditional_scope = compute_conditional_scope(&working, &default_next);

  Ok(WorkflowGraph {
    start_label,
    order: working.iter().map(|b| b.label.clone()).collect(),
    blocks: block_map,
    default_next,
    conditional_scope,
  })
}

/// Validate a full definition: parameters plus graph structure.
pub fn validate_definition(
  definition: &WorkflowDefinition,
) -> Result<WorkflowGraph, DefinitionError> {
  check_parameters(definition)?;
  build_graph(
    &definition.blocks,
    definition.finally_block_label.as_deref(),
  )
}

fn check_parameters(definition: &WorkflowDefinition) -> Result<(), DefinitionError> {
  let mut keys: HashSet<&str> = HashSet::new();
  for param in &definition.parameters {
    if !keys.insert(param.key()) {
      return Err(DefinitionError::DuplicateParameterKey {
        key: param.key().to_string(),
      });
    }
  }

  // Context parameters may also source block outputs, which are registered
  // as the run executes.
  let mut sources: HashSet<String> = keys.iter().map(|k| k.to_string()).collect();
  collect_output_keys(&definition.blocks, &mut sources);

  for param in &definition.parameters {
    if let ParameterDef::Context { key, source_key } = param {
      if !sources.contains(source_key) {
        return Err(DefinitionError::UnknownParameterSource {
          key: key.clone(),
          source_key: source_key.clone(),
        });
      }
    }
  }
  Ok(())
}

fn collect_output_keys(blocks: &[BlockDef], out: &mut HashSet<String>) {
  for block in blocks {
    out.insert(block.output_key());
    if let BlockType::ForLoop { blocks: inner, .. } = &block.block_type {
      collect_output_keys(inner, out);
    }
  }
}

/// Check label uniqueness across the definition, including blocks nested
/// inside for-loop chains.
fn check_unique_labels(blocks: &[BlockDef]) -> Result<(), DefinitionError> {
  fn walk<'a>(blocks: &'a [BlockDef], seen: &mut HashSet<&'a str>) -> Result<(), DefinitionError> {
    for block in blocks {
      if !seen.insert(block.label.as_str()) {
        return Err(DefinitionError::DuplicateLabel {
          label: block.label.clone(),
        });
      }
      if let BlockType::ForLoop { blocks: inner, .. } = &block.block_type {
        walk(inner, seen)?;
      }
    }
    Ok(())
  }
  walk(blocks, &mut HashSet::new())
}

/// Every conditional (top-level or nested) carries exactly one default branch.
fn check_default_branches(blocks: &[BlockDef]) -> Result<(), DefinitionError> {
  for block in blocks {
    match &block.block_type {
      BlockType::Conditional { branches } => {
        let count = branches.iter().filter(|b| b.is_default).count();
        if count != 1 {
          return Err(DefinitionError::DefaultBranchCount {
            label: block.label.clone(),
            count,
          });
        }
      }
      BlockType::ForLoop { blocks: inner, .. } => check_default_branches(inner)?,
      _ => {}
    }
  }
  Ok(())
}

/// Remove the finally block and nullify every edge pointing at it.
fn strip_finally_block(
  working: &mut Vec<BlockDef>,
  finally_label: &str,
) -> Result<(), DefinitionError> {
  let position = working
    .iter()
    .position(|b| b.label == finally_label)
    .ok_or_else(|| DefinitionError::FinallyNotFound {
      label: finally_label.to_string(),
    })?;

  let finally_block = &working[position];
  if finally_block.next_block_label.is_some() || !finally_block.branch_targets().is_empty() {
    return Err(DefinitionError::FinallyNotTerminal {
      label: finally_label.to_string(),
    });
  }
  working.remove(position);

  for block in working.iter_mut() {
    if block.next_block_label.as_deref() == Some(finally_label) {
      block.next_block_label = None;
    }
    if let BlockType::Conditional { branches } = &mut block.block_type {
      for branch in branches.iter_mut() {
        if branch.next_block_label.as_deref() == Some(finally_label) {
          branch.next_block_label = None;
        }
      }
    }
  }
  Ok(())
}

/// Exactly one block must have zero incoming edges (default + branch).
fn find_root(
  blocks: &[BlockDef],
  default_next: &HashMap<String, Option<String>>,
) -> Result<String, DefinitionError> {
  let mut incoming: HashMap<&str, usize> = blocks.iter().map(|b| (b.label.as_str(), 0)).collect();

  for block in blocks {
    if let Some(Some(next)) = default_next.get(&block.label) {
      if let Some(count) = incoming.get_mut(next.as_str()) {
        *count += 1;
      }
    }
    for target in block.branch_targets() {
      if let Some(count) = incoming.get_mut(target) {
        *count += 1;
      }
    }
  }

  let mut roots: Vec<String> = blocks
    .iter()
    .filter(|b| incoming[b.label.as_str()] == 0)
    .map(|b| b.label.clone())
    .collect();

  match roots.len() {
    0 => Err(DefinitionError::NoRoot),
    1 => Ok(roots.remove(0)),
    _ => Err(DefinitionError::MultipleRoots { labels: roots }),
  }
}

/// DFS cycle detection over combined default and branch edges.
fn check_acyclic(
  blocks: &[BlockDef],
  default_next: &HashMap<String, Option<String>>,
) -> Result<(), DefinitionError> {
  #[derive(Clone, Copy, PartialEq)]
  enum Color {
    White,
    Grey,
    Black,
  }

  let block_map: HashMap<&str, &BlockDef> = blocks.iter().map(|b| (b.label.as_str(), b)).collect();
  let mut colors: HashMap<&str, Color> = blocks
    .iter()
    .map(|b| (b.label.as_str(), Color::White))
    .collect();

  fn visit<'a>(
    label: &'a str,
    block_map: &HashMap<&'a str, &'a BlockDef>,
    default_next: &'a HashMap<String, Option<String>>,
    colors: &mut HashMap<&'a str, Color>,
  ) -> Result<(), DefinitionError> {
    match colors[label] {
      Color::Black => return Ok(()),
      Color::Grey => {
        return Err(DefinitionError::CycleDetected {
          label: label.to_string(),
        });
      }
      Color::White => {}
    }
    colors.insert(label, Color::Grey);

    let block = block_map[label];
    let mut edges: Vec<&str> = Vec::new();
    if let Some(Some(next)) = default_next.get(label) {
      edges.push(next.as_str());
    }
    edges.extend(block.branch_targets());

    for next in edges {
      visit(next, block_map, default_next, colors)?;
    }

    colors.insert(label, Color::Black);
    Ok(())
  }

  for block in blocks {
    visit(&block.label, &block_map, default_next, &mut colors)?;
  }
  Ok(())
}
