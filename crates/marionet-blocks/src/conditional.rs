//! Conditional block: ordered branch evaluation with batched LLM prompts.

use marionet_config::{BlockDef, BranchCondition, BranchCriteria};
use marionet_context::{BlockMetadata, RunContext};
use serde_json::Value;
use tracing::info;

use crate::error::BlockError;
use crate::execute::{BlockContext, Collaborators};
use crate::outcome::{BlockOutcome, BranchTaken};
use crate::params::snapshot_for_templates;

/// Evaluate branches ascending by order; the first match wins and the
/// default branch fires only when nothing else matched.
///
/// All prompt-based criteria of the block go to the LLM in a single
/// batched call up front, so one page read and one completion cover any
/// number of natural-language branches.
pub(crate) async fn execute_conditional(
  block: &BlockDef,
  branches: &[BranchCondition],
  context: &mut RunContext,
  block_ctx: &BlockContext<'_>,
  collab: &Collaborators,
) -> Result<BlockOutcome, BlockError> {
  let snapshot = snapshot_for_templates(context);

  let prompt_answers = evaluate_prompt_branches(branches, &snapshot, block_ctx, collab).await?;

  let mut ordered: Vec<&BranchCondition> = branches.iter().collect();
  ordered.sort_by_key(|b| b.order);

  let mut matched: Option<&BranchCondition> = None;
  let mut rendered_criteria = None;

  for branch in &ordered {
    match &branch.criteria {
      BranchCriteria::Expression { expression } => {
        let result = block_ctx.renderer.evaluate_bool(expression, &snapshot)?;
        if result {
          rendered_criteria = Some(format!("{} => true", expression));
          matched = Some(branch);
          break;
        }
      }
      BranchCriteria::Prompt { prompt, .. } => {
        if prompt_answer(&prompt_answers, branch.order) {
          rendered_criteria = Some(format!("{} => yes", prompt));
          matched = Some(branch);
          break;
        }
      }
      BranchCriteria::Default => {}
    }
  }

  // Default fires last, regardless of its position in the order.
  let taken = match matched {
    Some(branch) => branch,
    None => ordered
      .iter()
      .find(|b| b.is_default)
      .copied()
      .ok_or_else(|| BlockError::Infrastructure {
        message: format!("conditional '{}' has no default branch", block.label),
      })?,
  };

  info!(
    run_id = %block_ctx.run_id,
    label = %block.label,
    branch_order = taken.order,
    next = taken.next_block_label.as_deref().unwrap_or("<end>"),
    "branch_selected"
  );

  context.record_block_metadata(
    &block.label,
    BlockMetadata {
      branch_taken: taken.next_block_label.clone(),
      rendered_criteria,
      llm_trace: prompt_answers.clone(),
      retries: 0,
    },
  );

  let mut outcome = BlockOutcome::completed(
    block.output_key(),
    serde_json::json!({
      "matched_order": taken.order,
      "next_block_label": taken.next_block_label,
    }),
  );
  outcome.branch_taken = Some(BranchTaken {
    order: taken.order,
    next_block_label: taken.next_block_label.clone(),
  });
  Ok(outcome)
}

/// One batched LLM call answering every prompt branch of the block.
///
/// The response is an object keyed by branch order (`{"0": true, ...}`);
/// returns `None` when the block has no prompt branches.
async fn evaluate_prompt_branches(
  branches: &[BranchCondition],
  snapshot: &Value,
  block_ctx: &BlockContext<'_>,
  collab: &Collaborators,
) -> Result<Option<Value>, BlockError> {
  let prompts: Vec<(u32, String, bool)> = branches
    .iter()
    .filter_map(|b| match &b.criteria {
      BranchCriteria::Prompt { prompt, page_aware } => {
        Some((b.order, prompt.clone(), *page_aware))
      }
      _ => None,
    })
    .collect();

  if prompts.is_empty() {
    return Ok(None);
  }

  let mut rendered = Vec::with_capacity(prompts.len());
  let mut any_page_aware = false;
  for (order, prompt, page_aware) in &prompts {
    rendered.push((*order, block_ctx.renderer.render_string(prompt, snapshot)?));
    any_page_aware |= page_aware;
  }

  let mut text = String::from(
    "Answer each yes/no question. Respond with a JSON object mapping the \
     question number to a boolean.\n",
  );
  for (order, question) in &rendered {
    text.push_str(&format!("\n{}. {}", order, question));
  }
  if any_page_aware {
    let page_text = collab.agent.read_page_text(block_ctx.run_id).await?;
    text.push_str(&format!("\n\nCurrent page text:\n{}", page_text));
  }

  let answers = collab.llm.handler(&text, "branch_evaluation", true).await?;
  Ok(Some(answers))
}

fn prompt_answer(answers: &Option<Value>, order: u32) -> bool {
  answers
    .as_ref()
    .and_then(|a| a.get(order.to_string()))
    .map(truthy)
    .unwrap_or(false)
}

// LLMs answer booleans in more shapes than `true`.
fn truthy(value: &Value) -> bool {
  match value {
    Value::Bool(b) => *b,
    Value::String(s) => {
      let s = s.trim().to_ascii_lowercase();
      s == "true" || s == "yes"
    }
    Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_truthy_shapes() {
    assert!(truthy(&json!(true)));
    assert!(truthy(&json!("yes")));
    assert!(truthy(&json!("True")));
    assert!(truthy(&json!(1)));
    assert!(!truthy(&json!(false)));
    assert!(!truthy(&json!("no")));
    assert!(!truthy(&json!(0)));
    assert!(!truthy(&json!(null)));
  }

  #[test]
  fn test_prompt_answer_keyed_by_order() {
    let answers = Some(json!({ "0": false, "2": true }));
    assert!(!prompt_answer(&answers, 0));
    assert!(prompt_answer(&answers, 2));
    assert!(!prompt_answer(&answers, 1));
    assert!(!prompt_answer(&None, 0));
  }
}
