//! Code block: user Lua over an allow-listed binding set.

use marionet_config::BlockDef;
use marionet_context::RunContext;
use mlua::{Lua, LuaOptions, LuaSerdeExt, StdLib};
use serde_json::Value;

use crate::error::BlockError;
use crate::outcome::BlockOutcome;
use crate::params::resolve_block_parameters;

pub(crate) async fn execute_code(
  block: &BlockDef,
  code: &str,
  parameter_keys: &[String],
  context: &mut RunContext,
) -> Result<BlockOutcome, BlockError> {
  let resolved = resolve_block_parameters(context, parameter_keys)?;

  // Code runs locally and its output is registered back into the context,
  // so bindings get real secret values, not opaque ids. The de-obfuscated
  // values exist only inside the sandbox; nothing here is logged.
  let mut bindings = serde_json::Map::new();
  for (key, value) in resolved {
    bindings.insert(key, deobfuscate(context, value));
  }

  let result = run_lua_code(code, &bindings)?;
  Ok(BlockOutcome::completed(block.output_key(), result))
}

fn deobfuscate(context: &RunContext, value: Value) -> Value {
  match value {
    Value::String(s) => Value::String(context.resolve_secrets(&s)),
    Value::Array(items) => Value::Array(
      items
        .into_iter()
        .map(|item| deobfuscate(context, item))
        .collect(),
    ),
    Value::Object(map) => Value::Object(
      map
        .into_iter()
        .map(|(k, v)| (k, deobfuscate(context, v)))
        .collect(),
    ),
    other => other,
  }
}

/// Run a Lua chunk in a restricted interpreter and return its `result`
/// global.
///
/// Only the table, string and math libraries are loaded: no io, no os, no
/// require. Each call gets a fresh interpreter so chunks cannot observe
/// one another.
pub fn run_lua_code(
  code: &str,
  bindings: &serde_json::Map<String, Value>,
) -> Result<Value, BlockError> {
  let lua = Lua::new_with(
    StdLib::TABLE | StdLib::STRING | StdLib::MATH,
    LuaOptions::default(),
  )
  .map_err(code_error)?;

  let globals = lua.globals();
  for (key, value) in bindings {
    let lua_value = lua.to_value(value).map_err(code_error)?;
    globals.set(key.as_str(), lua_value).map_err(code_error)?;
  }

  lua.load(code).exec().map_err(code_error)?;

  let result: mlua::Value = globals.get("result").map_err(code_error)?;
  lua.from_value(result).map_err(code_error)
}

fn code_error(e: mlua::Error) -> BlockError {
  BlockError::Code {
    message: e.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use marionet_context::{SecretField, SecretValue};
  use serde_json::json;

  fn bindings(value: Value) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::new();
    map.insert("input".to_string(), value);
    map
  }

  #[test]
  fn test_result_global_becomes_output() {
    let out = run_lua_code("result = input * 2", &bindings(json!(21))).unwrap();
    assert_eq!(out, json!(42));
  }

  #[test]
  fn test_tables_round_trip() {
    let out = run_lua_code(
      "result = { total = #input, first = input[1] }",
      &bindings(json!(["a", "b", "c"])),
    )
    .unwrap();
    assert_eq!(out, json!({ "total": 3, "first": "a" }));
  }

  #[test]
  fn test_missing_result_is_null() {
    let out = run_lua_code("local x = 1", &bindings(json!(null))).unwrap();
    assert_eq!(out, json!(null));
  }

  #[test]
  fn test_runtime_error_surfaces() {
    let result = run_lua_code("error('boom')", &serde_json::Map::new());
    assert!(matches!(result, Err(BlockError::Code { .. })));
  }

  #[test]
  fn test_os_library_absent() {
    let result = run_lua_code("result = os.time()", &serde_json::Map::new());
    assert!(matches!(result, Err(BlockError::Code { .. })));
  }

  #[test]
  fn test_deobfuscation() {
    let mut context = RunContext::new();
    context.register_credential(
      "portal",
      vec![SecretField {
        name: "password".to_string(),
        value: SecretValue::Static("hunter2".to_string()),
      }],
    );
    let opaque_id = context.get_value("portal").unwrap()["password"]
      .as_str()
      .unwrap()
      .to_string();

    let value = json!({ "nested": [opaque_id] });
    let resolved = deobfuscate(&context, value);
    assert_eq!(resolved, json!({ "nested": ["hunter2"] }));
  }
}
