//! What a compiled body sees: action adapters, parameter values and the
//! error sink.

use std::sync::{Arc, Mutex, MutexGuard};

use mlua::{Function, Lua, LuaSerdeExt, Variadic};

use crate::action::{Action, Value};

/// Name of the global a rule body calls to report a logical failure.
pub const FAIL_FN: &str = "fail";

const DEFAULT_FAIL_MESSAGE: &str = "rule reported failure";

/// Records the first logical failure a rule body reports.
///
/// Shared by the `fail` function and every action adapter of one rule, so
/// that adapters stop calling their action once a failure is recorded.
#[derive(Debug, Clone, Default)]
pub struct ErrorSink(Arc<Mutex<Option<String>>>);

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        self.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Records `message` unless a failure is already recorded. Returns
    /// whether this call set it.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        let mut slot = self.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(message.into());
        true
    }

    pub fn is_set(&self) -> bool {
        self.lock().is_some()
    }

    pub fn error(&self) -> Option<String> {
        self.lock().clone()
    }

    pub fn reset(&self) {
        *self.lock() = None;
    }
}

pub(crate) fn value_to_lua(lua: &Lua, value: &Value) -> mlua::Result<mlua::Value> {
    lua.to_value(value.as_json())
}

pub(crate) fn lua_to_value(lua: &Lua, value: mlua::Value) -> mlua::Result<Value> {
    lua.from_value::<serde_json::Value>(value).map(Value::from)
}

/// Wraps `action` as a Lua function.
///
/// Called as `outputs, err = recipient(a, b, ...)`: on success `outputs` is
/// a table of the action's named outputs, on action failure it is `nil` and
/// `err` carries the message. Once `sink` holds a failure the adapter
/// returns an empty table and never reaches the action.
pub(crate) fn action_adapter(
    lua: &Lua,
    action: Arc<dyn Action>,
    sink: ErrorSink,
) -> mlua::Result<Function> {
    lua.create_function(move |lua, args: Variadic<mlua::Value>| {
        if sink.is_set() {
            log::debug!("error sink set, skip call to action {}", action.key());
            return Ok((mlua::Value::Table(lua.create_table()?), mlua::Value::Nil));
        }

        let params = args
            .iter()
            .cloned()
            .map(|v| lua_to_value(lua, v))
            .collect::<mlua::Result<Vec<_>>>()?;

        match action.call(&params) {
            Ok(outputs) => {
                let table = lua.create_table()?;
                for (name, value) in &outputs {
                    table.set(name.as_str(), value_to_lua(lua, value)?)?;
                }
                Ok((mlua::Value::Table(table), mlua::Value::Nil))
            }
            Err(e) => {
                log::warn!("action {} returned an error: {}", action.key(), e);
                let message = lua.create_string(e.to_string())?;
                Ok((mlua::Value::Nil, mlua::Value::String(message)))
            }
        }
    })
}

/// The `fail(message)` function exposed to rule bodies.
pub(crate) fn sink_setter(lua: &Lua, sink: ErrorSink) -> mlua::Result<Function> {
    lua.create_function(move |_, message: Option<String>| {
        let message = message.unwrap_or_else(|| DEFAULT_FAIL_MESSAGE.to_string());
        if !sink.fail(message) {
            log::debug!("error sink already set, later failure ignored");
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_failure_wins() {
        let sink = ErrorSink::new();
        assert!(!sink.is_set());
        assert!(sink.fail("first"));
        assert!(!sink.fail("second"));
        assert_eq!(sink.error().as_deref(), Some("first"));

        sink.reset();
        assert!(sink.error().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let sink = ErrorSink::new();
        let clone = sink.clone();
        clone.fail("shared");
        assert!(sink.is_set());
    }
}
