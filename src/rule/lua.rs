use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use mlua::{Function, HookTriggers, Lua, VmState};

use super::binding::{self, ErrorSink, FAIL_FN};
use super::descriptor;
use super::error::RuleError;
use super::{Info, Rule, RuleType};
use crate::action::{Action, Value};
use crate::context::ExecContext;

/// How often, in Lua instructions, a running body checks its context.
const CONTEXT_CHECK_INTERVAL: u32 = 1_000;

/// Wraps `pcall` and `xpcall` so a stopped context is raised again instead
/// of being swallowed by the body. Receives the context check function.
const GUARD_PROTECTED_CALLS: &str = r#"
local check = ...
local raw_pcall, raw_xpcall = pcall, xpcall
local pack, unpack = table.pack, table.unpack
local function settle(results)
    if not results[1] then check() end
    return unpack(results, 1, results.n)
end
pcall = function(...) return settle(pack(raw_pcall(...))) end
xpcall = function(...) return settle(pack(raw_xpcall(...))) end
"#;

/// A rule whose body runs on an embedded Lua interpreter.
///
/// Each instance owns its interpreter, so globals set by one run are still
/// visible to [`Rule::get`] afterwards and to the next run.
pub struct LuaRule {
    info: Info,
    lua: Lua,
    program: Option<Function>,
    relies: BTreeMap<String, Arc<dyn Action>>,
    params: BTreeMap<String, Value>,
    sink: ErrorSink,
    running: Arc<Mutex<Option<ExecContext>>>,
}

impl LuaRule {
    /// Parses `content`; fails if the descriptor is missing or malformed.
    pub fn new(content: &str) -> Result<Self, RuleError> {
        let lua = Lua::new();
        let info = descriptor::parse(&lua, content, RuleType::Lua)?;
        let params = info.params.clone();
        Ok(LuaRule {
            info,
            lua,
            program: None,
            relies: BTreeMap::new(),
            params,
            sink: ErrorSink::new(),
            running: Arc::new(Mutex::new(None)),
        })
    }

    /// The sink `fail(...)` writes to.
    pub fn error_sink(&self) -> &ErrorSink {
        &self.sink
    }

    #[cfg(test)]
    pub(crate) fn program(&self) -> Option<&Function> {
        self.program.as_ref()
    }

    fn bind_action(&self, recipient: &str, action: &Arc<dyn Action>) -> Result<(), RuleError> {
        let adapter = binding::action_adapter(&self.lua, Arc::clone(action), self.sink.clone())?;
        self.lua.globals().set(recipient, adapter)?;
        Ok(())
    }

    fn set_running(&self, ctx: Option<ExecContext>) {
        *self.running.lock().unwrap_or_else(|p| p.into_inner()) = ctx;
    }

    fn guard_protected_calls(&self) -> Result<(), RuleError> {
        let running = Arc::clone(&self.running);
        let check = self.lua.create_function(move |_, ()| {
            let guard = running.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(ctx) = guard.as_ref() {
                ctx.check().map_err(mlua::Error::external)?;
            }
            Ok(())
        })?;
        self.lua
            .load(GUARD_PROTECTED_CALLS)
            .set_name("=guard")
            .call::<()>(check)?;
        Ok(())
    }

    fn bind_param(&self, recipient: &str, value: &Value) -> Result<(), RuleError> {
        let lua_value = binding::value_to_lua(&self.lua, value)?;
        self.lua.globals().set(recipient, lua_value)?;
        Ok(())
    }
}

impl Rule for LuaRule {
    fn info(&self) -> &Info {
        &self.info
    }

    fn set(&mut self, recipient: &str, value: Value) -> Result<(), RuleError> {
        if recipient == FAIL_FN || self.info.rely_on.values().any(|r| r == recipient) {
            return Err(RuleError::ReservedName(recipient.to_string()));
        }
        if self.program.is_some() {
            self.bind_param(recipient, &value)?;
        }
        self.params.insert(recipient.to_string(), value);
        Ok(())
    }

    fn add_rely_on(&mut self, recipient: &str, action: Arc<dyn Action>) -> Result<(), RuleError> {
        if !self.info.rely_on.values().any(|r| r == recipient) {
            return Err(RuleError::UnknownRecipient(recipient.to_string()));
        }
        if self.program.is_some() {
            self.bind_action(recipient, &action)?;
        }
        self.relies.insert(recipient.to_string(), action);
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Value, RuleError> {
        let value: mlua::Value = self.lua.load(format!("return {name}")).eval()?;
        Ok(binding::lua_to_value(&self.lua, value)?)
    }

    fn compile(&mut self) -> Result<(), RuleError> {
        if self.program.is_some() {
            return Ok(());
        }

        // params first so a descriptor default never hides an action
        for (recipient, value) in &self.params {
            self.bind_param(recipient, value)?;
        }
        for recipient in self.info.rely_on.values() {
            let action = self
                .relies
                .get(recipient)
                .ok_or_else(|| RuleError::UnboundDependency(recipient.clone()))?;
            self.bind_action(recipient, action)?;
        }
        self.guard_protected_calls()?;
        let fail = binding::sink_setter(&self.lua, self.sink.clone())?;
        self.lua.globals().set(FAIL_FN, fail)?;

        let (_, body) = descriptor::split(&self.info.content)?;
        let program = self
            .lua
            .load(body)
            .set_name(format!("={}", self.info.key()))
            .into_function()?;
        log::debug!("compiled rule {}", self.info.key());
        self.program = Some(program);
        Ok(())
    }

    fn run(&mut self, ctx: &ExecContext) -> Result<(), RuleError> {
        let program = self.program.as_ref().ok_or(RuleError::NotCompiled)?;
        let ctx = ctx.for_run();
        ctx.check()?;
        self.sink.reset();

        let hook_ctx = ctx.clone();
        self.lua.set_hook(
            HookTriggers::new().every_nth_instruction(CONTEXT_CHECK_INTERVAL),
            move |_lua, _debug| {
                hook_ctx.check().map_err(mlua::Error::external)?;
                Ok(VmState::Continue)
            },
        );
        self.set_running(Some(ctx.clone()));
        let result = program.call::<()>(());
        self.set_running(None);
        self.lua.remove_hook();

        // an interrupted run reports why the context stopped it
        ctx.check()?;
        result?;
        match self.sink.error() {
            Some(message) => Err(RuleError::Logical(message)),
            None => Ok(()),
        }
    }

    fn is_compiled(&self) -> bool {
        self.program.is_some()
    }
}
