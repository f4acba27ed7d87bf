//! The descriptor region of rule text.
//!
//! A rule starts with a few metadata assignments, then the body marker,
//! then the executable body:
//!
//! ```lua
//! rule_name = "disk_check"
//! rule_version = 2
//! rule_rely_on = { ["disk@1"] = "disk" }
//! rule_params = { threshold = 90 }
//! --body--
//! local out = disk(threshold)
//! ```

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use mlua::{HookTriggers, Lua, LuaSerdeExt, Table};

use super::error::RuleError;
use super::{Info, RuleType};
use crate::action::{Value, Version};

/// Separates the descriptor region from the body. A Lua line comment, so
/// the whole text stays valid Lua.
pub const BODY_TAG: &str = "--body--";

pub const TAG_NAME: &str = "rule_name";
pub const TAG_DESCRIPTION: &str = "rule_description";
pub const TAG_AUTHOR: &str = "rule_author";
pub const TAG_VERSION: &str = "rule_version";
/// Table or JSON object: dependency key -> recipient.
pub const TAG_RELY_ON: &str = "rule_rely_on";
/// Table or JSON object: parameter -> default value.
pub const TAG_PARAMS: &str = "rule_params";

const DESCRIPTOR_INSTRUCTION_LIMIT: u32 = 100_000;

/// Globals the descriptor may use; nothing with side effects.
const DESCRIPTOR_GLOBALS: &[&str] = &[
    "math", "string", "table", "tostring", "tonumber", "type", "pairs", "ipairs",
];

/// Splits rule text into `(descriptor, body)`.
pub fn split(content: &str) -> Result<(&str, &str), RuleError> {
    let index = content.find(BODY_TAG).ok_or(RuleError::UnknownRuleName)?;
    let descriptor = &content[..index];
    if descriptor.trim().is_empty() {
        return Err(RuleError::UnknownRuleName);
    }
    Ok((descriptor, &content[index + BODY_TAG.len()..]))
}

/// Parses the descriptor of `content` into an [`Info`].
///
/// The descriptor is evaluated in its own environment table on `lua`, so it
/// leaves no globals behind for the body.
pub fn parse(lua: &Lua, content: &str, rule_type: RuleType) -> Result<Info, RuleError> {
    let (descriptor, _) = split(content)?;

    let evaluated = panic::catch_unwind(AssertUnwindSafe(|| evaluate(lua, descriptor)));
    let env = match evaluated {
        Ok(Ok(env)) => env,
        Ok(Err(e)) => {
            log::warn!("rule descriptor failed to evaluate: {}", e);
            return Err(RuleError::MalformedDefinition);
        }
        Err(_) => {
            log::error!("rule descriptor evaluation panicked");
            return Err(RuleError::MalformedDefinition);
        }
    };

    let name = read_name(&env)?;
    Ok(Info {
        description: read_text(&env, TAG_DESCRIPTION)?,
        author: read_text(&env, TAG_AUTHOR)?,
        version: read_version(&env)?,
        rely_on: read_rely_on(&env)?,
        params: read_params(lua, &env)?,
        rule_type,
        content: content.to_string(),
        name,
    })
}

fn evaluate(lua: &Lua, descriptor: &str) -> mlua::Result<Table> {
    let env = lua.create_table()?;
    let globals = lua.globals();
    for name in DESCRIPTOR_GLOBALS {
        env.set(*name, globals.get::<mlua::Value>(*name)?)?;
    }

    lua.set_hook(
        HookTriggers::new().every_nth_instruction(DESCRIPTOR_INSTRUCTION_LIMIT),
        |_lua, _debug| {
            Err(mlua::Error::RuntimeError(format!(
                "descriptor exceeded {DESCRIPTOR_INSTRUCTION_LIMIT} instructions"
            )))
        },
    );
    let result = lua
        .load(descriptor)
        .set_name("=descriptor")
        .set_environment(env.clone())
        .exec();
    lua.remove_hook();

    result.map(|_| env)
}

fn read_name(env: &Table) -> Result<String, RuleError> {
    match env.get::<mlua::Value>(TAG_NAME) {
        Ok(mlua::Value::String(s)) => {
            let name = s.to_string_lossy().trim().to_string();
            if name.is_empty() {
                Err(RuleError::UnknownRuleName)
            } else {
                Ok(name)
            }
        }
        _ => Err(RuleError::UnknownRuleName),
    }
}

fn read_text(env: &Table, tag: &str) -> Result<String, RuleError> {
    match env.get::<mlua::Value>(tag) {
        Ok(mlua::Value::Nil) => Ok(String::new()),
        Ok(mlua::Value::String(s)) => Ok(s.to_string_lossy().to_string()),
        _ => Err(RuleError::MalformedDefinition),
    }
}

fn read_version(env: &Table) -> Result<Version, RuleError> {
    let version = match env.get::<mlua::Value>(TAG_VERSION) {
        Ok(mlua::Value::Nil) => return Ok(Version::default()),
        Ok(mlua::Value::Integer(i)) => Version::new(i as f64),
        Ok(mlua::Value::Number(n)) => Version::new(n),
        Ok(mlua::Value::String(s)) => s.to_string_lossy().parse().ok(),
        _ => None,
    };
    version.ok_or(RuleError::MalformedDefinition)
}

fn read_rely_on(env: &Table) -> Result<BTreeMap<String, String>, RuleError> {
    match env.get::<mlua::Value>(TAG_RELY_ON) {
        Ok(mlua::Value::Nil) => Ok(BTreeMap::new()),
        Ok(mlua::Value::Table(table)) => {
            let mut rely_on = BTreeMap::new();
            for pair in table.pairs::<mlua::Value, mlua::Value>() {
                match pair {
                    Ok((mlua::Value::String(k), mlua::Value::String(v))) => {
                        rely_on.insert(
                            k.to_string_lossy().to_string(),
                            v.to_string_lossy().to_string(),
                        );
                    }
                    _ => return Err(RuleError::DependencyFormat),
                }
            }
            Ok(rely_on)
        }
        Ok(mlua::Value::String(s)) => {
            serde_json::from_str(&s.to_string_lossy()).map_err(|_| RuleError::DependencyFormat)
        }
        _ => Err(RuleError::DependencyFormat),
    }
}

fn read_params(lua: &Lua, env: &Table) -> Result<BTreeMap<String, Value>, RuleError> {
    let raw: serde_json::Value = match env.get::<mlua::Value>(TAG_PARAMS) {
        Ok(mlua::Value::Nil) => return Ok(BTreeMap::new()),
        Ok(table @ mlua::Value::Table(_)) => {
            lua.from_value(table).map_err(|_| RuleError::DependencyFormat)?
        }
        Ok(mlua::Value::String(s)) => {
            serde_json::from_str(&s.to_string_lossy()).map_err(|_| RuleError::DependencyFormat)?
        }
        _ => return Err(RuleError::DependencyFormat),
    };
    match raw {
        serde_json::Value::Object(map) => {
            Ok(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
        }
        // an empty Lua table reads back as an empty array
        serde_json::Value::Array(items) if items.is_empty() => Ok(BTreeMap::new()),
        _ => Err(RuleError::DependencyFormat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_text(text: &str) -> Result<Info, RuleError> {
        parse(&Lua::new(), text, RuleType::Lua)
    }

    #[test]
    fn test_split_requires_marker_and_descriptor() {
        assert!(matches!(split("return 1"), Err(RuleError::UnknownRuleName)));
        assert!(matches!(split("  \n--body--\nreturn 1"), Err(RuleError::UnknownRuleName)));
        let (head, body) = split("rule_name = 'a'\n--body--\nreturn 1").unwrap();
        assert_eq!(head, "rule_name = 'a'\n");
        assert_eq!(body, "\nreturn 1");
    }

    #[test]
    fn test_parse_full_descriptor() {
        let info = parse_text(
            r#"
rule_name = "disk_check"
rule_description = "alerts on full disks"
rule_author = "ops"
rule_version = 2.5
rule_rely_on = { ["disk@1"] = "disk", notify = "notify" }
rule_params = { threshold = 90, mount = "/" }
--body--
return nil
"#,
        )
        .unwrap();

        assert_eq!(info.name(), "disk_check");
        assert_eq!(info.description(), "alerts on full disks");
        assert_eq!(info.author(), "ops");
        assert_eq!(info.version(), Version::new(2.5).unwrap());
        assert_eq!(info.key(), "disk_check@2.5");
        assert_eq!(info.rely_on()["disk@1"], "disk");
        assert_eq!(info.rely_on()["notify"], "notify");
        assert_eq!(info.params()["threshold"], Value::from(90_i64));
        assert_eq!(info.params()["mount"], Value::from("/"));
    }

    #[test]
    fn test_json_shaped_maps_and_default_version() {
        let info = parse_text(
            r#"
rule_name = "json_maps"
rule_rely_on = '{"disk": "d"}'
rule_params = '{"limit": 3}'
--body--
"#,
        )
        .unwrap();
        assert_eq!(info.version(), Version::default());
        assert_eq!(info.rely_on()["disk"], "d");
        assert_eq!(info.params()["limit"], Value::from(3_i64));
    }

    #[test]
    fn test_missing_or_blank_name() {
        let err = parse_text("rule_version = 1\n--body--\n").unwrap_err();
        assert!(matches!(err, RuleError::UnknownRuleName));
        let err = parse_text("rule_name = '   '\n--body--\n").unwrap_err();
        assert!(matches!(err, RuleError::UnknownRuleName));
    }

    #[test]
    fn test_rely_on_must_be_string_map() {
        let err = parse_text("rule_name = 'x'\nrule_rely_on = { 1, 2 }\n--body--\n").unwrap_err();
        assert!(matches!(err, RuleError::DependencyFormat));
        let err = parse_text("rule_name = 'x'\nrule_rely_on = { disk = 5 }\n--body--\n").unwrap_err();
        assert!(matches!(err, RuleError::DependencyFormat));
        let err = parse_text("rule_name = 'x'\nrule_rely_on = 'not json'\n--body--\n").unwrap_err();
        assert!(matches!(err, RuleError::DependencyFormat));
    }

    #[test]
    fn test_params_must_be_map_shaped() {
        let err = parse_text("rule_name = 'x'\nrule_params = 7\n--body--\n").unwrap_err();
        assert!(matches!(err, RuleError::DependencyFormat));
        let err = parse_text("rule_name = 'x'\nrule_params = '[1, 2]'\n--body--\n").unwrap_err();
        assert!(matches!(err, RuleError::DependencyFormat));
        let info = parse_text("rule_name = 'x'\nrule_params = {}\n--body--\n").unwrap();
        assert!(info.params().is_empty());
    }

    #[test]
    fn test_runtime_failure_is_malformed_definition() {
        let err = parse_text("rule_name = 'x'\nerror('boom')\n--body--\n").unwrap_err();
        assert!(matches!(err, RuleError::MalformedDefinition));
        let err = parse_text("rule_name = 'x'\nwhile true do end\n--body--\n").unwrap_err();
        assert!(matches!(err, RuleError::MalformedDefinition));
        let err = parse_text("rule_name = 'x'\nrule_version = 'two'\n--body--\n").unwrap_err();
        assert!(matches!(err, RuleError::MalformedDefinition));
    }

    #[test]
    fn test_descriptor_cannot_reach_io() {
        let err = parse_text("rule_name = 'x'\nio.write('hi')\n--body--\n").unwrap_err();
        assert!(matches!(err, RuleError::MalformedDefinition));
    }
}
