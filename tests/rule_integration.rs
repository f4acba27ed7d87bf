//! Integration tests for the registry, rule parsing and rule execution
//! through the public API.

use pedestal::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn tagged(name: &str, version: u32) -> Arc<dyn Action> {
    let tag = format!("{name}@{version}");
    FnAction::new(name, Version::major(version), move |_: &[Value]| {
        let mut out = Outputs::new();
        out.insert("from".to_string(), Value::from(tag.as_str()));
        Ok(out)
    })
    .shared()
}

fn executor(registry: &Arc<Registry>) -> BuiltInExecutor {
    BuiltInExecutor::new(Arc::clone(registry), ExecutorConfig::new().with_max_pool_size(1)).unwrap()
}

#[test]
fn test_registry_versions() {
    let registry = Registry::new();
    registry.register(tagged("A", 1));
    registry.register(tagged("A", 2));

    assert_eq!(registry.get("A", VersionReq::Latest).unwrap().key(), "A@2");
    assert_eq!(registry.get("A", Version::major(1).into()).unwrap().key(), "A@1");
    assert_eq!(registry.check_exist(&["A@1", "B"]), vec!["B".to_string()]);

    assert!(registry.remove("A", VersionReq::Latest));
    assert!(registry.get("A", VersionReq::Latest).is_none());
    assert!(registry.get("A", Version::major(1).into()).is_none());
}

#[test]
fn test_rule_text_errors() {
    let err = new_rule(RuleType::Lua, "rule_name = 'no marker'\nreturn 1\n").unwrap_err();
    assert_eq!(err.to_string(), "unknown rule name");

    let err = new_rule(
        RuleType::Lua,
        "rule_name = 'bad'\nrule_rely_on = { [1] = 'disk' }\n--body--\n",
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "dependency format error");

    let err = new_rule(RuleType::Lua, "rule_name = 'bad'\nlocal t = nil; t.x = 1\n--body--\n")
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "malformed definition in the rule description section"
    );

    assert!("python".parse::<RuleType>().is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pinned_dependency_binds_exact_version() {
    let registry = Arc::new(Registry::new());
    registry.register(tagged("A", 1));
    registry.register(tagged("A", 2));
    let executor = executor(&registry);

    let rule = new_rule(
        RuleType::Lua,
        r#"
rule_name = "pinned"
rule_rely_on = { ["A@1"] = "old", A = "new" }
--body--
old_from = old().from
new_from = new().from
"#,
    )
    .unwrap();
    let (id, result) = executor.execute(rule, Params::new(), None);
    result.unwrap();

    let task = executor.get_task(&id).unwrap();
    task.inspect(|rule| {
        assert_eq!(rule.get("old_from").unwrap(), Value::from("A@1"));
        assert_eq!(rule.get("new_from").unwrap(), Value::from("A@2"));
    });
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fail_stops_later_action_calls() {
    let registry = Arc::new(Registry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    registry.register(
        FnAction::new("notify", Version::major(1), move |_: &[Value]| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(Outputs::new())
        })
        .shared(),
    );
    let executor = executor(&registry);

    let rule = new_rule(
        RuleType::Lua,
        r#"
rule_name = "guard"
rule_rely_on = { notify = "notify" }
rule_params = { usage = 50 }
--body--
if usage > 80 then fail("usage " .. usage .. " over limit") end
notify()
"#,
    )
    .unwrap();

    let mut params = Params::new();
    params.insert("usage".to_string(), Value::from(95_i64));
    let (_, result) = executor.execute(rule, params, None);

    let err = result.unwrap_err();
    assert!(matches!(
        &err,
        ExecutorError::RuleFailed { error: RuleError::Logical(m), .. } if m == "usage 95 over limit"
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_defaults_apply_without_params() {
    let registry = Arc::new(Registry::new());
    let executor = executor(&registry);
    let rule = new_rule(
        RuleType::Lua,
        "rule_name = 'defaults'\nrule_params = { greeting = 'hi', times = 2 }\n--body--\nout = string.rep(greeting, times)\n",
    )
    .unwrap();

    let (id, result) = executor.execute(rule, Params::new(), None);
    result.unwrap();
    let out = executor
        .get_task(&id)
        .unwrap()
        .inspect(|rule| rule.get("out").unwrap());
    assert_eq!(out, Value::from("hihi"));
}

#[test]
fn test_value_string_form_restores_kind() {
    let value = Value::new(serde_json::json!({"mount": "/", "usage": 0.93}));
    let text = value.to_string();
    assert_eq!(Value::parse(value.kind(), &text).unwrap(), value);
}
