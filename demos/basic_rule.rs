//! A small end-to-end tour of Pedestal.
//!
//! This demo:
//! - Registers two versions of an action
//! - Adds a rule that depends on it and reports a logical failure
//! - Runs the rule once through the worker pool
//! - Schedules it every 200ms and lets it tick a few times

use pedestal::prelude::*;
use std::time::Duration;

// ============================================================================
// Step 1: Actions
// ============================================================================

/// Pretend disk probe. Version 2 reports a fuller disk than version 1.
fn disk_probe(version: u32, usage: i64) -> std::sync::Arc<dyn Action> {
    FnAction::new("disk", Version::major(version), move |params: &[Value]| {
        let mount = params
            .first()
            .and_then(Value::as_str)
            .unwrap_or("/")
            .to_string();
        let mut out = Outputs::new();
        out.insert("mount".to_string(), Value::from(mount));
        out.insert("usage".to_string(), Value::from(usage));
        Ok(out)
    })
    .with_description("reports disk usage in percent")
    .shared()
}

// ============================================================================
// Step 2: The rule
// ============================================================================

const DISK_RULE: &str = r#"
rule_name = "disk_check"
rule_description = "fails when a mount is nearly full"
rule_author = "ops"
rule_rely_on = { disk = "disk" }
rule_params = { mount = "/", threshold = 90 }
--body--
local out, err = disk(mount)
if out == nil then
    fail("probe failed: " .. err)
    return
end
usage = out.usage
if usage > threshold then
    fail(string.format("%s is %d%% full", out.mount, usage))
end
"#;

#[tokio::main]
async fn main() -> Result<(), PedestalError> {
    let pedestal = Pedestal::new(ExecutorConfig::default().with_max_pool_size(2))?;
    pedestal.registry().register(disk_probe(1, 40));
    pedestal.registry().register(disk_probe(2, 97));

    for info in pedestal.list_actions() {
        println!("[actions] {}@{}: {}", info.name, info.version, info.description);
    }

    let key = pedestal.add_rule(DISK_RULE, RuleType::Lua)?;
    println!("[rules] added {key}");
    pedestal.start()?;

    // ========================================================================
    // Step 3: Run once
    // ========================================================================

    let mut params = Params::new();
    params.insert("mount".to_string(), Value::from("/var"));
    let id = pedestal.run_rule("disk_check", VersionReq::Latest, params)?;

    let task = pedestal
        .executor()
        .get_task(&id)
        .expect("task was just added");
    while !task.status().is_finished() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    println!("[once] task {} -> {}", id, task.status());
    if let Some(err) = task.error() {
        println!("[once] error: {err}");
    }

    // ========================================================================
    // Step 4: Run on a schedule
    // ========================================================================

    let rule = pedestal
        .rules()
        .instantiate("disk_check", VersionReq::Latest)
        .expect("rule was just added")?;
    let cycle_id = pedestal
        .executor()
        .add_scheduled_task("@every 200ms", rule, Params::new(), None)?;

    tokio::time::sleep(Duration::from_millis(700)).await;
    if let Some(task) = pedestal.executor().get_task(&cycle_id) {
        println!("[cycle] {} ran {} times, last status {}", cycle_id, task.runs(), task.status());
    }

    pedestal.executor().remove_task(&cycle_id);
    println!("[clean] removed {} finished tasks", pedestal.executor().clean());
    pedestal.stop()?;
    Ok(())
}
