use cairn_lib::apply::ApplyError;
use cairn_lib::diff::ChangeKind;
use cairn_lib::execute::{ExecuteError, Outcome};
use cairn_lib::providers::{DATABASE, NETWORK, SERVICE, VM};
use cairn_lib::scope::{Node, Project};
use cairn_lib::state::{LockBackend, LockError};
use cairn_lib::ui::Answer;
use cairn_lib::value::Value;

use super::common::*;

fn core_network() -> Node {
  resource(NETWORK, "core", vec![pair("cidr", lit("10.0.0.0/16"))])
}

fn web_vm(image: &str, size: i64) -> Node {
  resource(
    VM,
    "web",
    vec![
      pair("image", lit(image)),
      pair("size", lit(size)),
      pair("network", reference(NETWORK, "core", Some("id"))),
    ],
  )
}

fn web_project(image: &str, size: i64) -> Project {
  single(vec![web_vm(image, size), core_network()])
}

fn position(calls: &[String], call: &str) -> usize {
  calls
    .iter()
    .position(|c| c == call)
    .unwrap_or_else(|| panic!("no call '{call}' in {calls:?}"))
}

#[test]
fn creates_dependencies_first() {
  let h = Harness::new();
  let (result, ui) = h.up(&web_project("v1", 2), vec![Answer::Yes]);
  let result = result.unwrap();

  assert_eq!(result.applied(), 2);
  assert!(ui.output().contains("+ Create test::network core"));
  assert!(ui.output().contains("2 applied, 0 skipped."));
  assert_eq!(ui.prompts(), ["Apply these changes?"]);

  let calls = h.cloud.calls();
  assert!(position(&calls, "create test::network core") < position(&calls, "create test::vm web"));

  // The late-bound network id was filled in once the network existed.
  let network_id = h.field(&key(NETWORK, "core"), "id");
  assert_eq!(network_id, Value::from("network-1"));
  assert_eq!(h.field(&key(VM, "web"), "network"), network_id);
  assert!(h.cloud.contains("vm-2"));
}

#[test]
fn second_run_is_a_noop() {
  let h = Harness::new();
  let project = web_project("v1", 2);
  h.up_approved(&project, vec![]).0.unwrap();
  h.cloud.clear_calls();

  let (result, ui) = h.up(&project, vec![]);
  assert!(result.unwrap().is_noop());
  assert!(ui.output().contains("No changes."));
  assert!(ui.prompts().is_empty());
  assert!(h.cloud.calls().is_empty());
}

#[test]
fn plan_changes_nothing() {
  let h = Harness::new();
  let ui = h.plan(&web_project("v1", 2));

  assert!(ui.output().contains("+ Create test::vm web"));
  assert!(h.cloud.is_empty());
  assert!(h.state().graph().is_empty());
}

#[test]
fn updatable_fields_update_in_place() {
  let h = Harness::new();
  h.up_approved(&web_project("v1", 2), vec![]).0.unwrap();
  h.cloud.clear_calls();

  let (result, ui) = h.up_approved(&web_project("v1", 4), vec![]);
  let result = result.unwrap();

  assert!(ui.output().contains("* Update test::vm web (size)"));
  assert_eq!(result.rounds[0].outcome(&key(VM, "web")), Some(Outcome::Updated));
  assert_eq!(h.cloud.calls(), ["update test::vm web"]);
  assert_eq!(h.field(&key(VM, "web"), "size"), Value::Int(4));
  assert_eq!(h.field(&key(VM, "web"), "id"), Value::from("vm-2"));
}

#[test]
fn immutable_fields_replace_create_first() {
  let h = Harness::new();
  h.up_approved(&web_project("v1", 2), vec![]).0.unwrap();
  h.cloud.clear_calls();

  let (result, ui) = h.up_approved(&web_project("v2", 2), vec![]);
  let result = result.unwrap();

  assert!(ui.output().contains("~ Replace test::vm web (image)"));
  assert_eq!(result.rounds[0].outcome(&key(VM, "web")), Some(Outcome::Replaced));
  assert_eq!(h.cloud.calls(), ["create test::vm web", "delete test::vm web"]);
  assert!(!h.cloud.contains("vm-2"));
  assert!(h.cloud.contains("vm-3"));
  assert_eq!(h.field(&key(VM, "web"), "image"), Value::from("v2"));
}

#[test]
fn delete_before_create_types_replace_in_that_order() {
  let h = Harness::new();
  let database = |engine: &str| single(vec![resource(DATABASE, "db", vec![pair("engine", lit(engine))])]);
  h.up_approved(&database("postgres"), vec![]).0.unwrap();
  h.cloud.clear_calls();

  h.up_approved(&database("mysql"), vec![]).0.unwrap();

  assert_eq!(h.cloud.calls(), ["delete test::database db", "create test::database db"]);
  assert_eq!(h.cloud.objects(DATABASE).len(), 1);
  assert_eq!(h.field(&key(DATABASE, "db"), "arn"), Value::from("database-2"));
}

#[test]
fn failed_create_after_delete_leaves_nothing_in_state() {
  let h = Harness::new();
  let database = |engine: &str| single(vec![resource(DATABASE, "db", vec![pair("engine", lit(engine))])]);
  h.up_approved(&database("postgres"), vec![]).0.unwrap();
  h.cloud.fail_on(ChangeKind::Create, key(DATABASE, "db"));

  let (result, _) = h.up_approved(&database("mysql"), vec![]);
  assert!(matches!(
    result,
    Err(ApplyError::ChangeFailed {
      source: ExecuteError::Hook {
        action: ChangeKind::Create,
        ..
      },
      ..
    })
  ));
  assert!(h.cloud.objects(DATABASE).is_empty());
  assert!(h.state().get(&key(DATABASE, "db")).is_none());

  h.cloud.clear_calls();
  h.up_approved(&database("mysql"), vec![]).0.unwrap();
  assert_eq!(h.cloud.calls(), ["create test::database db"]);
  assert_eq!(h.field(&key(DATABASE, "db"), "engine"), Value::from("mysql"));
}

#[test]
fn unretired_replacements_are_reported_as_orphans() {
  let h = Harness::new();
  h.up_approved(&web_project("v1", 2), vec![]).0.unwrap();
  h.cloud.fail_on(ChangeKind::Delete, key(VM, "web"));

  let (result, ui) = h.up_approved(&web_project("v2", 2), vec![]);
  let Err(ApplyError::ChangeFailed { key: failed, result, .. }) = result else {
    panic!("expected a failed retirement");
  };
  assert_eq!(failed, key(VM, "web"));

  let orphaned = &result.rounds[0].orphaned;
  assert_eq!(orphaned.len(), 1);
  assert_eq!(orphaned[0].get("id"), &Value::from("vm-2"));
  assert!(
    ui.output()
      .contains("! The replaced object of test::vm web was not deleted and is no longer tracked")
  );

  // State follows the new object; the old one is still out there.
  assert_eq!(h.field(&key(VM, "web"), "id"), Value::from("vm-3"));
  assert!(h.cloud.contains("vm-2"));
  assert!(h.cloud.contains("vm-3"));
}

#[test]
fn removed_resources_are_deleted_dependents_first() {
  let h = Harness::new();
  h.up_approved(&web_project("v1", 2), vec![]).0.unwrap();
  h.cloud.clear_calls();

  let (result, ui) = h.up_approved(&single(vec![]), vec![]);
  result.unwrap();

  assert!(ui.output().contains("- Delete test::vm web"));
  assert_eq!(h.cloud.calls(), ["delete test::vm web", "delete test::network core"]);
  assert!(h.cloud.is_empty());
  assert!(h.state().graph().is_empty());
}

#[test]
fn objects_deleted_outside_are_recreated() {
  let h = Harness::new();
  h.up_approved(&web_project("v1", 2), vec![]).0.unwrap();
  h.cloud.forget("network-1");

  let ui = h.plan(&web_project("v1", 2));
  assert!(ui.output().contains("+ Create test::network core"));
  assert!(ui.output().contains("* Update test::vm web (network)"));

  h.up_approved(&web_project("v1", 2), vec![]).0.unwrap();
  assert_eq!(h.field(&key(NETWORK, "core"), "id"), Value::from("network-3"));
  assert_eq!(h.field(&key(VM, "web"), "network"), Value::from("network-3"));
}

#[test]
fn drift_is_corrected() {
  let h = Harness::new();
  h.up_approved(&web_project("v1", 2), vec![]).0.unwrap();
  h.cloud.drift("vm-2", "size", Value::Int(16));

  let ui = h.plan(&web_project("v1", 2));
  assert!(ui.output().contains("* Update test::vm web (size)"));

  h.up_approved(&web_project("v1", 2), vec![]).0.unwrap();
  assert_eq!(h.cloud.object("vm-2").unwrap()["size"], Value::Int(2));
}

#[test]
fn failures_keep_applied_changes_and_skip_the_rest() {
  let h = Harness::new();
  let project = single(vec![
    core_network(),
    web_vm("v1", 2),
    resource(
      SERVICE,
      "api",
      vec![pair("image", lit("api:1")), pair("vm", reference(VM, "web", Some("id")))],
    ),
  ]);
  h.cloud.fail_on(ChangeKind::Create, key(VM, "web"));

  let (result, ui) = h.up_approved(&project, vec![]);
  match result {
    Err(ApplyError::ChangeFailed {
      key: failed,
      source,
      result,
    }) => {
      assert_eq!(failed, key(VM, "web"));
      assert!(matches!(source, ExecuteError::Hook { action: ChangeKind::Create, .. }));
      assert_eq!(result.applied(), 1);
      assert_eq!(result.rounds[0].skipped, [key(SERVICE, "api")]);
    }
    other => panic!("expected a failed change, got {other:?}"),
  }
  assert!(ui.output().contains("1 applied, 1 skipped."));

  let state = h.state();
  assert!(state.get(&key(NETWORK, "core")).is_some());
  assert!(state.get(&key(VM, "web")).is_none());
  assert!(state.get(&key(SERVICE, "api")).is_none());

  // The failure was one-off; the next run picks up where this one stopped.
  h.cloud.clear_calls();
  h.up_approved(&project, vec![]).0.unwrap();
  assert!(!h.cloud.calls().contains(&"create test::network core".to_string()));
  assert_eq!(h.field(&key(SERVICE, "api"), "vm"), Value::from("vm-2"));
}

#[test]
fn pending_resources_are_waited_for() {
  let h = Harness::new();
  let project = single(vec![resource(SERVICE, "api", vec![pair("image", lit("api:1"))])]);

  let (result, ui) = h.up_approved(&project, vec![]);
  result.unwrap();

  assert!(ui.output().contains("test::service api is pending"));
  let ready_checks = h
    .cloud
    .calls()
    .iter()
    .filter(|c| *c == "ready test::service api")
    .count();
  assert_eq!(ready_checks, 2);
  assert!(h.state().get(&key(SERVICE, "api")).is_some());
}

#[test]
fn declining_applies_nothing() {
  let h = Harness::new();
  let (result, _) = h.up(&web_project("v1", 2), vec![Answer::No]);

  assert!(matches!(result, Err(ApplyError::Declined)));
  assert!(h.cloud.calls().is_empty());
  assert!(h.state().graph().is_empty());
}

#[test]
fn held_lock_blocks_up() {
  let h = Harness::new();
  h.locks.lock("other", "someone else").unwrap();

  let (result, _) = h.up_approved(&web_project("v1", 2), vec![]);
  assert!(matches!(result, Err(ApplyError::Lock(LockError::Contention { .. }))));
  assert!(h.cloud.is_empty());

  h.locks.unlock("other").unwrap();
  h.up_approved(&web_project("v1", 2), vec![]).0.unwrap();
}

#[test]
fn lock_is_released_after_failure() {
  let h = Harness::new();
  let (result, _) = h.up(&web_project("v1", 2), vec![Answer::No]);
  assert!(result.is_err());
  assert!(h.locks.holder().unwrap().is_none());
}

#[test]
fn resolve_errors_stop_before_any_change() {
  let h = Harness::new();
  let project = single(vec![resource(
    VM,
    "web",
    vec![pair("image", lit("v1")), pair("network", reference(NETWORK, "missing", Some("id")))],
  )]);

  let (result, _) = h.up_approved(&project, vec![]);
  assert!(matches!(result, Err(ApplyError::Resolve(_))));
  assert!(h.cloud.calls().is_empty());
}
