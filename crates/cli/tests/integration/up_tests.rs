//! Up command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn up_creates_resources() {
  let env = TestEnv::from_fixture("web.json");

  env
    .cairn_cmd()
    .args(["up", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("+ Create test::network core"))
    .stdout(predicate::str::contains("+ Creating test::vm web"))
    .stdout(predicate::str::contains("2 applied, 0 skipped."))
    .stdout(predicate::str::contains("Changes applied: 2"));

  assert!(env.state_dir().join("cloud.json").exists());
  assert!(env.state_dir().join("resources").exists());
  assert!(!env.state_dir().join(".lock").exists(), "lock should be released");
}

#[test]
fn up_is_idempotent() {
  let env = TestEnv::from_fixture("web.json");

  env.cairn_cmd().args(["up", "--yes"]).assert().success();

  env
    .cairn_cmd()
    .args(["up", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No changes."))
    .stdout(predicate::str::contains("Everything is up to date."));
}

#[test]
fn up_reads_confirmation_from_stdin() {
  let env = TestEnv::from_fixture("web.json");

  env
    .cairn_cmd()
    .arg("up")
    .write_stdin("n\n")
    .assert()
    .success()
    .stderr(predicate::str::contains("Apply cancelled."));
  assert!(!env.state_dir().join("resources").exists());

  env
    .cairn_cmd()
    .arg("up")
    .write_stdin("y\n")
    .assert()
    .success()
    .stdout(predicate::str::contains("Up complete!"));
}

#[test]
fn up_without_an_answer_fails() {
  let env = TestEnv::from_fixture("web.json");

  env
    .cairn_cmd()
    .arg("up")
    .write_stdin("")
    .assert()
    .failure()
    .stderr(predicate::str::contains("--yes"));
}

#[test]
fn up_updates_in_place() {
  let env = TestEnv::from_fixture("web.json");
  env.cairn_cmd().args(["up", "--yes"]).assert().success();

  env.use_fixture("web_resized.json");
  env
    .cairn_cmd()
    .args(["up", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("* Update test::vm web (size)"))
    .stdout(predicate::str::contains("* Updating test::vm web"));
}

#[test]
fn up_deletes_removed_resources() {
  let env = TestEnv::from_fixture("web.json");
  env.cairn_cmd().args(["up", "--yes"]).assert().success();

  env.use_fixture("empty.json");
  env
    .cairn_cmd()
    .args(["up", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("- Delete test::vm web"))
    .stdout(predicate::str::contains("- Delete test::network core"));

  env
    .cairn_cmd()
    .arg("state")
    .assert()
    .success()
    .stdout(predicate::str::contains("No resources in state"));
}

#[test]
fn up_reports_unresolved_references_with_location() {
  let env = TestEnv::from_fixture("unresolved.json");

  env
    .cairn_cmd()
    .args(["up", "--yes"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("main.cairn:4:12"));
  assert!(!env.state_dir().join("cloud.json").exists());
}

#[test]
fn up_rejects_malformed_projects() {
  let env = TestEnv::from_fixture("malformed.json");

  env
    .cairn_cmd()
    .args(["up", "--yes"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("invalid project"));
}

#[test]
fn up_waits_for_pending_resources() {
  let env = TestEnv::from_fixture("service.json");

  env
    .cairn_cmd()
    .args(["up", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("test::service api is pending"))
    .stdout(predicate::str::contains("1 applied, 0 skipped."));
}

#[test]
fn up_replaces_through_workflow() {
  let env = TestEnv::from_fixture("blue_green.json");
  env.cairn_cmd().args(["up", "--yes"]).assert().success();

  env.use_fixture("blue_green_v2.json");
  env
    .cairn_cmd()
    .args(["up", "--yes"])
    .assert()
    .success()
    .stdout(predicate::str::contains("~ Replace test::vm web (image)"))
    .stdout(predicate::str::contains("~ Replacing test::vm web with workflow"))
    .stdout(predicate::str::contains("Workflow blue-green complete."));

  env
    .cairn_cmd()
    .arg("state")
    .assert()
    .success()
    .stdout(predicate::str::contains("image: 'v2'"))
    .stdout(predicate::str::contains("web-next").not());
}

const STALE_LOCK: &str = r#"{
  "version": 1,
  "id": "stale1",
  "pid": 1,
  "started_at_unix": 0,
  "info": "up: applying 2 changes"
}"#;

#[test]
fn held_lock_blocks_up_until_unlocked() {
  let env = TestEnv::from_fixture("web.json");
  env.write_state_file(".lock", STALE_LOCK);

  env
    .cairn_cmd()
    .args(["up", "--yes"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("cairn unlock stale1"));

  env
    .cairn_cmd()
    .args(["unlock", "stale1"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Released lock stale1"))
    .stdout(predicate::str::contains("up: applying 2 changes"));

  env.cairn_cmd().args(["up", "--yes"]).assert().success();
}

#[test]
fn unlock_refuses_another_holders_lock() {
  let env = TestEnv::from_fixture("web.json");
  env.write_state_file(".lock", STALE_LOCK);

  env
    .cairn_cmd()
    .args(["unlock", "someone-else"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("--force"));
  assert!(env.state_dir().join(".lock").exists());

  env
    .cairn_cmd()
    .args(["unlock", "someone-else", "--force"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Removed lock stale1"));
  assert!(!env.state_dir().join(".lock").exists());
}

#[test]
fn state_dir_flag_overrides_the_default() {
  let env = TestEnv::from_fixture("web.json");
  let custom = env.temp.path().join("elsewhere");

  env
    .cairn_cmd()
    .args(["up", "--yes", "--state-dir"])
    .arg(&custom)
    .assert()
    .success();

  assert!(custom.join("cloud.json").exists());
  assert!(!env.state_dir().exists());
}
