//! Plan command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn plan_lists_changes_without_applying() {
  let env = TestEnv::from_fixture("web.json");

  env
    .cairn_cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("+ Create test::network core"))
    .stdout(predicate::str::contains("+ Create test::vm web"))
    .stdout(predicate::str::contains("Changes: 2"));

  assert!(!env.state_dir().join("resources").exists());
  assert!(!env.state_dir().join("cloud.json").exists());
}

#[test]
fn plan_after_up_is_empty() {
  let env = TestEnv::from_fixture("web.json");
  env.cairn_cmd().args(["up", "--yes"]).assert().success();

  env
    .cairn_cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("No changes."));
}

#[test]
fn verbose_plan_shows_fields() {
  let env = TestEnv::from_fixture("web.json");

  env
    .cairn_cmd()
    .args(["plan", "--verbose"])
    .assert()
    .success()
    .stdout(predicate::str::contains("image: 'v1'"));
}

#[test]
fn plan_shows_changed_fields() {
  let env = TestEnv::from_fixture("web.json");
  env.cairn_cmd().args(["up", "--yes"]).assert().success();

  env.use_fixture("web_resized.json");
  env
    .cairn_cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("* Update test::vm web (size)"))
    .stdout(predicate::str::contains("size: 2 -> 4"));
}

#[test]
fn plan_accepts_a_project_path() {
  let env = TestEnv::from_fixture("web.json");
  let nested = env.temp.path().join("infra");
  std::fs::create_dir_all(&nested).unwrap();
  std::fs::copy(&env.project_path, nested.join("prod.json")).unwrap();

  env
    .cairn_cmd()
    .args(["up", "--yes", "infra/prod.json"])
    .assert()
    .success();

  // State lives next to the project it belongs to.
  assert!(nested.join(".cairn").join("state").join("cloud.json").exists());
  env
    .cairn_cmd()
    .args(["plan", "infra/prod.json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No changes."));
}
