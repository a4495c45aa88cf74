use cairn_lib::apply::{ApplyError, ApplyResult};
use cairn_lib::execute::{ExecuteError, Outcome};
use cairn_lib::providers::{NETWORK, VM};
use cairn_lib::scope::{Expr, Location, Node, Project, StageNode, SwapNode, TargetNode, TransitionNode};
use cairn_lib::ui::Answer;
use cairn_lib::value::Value;
use cairn_lib::workflow::{ExecutionRecord, WorkflowError};

use super::common::*;

fn next_name() -> Expr {
  interpolate(vec![var("NAME"), lit("-next")])
}

fn stage(name: &str) -> StageNode {
  StageNode {
    name: name.to_string(),
    body: vec![],
    creates: vec![],
    deletes: vec![],
    swaps: vec![],
    transitions: vec![],
    location: Location::default(),
  }
}

fn to(name: &str, target: &str, description: &str) -> TransitionNode {
  TransitionNode {
    name: name.to_string(),
    to: target.to_string(),
    description: description.to_string(),
  }
}

/// Creates `<name>-next` from the pending values.
fn create_stage(transitions: Vec<TransitionNode>) -> StageNode {
  StageNode {
    creates: vec![resource_named(
      VM,
      next_name(),
      vec![
        pair("image", var("PENDING.image")),
        pair("network", var("PENDING.network")),
      ],
    )],
    transitions,
    ..stage("create")
  }
}

fn swap_next() -> SwapNode {
  SwapNode {
    kind: VM.to_string(),
    x: var("NAME"),
    y: next_name(),
  }
}

fn delete_next() -> TargetNode {
  TargetNode {
    kind: VM.to_string(),
    name: next_name(),
  }
}

fn workflow(stages: Vec<StageNode>) -> Node {
  Node::Workflow {
    name: "blue-green".to_string(),
    for_type: VM.to_string(),
    stages,
    location: Location::default(),
  }
}

/// create -> swap -> cleanup
fn three_stages() -> Node {
  workflow(vec![
    create_stage(vec![to("next", "swap", "")]),
    StageNode {
      swaps: vec![swap_next()],
      transitions: vec![to("next", "cleanup", "")],
      ..stage("swap")
    },
    StageNode {
      deletes: vec![delete_next()],
      ..stage("cleanup")
    },
  ])
}

/// create -> promote, where promote swaps and retires in one step.
fn two_stages() -> Node {
  workflow(vec![
    create_stage(vec![to("next", "promote", "")]),
    StageNode {
      swaps: vec![swap_next()],
      deletes: vec![delete_next()],
      ..stage("promote")
    },
  ])
}

fn project(image: &str, workflow: Node) -> Project {
  single(vec![
    resource(NETWORK, "core", vec![pair("cidr", lit("10.0.0.0/16"))]),
    resource(
      VM,
      "web",
      vec![
        pair("image", lit(image)),
        pair("network", reference(NETWORK, "core", Some("id"))),
      ],
    ),
    workflow,
  ])
}

/// A harness with `web` already running `v1` as `vm-2`.
fn deployed(workflow: Node) -> Harness {
  let h = Harness::new();
  h.up_approved(&project("v1", workflow), vec![]).0.unwrap();
  h.cloud.clear_calls();
  h
}

fn record(h: &Harness) -> Option<ExecutionRecord> {
  ExecutionRecord::load(h.backend.as_ref()).unwrap()
}

fn aborted_at(result: Result<ApplyResult, ApplyError>, expected: &str) {
  match result {
    Err(ApplyError::ChangeFailed {
      source: ExecuteError::Workflow(e),
      ..
    }) => match *e {
      WorkflowError::Aborted { stage, .. } => assert_eq!(stage, expected),
      other => panic!("expected an abort, got {other}"),
    },
    other => panic!("expected a workflow failure, got {other:?}"),
  }
}

#[test]
fn creates_do_not_run_workflows() {
  let h = Harness::new();
  let (result, ui) = h.up_approved(&project("v1", three_stages()), vec![]);
  result.unwrap();
  assert!(!ui.output().contains("Executing stage"));
}

#[test]
fn replacement_runs_every_stage() {
  let h = deployed(three_stages());

  let (result, ui) = h.up(
    &project("v2", three_stages()),
    vec![Answer::Yes, Answer::Yes, Answer::Yes],
  );
  let result = result.unwrap();

  assert_eq!(
    ui.prompts(),
    ["Apply these changes?", "Execute stage create?", "Execute stage cleanup?"]
  );
  assert_eq!(
    result.rounds[0].outcome(&key(VM, "web")),
    Some(Outcome::ReplacedByWorkflow)
  );
  let output = ui.output();
  assert!(output.contains("~ Replacing test::vm web with workflow"));
  assert!(output.contains("Transitioning to stage swap."));
  assert!(output.contains("Workflow blue-green complete."));
  // The run plans again after the workflow and finds nothing left to do.
  assert!(output.contains("No changes."));

  assert_eq!(h.cloud.calls(), ["create test::vm web-next", "delete test::vm web-next"]);
  let state = h.state();
  assert!(state.get(&key(VM, "web-next")).is_none());
  assert_eq!(h.field(&key(VM, "web"), "image"), Value::from("v2"));
  assert_eq!(h.field(&key(VM, "web"), "id"), Value::from("vm-3"));
  assert_eq!(h.field(&key(VM, "web"), "network"), Value::from("network-1"));
  assert_eq!(h.cloud.objects(VM).len(), 1);
  assert!(record(&h).is_none());
}

#[test]
fn stages_without_confirmation_run_unattended() {
  let quiet = || vec![pair("confirm-diff", lit(false))];
  let unattended = workflow(vec![
    StageNode {
      body: quiet(),
      ..create_stage(vec![to("next", "promote", "")])
    },
    StageNode {
      body: quiet(),
      swaps: vec![swap_next()],
      deletes: vec![delete_next()],
      ..stage("promote")
    },
  ]);
  let h = deployed(unattended.clone());

  let (result, ui) = h.up_approved(&project("v2", unattended), vec![]);
  result.unwrap();

  assert!(ui.prompts().is_empty());
  assert_eq!(h.field(&key(VM, "web"), "image"), Value::from("v2"));
}

#[test]
fn declining_a_stage_aborts_the_workflow() {
  let h = deployed(three_stages());

  let (result, _) = h.up(&project("v2", three_stages()), vec![Answer::Yes, Answer::No]);
  aborted_at(result, "create");

  assert!(h.cloud.calls().is_empty());
  assert!(record(&h).is_none());
  assert_eq!(h.field(&key(VM, "web"), "image"), Value::from("v1"));
}

#[test]
fn interrupted_workflows_resume_where_they_stopped() {
  let h = deployed(two_stages());
  let v2 = project("v2", two_stages());

  let (result, _) = h.up(&v2, vec![Answer::Yes, Answer::Yes, Answer::No]);
  aborted_at(result, "promote");

  // The new vm exists, the old one is still live and progress is recorded.
  let saved = record(&h).unwrap();
  assert_eq!(saved.executed_stages, ["create"]);
  assert!(saved.matches(VM, "web", "blue-green"));
  assert!(h.state().get(&key(VM, "web-next")).is_some());
  assert_eq!(h.field(&key(VM, "web"), "image"), Value::from("v1"));
  h.cloud.clear_calls();

  let (result, ui) = h.up(&v2, vec![Answer::Yes, Answer::Yes]);
  result.unwrap();

  assert_eq!(ui.prompts(), ["Resume it?", "Execute stage promote?"]);
  let output = ui.output();
  assert!(output.contains("Resuming workflow blue-green at stage create."));
  assert!(output.contains("Replaying stage create."));

  // Replaying create found web-next already there.
  assert_eq!(h.cloud.calls(), ["delete test::vm web-next"]);
  assert_eq!(h.field(&key(VM, "web"), "image"), Value::from("v2"));
  assert_eq!(h.field(&key(VM, "web"), "id"), Value::from("vm-3"));
  assert!(h.state().get(&key(VM, "web-next")).is_none());
  assert!(record(&h).is_none());
}

#[test]
fn plan_mentions_interrupted_workflows() {
  let h = deployed(two_stages());
  let v2 = project("v2", two_stages());
  let (result, _) = h.up(&v2, vec![Answer::Yes, Answer::Yes, Answer::No]);
  assert!(result.is_err());

  let ui = h.plan(&v2);
  assert!(
    ui.output()
      .contains("Workflow blue-green on test::vm web was interrupted and resumes on the next up.")
  );
}

#[test]
fn stale_records_are_discarded() {
  let h = deployed(three_stages());
  ExecutionRecord {
    kind: VM.to_string(),
    name: "gone".to_string(),
    workflow: "blue-green".to_string(),
    executed_stages: vec!["create".to_string()],
  }
  .save(h.backend.as_ref())
  .unwrap();

  let (result, ui) = h.up_approved(&project("v1", three_stages()), vec![]);
  assert!(result.unwrap().is_noop());
  assert!(!ui.output().contains("Resuming"));
  assert!(record(&h).is_none());
}

/// create -> promote | rollback, asking which at the end of create.
fn branching() -> Node {
  workflow(vec![
    StageNode {
      body: vec![pair("transition-prompt", lit("Promote or roll back?"))],
      ..create_stage(vec![
        to("promote", "promote", "swap the new vm in"),
        to("rollback", "rollback", "throw the new vm away"),
      ])
    },
    StageNode {
      swaps: vec![swap_next()],
      deletes: vec![delete_next()],
      ..stage("promote")
    },
    StageNode {
      deletes: vec![delete_next()],
      ..stage("rollback")
    },
  ])
}

#[test]
fn several_transitions_ask_for_one() {
  let h = deployed(branching());

  let (result, ui) = h.up(
    &project("v2", branching()),
    vec![
      Answer::Yes,
      Answer::Yes,
      Answer::Text("sideways".into()),
      Answer::Text(" rollback ".into()),
      Answer::Yes,
      // Rolling back leaves web on v1, so the next round plans the
      // replacement again.
      Answer::No,
    ],
  );
  // The first round already ran the workflow, so this is not a plain cancel.
  match result {
    Err(ApplyError::DeclinedAfterApply { result }) => {
      assert_eq!(result.rounds.len(), 1);
      assert_eq!(
        result.rounds[0].outcome(&key(VM, "web")),
        Some(Outcome::ReplacedByWorkflow)
      );
    }
    other => panic!("expected a decline after applying, got {other:?}"),
  }

  let output = ui.output();
  assert!(output.contains("Transitions:"));
  assert!(output.contains("  rollback: throw the new vm away"));
  assert!(output.contains("'sideways' is not a valid transition."));
  assert!(output.contains("A workflow changed state. Planning again."));
  assert_eq!(
    ui.prompts().iter().filter(|p| *p == "Promote or roll back?").count(),
    2
  );

  assert_eq!(h.cloud.calls(), ["create test::vm web-next", "delete test::vm web-next"]);
  assert_eq!(h.field(&key(VM, "web"), "image"), Value::from("v1"));
  assert_eq!(h.cloud.objects(VM).len(), 1);
}

#[test]
fn swapping_a_missing_resource_fails() {
  let broken = workflow(vec![StageNode {
    swaps: vec![swap_next()],
    ..stage("swap")
  }]);
  let h = deployed(broken.clone());

  let (result, _) = h.up_approved(&project("v2", broken), vec![]);
  match result {
    Err(ApplyError::ChangeFailed {
      source: ExecuteError::Workflow(e),
      ..
    }) => assert!(matches!(*e, WorkflowError::MissingTarget { ref key, .. } if key.name == "web-next")),
    other => panic!("expected a missing target, got {other:?}"),
  }
  assert_eq!(h.field(&key(VM, "web"), "image"), Value::from("v1"));
}

#[test]
fn stopping_at_a_transition_prompt_resumes_without_rerunning_the_stage() {
  let h = deployed(branching());
  let v2 = project("v2", branching());

  // Input runs out when the transition is asked for.
  let (result, _) = h.up(&v2, vec![Answer::Yes, Answer::Yes]);
  assert!(matches!(
    result,
    Err(ApplyError::ChangeFailed {
      source: ExecuteError::Workflow(_),
      ..
    })
  ));

  let saved = record(&h).unwrap();
  assert_eq!(saved.executed_stages, ["create"]);
  assert!(h.state().get(&key(VM, "web-next")).is_some());
  assert_eq!(h.cloud.calls(), ["create test::vm web-next"]);
  h.cloud.clear_calls();

  let (result, ui) = h.up(
    &v2,
    vec![Answer::Yes, Answer::Text("promote".into()), Answer::Yes],
  );
  result.unwrap();

  assert_eq!(
    ui.prompts(),
    ["Resume it?", "Promote or roll back?", "Execute stage promote?"]
  );
  assert!(ui.output().contains("Replaying stage create."));
  assert_eq!(h.cloud.calls(), ["delete test::vm web-next"]);
  assert_eq!(h.field(&key(VM, "web"), "image"), Value::from("v2"));
  assert_eq!(h.field(&key(VM, "web"), "id"), Value::from("vm-3"));
  assert!(h.state().get(&key(VM, "web-next")).is_none());
  assert!(record(&h).is_none());
}
