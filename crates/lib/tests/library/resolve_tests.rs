use std::collections::BTreeMap;

use cairn_lib::providers::{MemoryCloud, NETWORK, SERVICE, VM, test_registry};
use cairn_lib::scope::{CompareOp, Evaluation, Expr, Location, Node, Project, ResolveError};
use cairn_lib::value::{Link, Value};

use super::common::*;

fn network(name: &str) -> Node {
  resource(NETWORK, name, vec![pair("cidr", lit("10.0.0.0/16"))])
}

#[test]
fn forward_references_resolve() {
  let project = single(vec![
    resource(
      VM,
      "web",
      vec![
        pair("image", lit("v1")),
        pair("network", reference(NETWORK, "core", Some("id"))),
      ],
    ),
    network("core"),
  ]);

  let evaluation = evaluate(&project).unwrap();
  let web = evaluation.graph.get(&key(VM, "web")).unwrap();
  let core = evaluation.graph.get(&key(NETWORK, "core")).unwrap();

  assert!(web.dependencies.contains(&key(NETWORK, "core")));
  assert!(core.dependents.contains(&key(VM, "web")));
  // The network id is generated on create, so the link stays late-bound.
  assert_eq!(
    web.get("network"),
    &Value::Link(Link {
      target: key(NETWORK, "core"),
      attribute: Some("id".into()),
    })
  );
}

#[test]
fn unresolved_reference_names_its_location() {
  let project = single(vec![resource(
    VM,
    "web",
    vec![pair("image", lit("v1")), pair("network", reference_at(NETWORK, "missing", 7))],
  )]);

  let err = evaluate(&project).unwrap_err();
  assert!(matches!(err, ResolveError::Unresolved { ref location, .. } if location.line == 7));
  assert!(err.to_string().contains("main:7:1"));
  assert!(err.to_string().contains("test::network missing"));
}

#[test]
fn retry_budget_is_enforced() {
  let project = single(vec![
    resource(SERVICE, "api", vec![pair("image", lit("api:1")), pair("vm", reference(VM, "web", Some("name")))]),
    resource(VM, "web", vec![pair("image", lit("v1")), pair("network", reference(NETWORK, "core", Some("id")))]),
    network("core"),
  ]);

  let registry = test_registry(&MemoryCloud::new());
  let err = Evaluation::evaluate(&project, &registry, 1).unwrap_err();
  assert!(matches!(err, ResolveError::RetryBudgetExhausted { passes: 1, .. }));

  assert!(Evaluation::evaluate(&project, &registry, 3).is_ok());
}

#[test]
fn duplicate_resources_are_rejected() {
  let project = single(vec![network("core"), network("core")]);
  assert!(matches!(
    evaluate(&project),
    Err(ResolveError::DuplicateResource { ref key, .. }) if key.name == "core"
  ));
}

#[test]
fn unknown_fields_and_type_mismatches_fail() {
  let project = single(vec![resource(NETWORK, "core", vec![pair("colour", lit("red"))])]);
  assert!(matches!(evaluate(&project), Err(ResolveError::UnknownField { .. })));

  let project = single(vec![resource(
    VM,
    "web",
    vec![pair("image", lit("v1")), pair("size", lit("big"))],
  )]);
  assert!(matches!(evaluate(&project), Err(ResolveError::TypeMismatch { ref field, .. }) if field == "size"));

  let project = single(vec![resource(NETWORK, "core", vec![pair("id", lit("n-1"))])]);
  assert!(matches!(evaluate(&project), Err(ResolveError::TypeMismatch { ref field, .. }) if field == "id"));
}

#[test]
fn required_fields_reject_null() {
  let project = single(vec![resource(NETWORK, "core", vec![pair("cidr", lit(Value::Null))])]);
  assert!(matches!(evaluate(&project), Err(ResolveError::TypeMismatch { .. })));
}

#[test]
fn for_loops_generate_independent_resources() {
  let project = single(vec![Node::For {
    variables: vec!["name".into(), "size".into()],
    items: list(vec![lit("a"), lit(1), lit("b"), lit(2)]),
    body: vec![resource_named(
      VM,
      var("name"),
      vec![pair("image", lit("v1")), pair("size", var("size"))],
    )],
    location: Location::default(),
  }]);

  let evaluation = evaluate(&project).unwrap();
  assert_eq!(evaluation.graph.get(&key(VM, "a")).unwrap().get("size"), &Value::Int(1));
  assert_eq!(evaluation.graph.get(&key(VM, "b")).unwrap().get("size"), &Value::Int(2));
}

#[test]
fn for_loop_arity_must_divide_items() {
  let project = single(vec![Node::For {
    variables: vec!["name".into(), "size".into()],
    items: list(vec![lit("a"), lit(1), lit("b")]),
    body: vec![],
    location: at(3),
  }]);

  assert!(matches!(
    evaluate(&project),
    Err(ResolveError::LoopArity { variables: 2, count: 3, .. })
  ));
}

#[test]
fn for_loops_over_maps_bind_key_and_value() {
  let mut entries = BTreeMap::new();
  entries.insert("east".to_string(), lit("10.1.0.0/16"));
  entries.insert("west".to_string(), lit("10.2.0.0/16"));
  let project = single(vec![Node::For {
    variables: vec!["region".into(), "cidr".into()],
    items: Expr::Map { entries },
    body: vec![resource_named(NETWORK, var("region"), vec![pair("cidr", var("cidr"))])],
    location: Location::default(),
  }]);

  let evaluation = evaluate(&project).unwrap();
  assert_eq!(
    evaluation.graph.get(&key(NETWORK, "west")).unwrap().get("cidr"),
    &Value::from("10.2.0.0/16")
  );
}

#[test]
fn if_picks_a_branch() {
  let project = single(vec![
    pair("env", lit("prod")),
    Node::If {
      condition: Expr::Compare {
        left: Box::new(var("env")),
        op: CompareOp::Eq,
        right: Box::new(lit("prod")),
      },
      body: vec![resource(VM, "big", vec![pair("image", lit("v1")), pair("size", lit(8))])],
      otherwise: vec![resource(VM, "small", vec![pair("image", lit("v1")), pair("size", lit(1))])],
      location: Location::default(),
    },
  ]);

  let evaluation = evaluate(&project).unwrap();
  assert!(evaluation.graph.contains(&key(VM, "big")));
  assert!(!evaluation.graph.contains(&key(VM, "small")));
}

#[test]
fn templates_expand_with_name_and_parameters() {
  let project = single(vec![
    Node::Template {
      name: "tier".into(),
      params: vec!["image".into()],
      body: vec![
        resource_named(NETWORK, interpolate(vec![var("NAME"), lit("-net")]), vec![pair(
          "cidr",
          lit("10.0.0.0/16"),
        )]),
        resource_named(
          VM,
          interpolate(vec![var("NAME"), lit("-vm")]),
          vec![
            pair("image", var("image")),
            pair(
              "network",
              Expr::Reference {
                path: NETWORK.into(),
                name: Some(Box::new(interpolate(vec![var("NAME"), lit("-net")]))),
                attribute: Some("id".into()),
                location: Location::default(),
              },
            ),
          ],
        ),
      ],
      location: Location::default(),
    },
    resource("tier", "web", vec![pair("image", lit("web:1"))]),
    resource("tier", "api", vec![pair("image", lit("api:1"))]),
  ]);

  let evaluation = evaluate(&project).unwrap();
  let api = evaluation.graph.get(&key(VM, "api-vm")).unwrap();
  assert_eq!(api.get("image"), &Value::from("api:1"));
  assert!(api.dependencies.contains(&key(NETWORK, "api-net")));
  assert!(evaluation.graph.contains(&key(NETWORK, "web-net")));
}

#[test]
fn unknown_template_parameters_fail() {
  let project = single(vec![
    Node::Template {
      name: "tier".into(),
      params: vec![],
      body: vec![],
      location: Location::default(),
    },
    resource("tier", "web", vec![pair("image", lit("web:1"))]),
  ]);
  assert!(matches!(evaluate(&project), Err(ResolveError::UnknownParameter { .. })));
}

#[test]
fn wildcards_wait_for_every_match() {
  let project = single(vec![
    resource(
      SERVICE,
      "mesh",
      vec![
        pair("image", lit("mesh:1")),
        pair(
          "endpoints",
          Expr::Reference {
            path: NETWORK.into(),
            name: Some(Box::new(lit("edge-*"))),
            attribute: Some("cidr".into()),
            location: Location::default(),
          },
        ),
      ],
    ),
    resource(NETWORK, "edge-b", vec![pair("cidr", lit("10.2.0.0/16"))]),
    resource(NETWORK, "edge-a", vec![pair("cidr", lit("10.1.0.0/16"))]),
    network("core"),
  ]);

  let evaluation = evaluate(&project).unwrap();
  let mesh = evaluation.graph.get(&key(SERVICE, "mesh")).unwrap();
  assert_eq!(
    mesh.get("endpoints"),
    &Value::List(vec![Value::from("10.1.0.0/16"), Value::from("10.2.0.0/16")])
  );
  assert!(mesh.dependencies.contains(&key(NETWORK, "edge-a")));
  assert!(!mesh.dependencies.contains(&key(NETWORK, "core")));
}

#[test]
fn self_references_read_own_fields_without_an_edge() {
  let mut tags = BTreeMap::new();
  tags.insert("image".to_string(), reference(VM, "web", Some("image")));
  let project = single(vec![resource(
    VM,
    "web",
    vec![pair("image", lit("v1")), pair("tags", Expr::Map { entries: tags })],
  )]);

  let evaluation = evaluate(&project).unwrap();
  let web = evaluation.graph.get(&key(VM, "web")).unwrap();
  assert_eq!(web.get("tags").as_map().unwrap()["image"], Value::from("v1"));
  assert!(web.dependencies.is_empty());
}

#[test]
fn subresources_take_identity_from_their_key_field() {
  let project = single(vec![resource(
    VM,
    "web",
    vec![
      pair("image", lit("v1")),
      block("disk", vec![pair("name", lit("root")), pair("size", lit(10))]),
      block("disk", vec![pair("name", lit("data")), pair("size", lit(100))]),
    ],
  )]);

  let evaluation = evaluate(&project).unwrap();
  let disks = &evaluation.graph.get(&key(VM, "web")).unwrap().subresources["disk"];
  let names: Vec<&str> = disks.iter().map(|d| d.name()).collect();
  assert_eq!(names, ["root", "data"]);
}

#[test]
fn nested_resources_are_rejected() {
  let project = single(vec![resource(VM, "web", vec![network("inner")])]);
  assert!(matches!(evaluate(&project), Err(ResolveError::NestedResource { .. })));
}

#[test]
fn imports_and_the_global_file() {
  let project = Project {
    files: vec![
      file("globals", vec![pair("region_cidr", lit("10.9.0.0/16"))]),
      file("net", vec![resource(NETWORK, "core", vec![pair("cidr", var("region_cidr"))])]),
      file(
        "main",
        vec![
          Node::Import {
            path: "net".into(),
            alias: None,
            location: Location::default(),
          },
          resource(
            VM,
            "web",
            vec![
              pair("image", lit("v1")),
              pair(
                "network",
                Expr::Reference {
                  path: format!("net.{}", NETWORK),
                  name: Some(Box::new(lit("core"))),
                  attribute: Some("cidr".into()),
                  location: Location::default(),
                },
              ),
            ],
          ),
        ],
      ),
    ],
    global: Some("globals".into()),
  };

  let evaluation = evaluate(&project).unwrap();
  let web = evaluation.graph.get(&key(VM, "web")).unwrap();
  assert_eq!(web.get("network"), &Value::from("10.9.0.0/16"));
  assert_eq!(web.file, "main");
  assert_eq!(evaluation.graph.get(&key(NETWORK, "core")).unwrap().file, "net");
}

#[test]
fn unknown_imports_fail() {
  let project = single(vec![Node::Import {
    path: "nowhere".into(),
    alias: None,
    location: at(1),
  }]);
  assert!(matches!(evaluate(&project), Err(ResolveError::UnknownImport { .. })));
}
