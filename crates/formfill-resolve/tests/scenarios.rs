//! End-to-end resolution scenarios driving the public entry point.

mod support;

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use formfill_model::{
    Answer, ExpressionDef, Extension, Form, FormItem, ItemType, Resource, Response, ResponseItem,
    Value, EXTRACTION_CONTEXT, EXTRACTION_CONTEXT_ID, INITIAL_EXPRESSION, POPULATION_CONTEXT,
    VARIABLE_EXPRESSION,
};
use formfill_resolve::{
    parse_async, Context, DiagnosticKind, Error, EvalResult, ExpressionKind, PathEvaluator,
    ResolveOptions, ResolvingContext, ResourceLoader, ScopeTree, StaticLoader,
};
use support::{RecordingLoader, TestEvaluator};

async fn run(
    form: Form,
    response: Option<Response>,
    launch: Vec<(String, Resource)>,
    loader: &dyn ResourceLoader,
    evaluator: &dyn PathEvaluator,
    mode: ResolvingContext,
) -> Result<ScopeTree, Error> {
    parse_async(
        form,
        response,
        launch,
        loader,
        evaluator,
        mode,
        ResolveOptions::default(),
        CancellationToken::new(),
    )
    .await
}

fn patient() -> Resource {
    Resource::from_json(json!({
        "resourceType": "Patient",
        "id": "P1",
        "name": "Ada Lovelace",
    }))
}

#[tokio::test]
async fn launch_only() {
    let tree = run(
        Form::default(),
        None,
        vec![("patient".into(), patient())],
        &StaticLoader::default(),
        &TestEvaluator::default(),
        ResolvingContext::Population,
    )
    .await
    .unwrap();

    let root = tree.scope(tree.root());
    assert!(root.children.is_empty());
    assert_eq!(root.contexts.len(), 1);
    match tree.context(root.contexts[0]) {
        Context::Launch(launch) => assert_eq!(launch.name, "patient"),
        other => panic!("expected launch context, got {other:?}"),
    }
}

#[tokio::test]
async fn single_path_initial() {
    let mut q1 = FormItem::new("q1", ItemType::Text);
    q1.extensions.push(Extension::expression(
        INITIAL_EXPRESSION,
        ExpressionDef::path("%patient.name"),
    ));
    let form = Form {
        extensions: Vec::new(),
        items: vec![q1],
    };

    let tree = run(
        form,
        None,
        vec![("patient".into(), patient())],
        &StaticLoader::default(),
        &TestEvaluator::default(),
        ResolvingContext::Population,
    )
    .await
    .unwrap();

    let scope = tree.scope(tree.root()).children[0];
    let initial = tree
        .find_kind_in_scope(scope, ExpressionKind::InitialExpression)
        .unwrap();
    let node = tree.expression(initial).unwrap();
    assert_eq!(
        node.value.as_ref().unwrap().values,
        vec![Value::Text("Ada Lovelace".into())]
    );
}

#[tokio::test]
async fn embedded_query_is_rewritten_and_fetched_once() {
    let mut obs = FormItem::new("obs", ItemType::Group);
    obs.extensions.push(Extension::expression(
        POPULATION_CONTEXT,
        ExpressionDef::query("Observation?subject={{%patient.id}}"),
    ));
    let form = Form {
        extensions: Vec::new(),
        items: vec![obs],
    };

    let observation = Resource::from_json(json!({"resourceType": "Observation", "id": "O1"}));
    let loader = RecordingLoader::new(
        StaticLoader::default().with("Observation?subject=P1", vec![observation.clone()]),
    );

    let tree = run(
        form,
        None,
        vec![("patient".into(), patient())],
        &loader,
        &TestEvaluator::default(),
        ResolvingContext::Population,
    )
    .await
    .unwrap();

    assert_eq!(
        loader.recorded(),
        vec![vec!["Observation?subject=P1".to_string()]]
    );

    let scope = tree.scope(tree.root()).children[0];
    let query = tree
        .find_kind_in_scope(scope, ExpressionKind::PopulationContext)
        .unwrap();
    let embedded = tree
        .find_kind_in_scope(scope, ExpressionKind::Embedded)
        .unwrap();

    let query_node = tree.expression(query).unwrap();
    assert_eq!(query_node.text, "Observation?subject=P1");
    assert_eq!(
        query_node.value.as_ref().unwrap().values,
        vec![Value::Resource(observation)]
    );
    let embedded_node = tree.expression(embedded).unwrap();
    assert_eq!(
        embedded_node.value.as_ref().unwrap().values,
        vec![Value::Text("P1".into())]
    );
}

#[tokio::test]
async fn population_fan_out_clones_per_resource() {
    let mut group = FormItem::new("contacts", ItemType::Group);
    group.extensions.push(Extension::expression(
        POPULATION_CONTEXT,
        ExpressionDef::path("%patient.contact").named("contact"),
    ));
    let mut name = FormItem::new("contact-name", ItemType::Text);
    name.extensions.push(Extension::expression(
        INITIAL_EXPRESSION,
        ExpressionDef::path("%contact.name"),
    ));
    group.items.push(name);
    let form = Form {
        extensions: Vec::new(),
        items: vec![group],
    };

    let patient = Resource::from_json(json!({
        "resourceType": "Patient",
        "id": "P1",
        "contact": [{"name": "Grace"}, {"name": "Edsger"}, {"name": "Barbara"}],
    }));

    let tree = run(
        form,
        None,
        vec![("patient".into(), patient)],
        &StaticLoader::default(),
        &TestEvaluator::default(),
        ResolvingContext::Population,
    )
    .await
    .unwrap();

    let clones = tree.scope(tree.root()).children.clone();
    assert_eq!(clones.len(), 3);

    let mut names = Vec::new();
    for clone in &clones {
        // Clone invariants: same item, lineage recorded, text copied.
        assert_eq!(tree.scope(*clone).link_id(), Some("contacts"));
        let ctx = tree
            .find_kind_in_scope(*clone, ExpressionKind::PopulationContext)
            .unwrap();
        let ctx_node = tree.expression(ctx).unwrap();
        assert!(ctx_node.cloned_from.is_some());
        assert_eq!(ctx_node.text, "%patient.contact");

        let child = tree.scope(*clone).children[0];
        let initial = tree
            .find_kind_in_scope(child, ExpressionKind::InitialExpression)
            .unwrap();
        names.push(tree.expression(initial).unwrap().value.clone().unwrap().values);
    }
    assert_eq!(
        names,
        vec![
            vec![Value::Text("Grace".into())],
            vec![Value::Text("Edsger".into())],
            vec![Value::Text("Barbara".into())],
        ]
    );
}

#[tokio::test]
async fn mutually_referencing_variables_fail_with_one_cycle() {
    let form = Form {
        extensions: vec![
            Extension::expression(
                VARIABLE_EXPRESSION,
                ExpressionDef::path("%b.value").named("a"),
            ),
            Extension::expression(
                VARIABLE_EXPRESSION,
                ExpressionDef::path("%a.value").named("b"),
            ),
        ],
        items: Vec::new(),
    };

    let err = run(
        form,
        None,
        Vec::new(),
        &StaticLoader::default(),
        &TestEvaluator::default(),
        ResolvingContext::Population,
    )
    .await
    .unwrap_err();

    match err {
        Error::CycleDetected(diagnostics) => {
            assert_eq!(diagnostics.len(), 1);
            assert_eq!(diagnostics[0].kind, DiagnosticKind::CycleDetected);
        }
        other => panic!("expected cycle error, got {other}"),
    }
}

#[tokio::test]
async fn extraction_context_id_finds_stored_resource() {
    let mut item = FormItem::new("patient-group", ItemType::Group);
    item.extensions.push(Extension::expression(
        EXTRACTION_CONTEXT,
        ExpressionDef::query("Patient?identifier=urn:x|7"),
    ));
    item.extensions.push(Extension::expression(
        EXTRACTION_CONTEXT_ID,
        ExpressionDef::path("stored-patient-id"),
    ));
    let form = Form {
        extensions: Vec::new(),
        items: vec![item],
    };

    let stored = Resource::from_json(json!({"resourceType": "Patient", "id": "P7"}));
    let loader =
        StaticLoader::default().with("Patient?identifier=urn:x|7", vec![stored.clone()]);
    let evaluator = TestEvaluator::default().with(
        "stored-patient-id",
        EvalResult::of(vec![Value::Text("P7".into())]),
    );

    let tree = run(
        form,
        None,
        Vec::new(),
        &loader,
        &evaluator,
        ResolvingContext::Extraction,
    )
    .await
    .unwrap();

    let scope = tree.scope(tree.root()).children[0];
    let context = tree
        .find_kind_in_scope(scope, ExpressionKind::ExtractionContext)
        .unwrap();
    let value = tree.expression(context).unwrap().value.clone().unwrap();
    assert_eq!(value.values, vec![Value::Resource(stored)]);
}

#[tokio::test]
async fn extraction_rehydrates_repeating_scopes_by_key() {
    let mut group = FormItem::new("allergy", ItemType::Group);
    group.repeats = true;
    group.extensions.push(Extension::expression(
        EXTRACTION_CONTEXT,
        ExpressionDef::query("AllergyIntolerance?patient=P1"),
    ));
    group.extensions.push(Extension::expression(
        EXTRACTION_CONTEXT_ID,
        ExpressionDef::path("itemAnswer('allergy-id')"),
    ));
    group.items.push(FormItem::new("allergy-id", ItemType::Text));
    let form = Form {
        extensions: Vec::new(),
        items: vec![group],
    };

    let instance = |key: &str| ResponseItem {
        link_id: "allergy".into(),
        answers: Vec::new(),
        items: vec![ResponseItem {
            link_id: "allergy-id".into(),
            answers: vec![Answer::new(Value::Text(key.into()))],
            items: Vec::new(),
        }],
    };
    let response = Response {
        items: vec![instance("AL1"), instance("AL9")],
    };

    let stored = vec![
        Resource::from_json(json!({"resourceType": "AllergyIntolerance", "id": "AL1"})),
        Resource::from_json(json!({"resourceType": "AllergyIntolerance", "id": "AL2"})),
    ];
    let loader = StaticLoader::default().with("AllergyIntolerance?patient=P1", stored);

    let tree = run(
        form,
        Some(response),
        Vec::new(),
        &loader,
        &TestEvaluator::default(),
        ResolvingContext::Extraction,
    )
    .await
    .unwrap();

    let scopes = tree.scope(tree.root()).children.clone();
    assert_eq!(scopes.len(), 2);

    let resource_of = |scope| {
        let ctx = tree
            .find_kind_in_scope(scope, ExpressionKind::ExtractionContext)
            .unwrap();
        match &tree.expression(ctx).unwrap().value.as_ref().unwrap().values[0] {
            Value::Resource(r) => r.clone(),
            other => panic!("expected resource, got {other:?}"),
        }
    };

    // First repeat's key matches a stored resource.
    let first = resource_of(scopes[0]);
    assert_eq!(first.id(), Some("AL1"));
    // Second repeat's key matches nothing; an empty instance of the
    // url's prefix type is manufactured.
    let second = resource_of(scopes[1]);
    assert_eq!(second.resource_type(), Some("AllergyIntolerance"));
    assert_eq!(second.id(), None);
}

#[tokio::test]
async fn embedded_with_no_result_leaves_query_unresolved() {
    let mut obs = FormItem::new("obs", ItemType::Group);
    obs.extensions.push(Extension::expression(
        POPULATION_CONTEXT,
        ExpressionDef::query("Observation?subject={{%patient.missing}}"),
    ));
    let form = Form {
        extensions: Vec::new(),
        items: vec![obs],
    };

    let err = run(
        form,
        None,
        vec![("patient".into(), patient())],
        &StaticLoader::default(),
        &TestEvaluator::default(),
        ResolvingContext::Population,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        Error::NoProgress { .. } | Error::Unresolvable { .. }
    ));
}

#[tokio::test]
async fn embedded_with_many_results_warns_and_skips_substitution() {
    let mut obs = FormItem::new("obs", ItemType::Group);
    obs.extensions.push(Extension::expression(
        POPULATION_CONTEXT,
        ExpressionDef::query("Observation?code={{%patient.codes}}"),
    ));
    let form = Form {
        extensions: Vec::new(),
        items: vec![obs],
    };

    let patient = Resource::from_json(json!({
        "resourceType": "Patient",
        "id": "P1",
        "codes": ["c1", "c2"],
    }));

    let err = run(
        form,
        None,
        vec![("patient".into(), patient)],
        &StaticLoader::default(),
        &TestEvaluator::default(),
        ResolvingContext::Population,
    )
    .await
    .unwrap_err();

    // The query text keeps its marker, so it can never become ready
    // and the pass ends unresolvable.
    assert!(matches!(
        err,
        Error::NoProgress { .. } | Error::Unresolvable { .. }
    ));
}

#[tokio::test]
async fn unknown_variable_warns_then_fails_resolution() {
    let mut q1 = FormItem::new("q1", ItemType::Text);
    q1.extensions.push(Extension::expression(
        INITIAL_EXPRESSION,
        ExpressionDef::path("%nobody.name"),
    ));
    let form = Form {
        extensions: Vec::new(),
        items: vec![q1],
    };

    let err = run(
        form,
        None,
        Vec::new(),
        &StaticLoader::default(),
        &TestEvaluator::default(),
        ResolvingContext::Population,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        Error::NoProgress { .. } | Error::Unresolvable { .. }
    ));
}

/// Structural signature for determinism comparison: scope layout,
/// context kinds, texts, and resolved values in preorder.
fn signature(tree: &ScopeTree) -> Vec<String> {
    let mut out = Vec::new();
    for scope_id in tree.live_scopes() {
        let scope = tree.scope(scope_id);
        out.push(format!("scope {}", scope.link_id().unwrap_or("<root>")));
        for ctx_id in &scope.contexts {
            match tree.context(*ctx_id) {
                Context::Launch(launch) => out.push(format!("  launch {}", launch.name)),
                Context::Expression(node) => out.push(format!(
                    "  {:?} {:?} {} -> {:?}",
                    node.kind,
                    node.language,
                    node.text,
                    node.value.as_ref().map(|v| &v.values)
                )),
            }
        }
    }
    out
}

#[tokio::test]
async fn determinism_two_passes_agree() {
    let make_form = || {
        let mut group = FormItem::new("contacts", ItemType::Group);
        group.extensions.push(Extension::expression(
            POPULATION_CONTEXT,
            ExpressionDef::path("%patient.contact").named("contact"),
        ));
        let mut name = FormItem::new("contact-name", ItemType::Text);
        name.extensions.push(Extension::expression(
            INITIAL_EXPRESSION,
            ExpressionDef::path("%contact.name"),
        ));
        group.items.push(name);
        let mut obs = FormItem::new("obs", ItemType::Group);
        obs.extensions.push(Extension::expression(
            POPULATION_CONTEXT,
            ExpressionDef::query("Observation?subject={{%patient.id}}"),
        ));
        Form {
            extensions: Vec::new(),
            items: vec![group, obs],
        }
    };
    let patient = || {
        Resource::from_json(json!({
            "resourceType": "Patient",
            "id": "P1",
            "contact": [{"name": "Grace"}, {"name": "Edsger"}],
        }))
    };
    let loader = || {
        StaticLoader::default().with(
            "Observation?subject=P1",
            vec![Resource::from_json(
                json!({"resourceType": "Observation", "id": "O1"}),
            )],
        )
    };

    let first = run(
        make_form(),
        None,
        vec![("patient".into(), patient())],
        &loader(),
        &TestEvaluator::default(),
        ResolvingContext::Population,
    )
    .await
    .unwrap();
    let second = run(
        make_form(),
        None,
        vec![("patient".into(), patient())],
        &loader(),
        &TestEvaluator::default(),
        ResolvingContext::Population,
    )
    .await
    .unwrap();

    assert_eq!(signature(&first), signature(&second));
}

#[tokio::test]
async fn success_requires_all_permitted_nodes_resolved() {
    let mut q1 = FormItem::new("q1", ItemType::Text);
    q1.extensions.push(Extension::expression(
        INITIAL_EXPRESSION,
        ExpressionDef::path("%patient.name"),
    ));
    let form = Form {
        extensions: Vec::new(),
        items: vec![q1],
    };

    let tree = run(
        form,
        None,
        vec![("patient".into(), patient())],
        &StaticLoader::default(),
        &TestEvaluator::default(),
        ResolvingContext::Population,
    )
    .await
    .unwrap();

    for id in tree.expression_ids() {
        let node = tree.expression(id).unwrap();
        assert!(node.is_resolved(), "unresolved node: {}", node.label());
        // Edge symmetry holds across the whole tree.
        for dep in &node.dependencies {
            assert!(tree.context(*dep).dependants().contains(&id));
        }
    }
}
