use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;

use opflow_core::config::ModelConfig;
use opflow_core::error::OpflowError;
use opflow_core::traits::PlanProducer;
use opflow_core::types::{FailureKind, Plan, PlanStep};
use opflow_operators::{OperatorDeps, OperatorRegistry, SqliteExecutor};
use opflow_test_utils::{MockLlmClient, StaticPlanner};
use opflow_workflow::{Edge, EngineOptions, WorkflowBuilder, WorkflowEngine};

fn tickets_db() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("tickets.db");
    let conn = rusqlite::Connection::open(&path).expect("open db");
    conn.execute_batch(
        "CREATE TABLE tickets (id INTEGER PRIMARY KEY, district TEXT, body TEXT);
         INSERT INTO tickets VALUES (1, 'north', 'water on road');
         INSERT INTO tickets VALUES (2, 'south', 'noise at night, call 13812345678');
         INSERT INTO tickets VALUES (3, 'north', 'blocked drain');",
    )
    .expect("seed db");
    (dir, path)
}

fn registry(llm: Arc<MockLlmClient>, db: Option<PathBuf>) -> Arc<OperatorRegistry> {
    let mut deps = OperatorDeps::new(llm, ModelConfig::default()).with_schema("tickets(id, district, body)");
    if let Some(path) = db {
        deps = deps.with_datasource(Arc::new(SqliteExecutor::new(path)));
    }
    Arc::new(OperatorRegistry::with_builtins(deps).expect("builtins register"))
}

fn plan(steps: &[(&str, &str)]) -> Plan {
    steps
        .iter()
        .map(|(op, instruction)| PlanStep::new(*op, *instruction))
        .collect()
}

#[tokio::test]
async fn test_sql_filter_mask_pipeline() {
    let (_dir, db) = tickets_db();
    let llm = Arc::new(MockLlmClient::new(vec![
        "```sql\nSELECT id, body FROM tickets ORDER BY id\n```".to_string(),
        r#"[{"id": 2, "body": "noise at night, call 13812345678"}]"#.to_string(),
    ]));
    let registry = registry(llm.clone(), Some(db));

    let planner = StaticPlanner::new(plan(&[
        ("sql", "select every ticket body"),
        ("semantic_filter", "keep noise complaints"),
        ("mask", "mask personal data"),
    ]));
    let query = "which tickets complain about noise";
    let plan = planner.produce(query, &registry.descriptors()).await.unwrap();
    assert!(registry.unresolved(&plan).is_empty());

    let workflow = WorkflowBuilder::new(registry)
        .build_from_plan(query, &plan, None)
        .unwrap();
    let state = WorkflowEngine::new(EngineOptions::default())
        .run(&workflow.graph, workflow.state)
        .await;

    assert!(!state.has_errors(), "errors: {:?}", state.errors());
    let sql = state.result("n0").unwrap();
    assert_eq!(sql["columns"], json!(["id", "body"]));
    assert_eq!(sql["rows"].as_array().unwrap().len(), 3);
    assert_eq!(sql["truncated"], json!(false));

    assert_eq!(
        state.result("n2"),
        Some(&json!([{"id": 2, "body": "noise at night, call 138****5678"}]))
    );

    // The filter step saw the SQL rows as its upstream payload.
    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].iter().any(|m| m.content.contains("blocked drain")));
}

#[tokio::test]
async fn test_unknown_operator_fails_build() {
    let llm = Arc::new(MockLlmClient::new(vec![]));
    let registry = registry(llm, None);
    let plan = plan(&[("sql", "load"), ("pivot", "pivot by month")]);

    assert_eq!(registry.unresolved(&plan), vec![(1, "pivot".to_string())]);
    let err = WorkflowBuilder::new(registry)
        .build_from_plan("q", &plan, None)
        .unwrap_err();
    assert!(matches!(err, OpflowError::UnknownOperator { position: Some(1), .. }));
}

#[tokio::test]
async fn test_missing_datasource_is_recorded() {
    let llm = Arc::new(MockLlmClient::new(vec![]));
    let registry = registry(llm, None);
    let plan = plan(&[("sql", "count tickets"), ("summarize", "summarize counts")]);

    let workflow = WorkflowBuilder::new(registry)
        .build_from_plan("q", &plan, None)
        .unwrap();
    let state = WorkflowEngine::new(EngineOptions::default())
        .run(&workflow.graph, workflow.state)
        .await;

    let failure = state.error("n0").expect("sql step failed");
    assert_eq!(failure.kind, FailureKind::Failed);
    assert!(failure.message.contains("no data source"));
    assert!(state.result("n1").is_none());
    assert!(state.error("n1").is_none());
}

#[tokio::test]
async fn test_plan_file_with_explicit_edges() {
    let (_dir, db) = tickets_db();
    let llm = Arc::new(MockLlmClient::new(vec![
        "SELECT district, COUNT(*) AS total FROM tickets GROUP BY district ORDER BY district".to_string(),
        "SELECT body FROM tickets WHERE district = 'north' ORDER BY id".to_string(),
    ]));
    let registry = registry(llm, Some(db));

    let plan: Plan = serde_json::from_str(
        r#"[
            {"op": "sql", "instruction": "count per district"},
            {"op": "sql", "instruction": "north bodies"},
            {"op": "mask", "instruction": ""}
        ]"#,
    )
    .unwrap();
    let edges: Vec<Edge> =
        serde_json::from_str(r#"[{"from": "n0", "to": "n2"}, {"from": "n1", "to": "n2"}]"#).unwrap();

    let workflow = WorkflowBuilder::new(registry)
        .build_from_plan("q", &plan, Some(&edges))
        .unwrap();
    assert_eq!(workflow.graph.entry_nodes().len(), 2);

    // Serial branches keep the canned LLM replies in step order.
    let engine = WorkflowEngine::new(EngineOptions {
        max_concurrency: 1,
        ..EngineOptions::default()
    });
    let state = engine.run(&workflow.graph, workflow.state).await;

    assert!(!state.has_errors(), "errors: {:?}", state.errors());
    let merged = state.result("n2").unwrap();
    assert_eq!(merged["n0"]["rows"], json!([["north", 2], ["south", 1]]));
    assert_eq!(merged["n1"]["rows"], json!([["water on road"], ["blocked drain"]]));
}
