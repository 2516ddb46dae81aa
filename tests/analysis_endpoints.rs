mod support;

use axum::body::Body;
use axum::http::{Method, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::json;

use codelab_backend::api::server::build_router_with_services;

use support::{selection_body, send_json, Harness};

#[tokio::test]
async fn scorecard_combines_security_quality_and_dependency() {
    let harness = Harness::new();
    let app = build_router_with_services(harness.services(None));

    let report = send_json(
        app,
        Method::POST,
        "/api/v1/code-analysis-report",
        selection_body(harness.project().as_path(), &[harness.path("app")]),
        StatusCode::OK,
    )
    .await;

    assert_eq!(report["title"], json!("Code Analysis Report"));
    assert_eq!(report["overall_score"], json!(84));
    let names = report["categories"]
        .as_array()
        .expect("categories")
        .iter()
        .map(|category| category["name"].clone())
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![
            json!("Security Scan"),
            json!("Code Quality"),
            json!("Dependency Analysis")
        ]
    );
    assert_eq!(report["categories"][0]["score"], json!(86));
    assert_eq!(report["categories"][0]["grade"], json!("B (Good)"));
    assert_eq!(
        report["categories"][0]["summary"],
        json!("Found 1 high, 0 medium, and 2 low severity issues.")
    );
    assert_eq!(report["categories"][1]["score"], json!(90));
    assert_eq!(report["categories"][2]["score"], json!(75));
    assert_eq!(harness.scratch_entries(), 0);
}

#[tokio::test]
async fn unreadable_selection_is_rejected() {
    let harness = Harness::new();
    let app = build_router_with_services(harness.services(None));

    let response = send_json(
        app,
        Method::POST,
        "/api/v1/code-analysis-report",
        selection_body(harness.project().as_path(), &[harness.path("missing.py")]),
        StatusCode::BAD_REQUEST,
    )
    .await;

    assert_eq!(response["error"], json!("No readable code files found."));
}

#[tokio::test]
async fn non_python_selection_is_rejected() {
    let harness = Harness::new();
    let app = build_router_with_services(harness.services(None));

    let response = send_json(
        app,
        Method::POST,
        "/api/v1/code-analysis-report",
        selection_body(harness.project().as_path(), &[harness.path("README.md")]),
        StatusCode::BAD_REQUEST,
    )
    .await;

    assert_eq!(response["error"], json!("No Python files found."));
    assert!(harness.toolchain.programs().is_empty());
}

#[tokio::test]
async fn directory_listing_returns_sorted_tree() {
    let harness = Harness::new();
    let app = build_router_with_services(harness.services(None));

    let tree = send_json(
        app.clone(),
        Method::POST,
        "/api/v1/list-directory",
        Body::from(json!({"path": harness.project().display().to_string()}).to_string()),
        StatusCode::OK,
    )
    .await;

    assert_eq!(tree["name"], json!("project"));
    assert_eq!(tree["type"], json!("folder"));
    assert_eq!(tree["children"][0]["name"], json!("README.md"));
    assert_eq!(tree["children"][1]["name"], json!("app"));
    assert_eq!(tree["children"][1]["children"][0]["name"], json!("calc.py"));

    let missing = send_json(
        app,
        Method::POST,
        "/api/v1/list-directory",
        Body::from(json!({"path": harness.path("app/calc.py")}).to_string()),
        StatusCode::NOT_FOUND,
    )
    .await;
    assert_eq!(missing["error"], json!("Directory not found."));
}
