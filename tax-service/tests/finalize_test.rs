//! Draft -> Final lifecycle.

mod common;

use common::{gasoline_request, TestApp};
use serde_json::{json, Value};
use tax_service::models::AuditAction;
use uuid::Uuid;

async fn create_draft(app: &TestApp) -> (Uuid, String) {
    let case_id = app.new_case().await;
    let body: Value = app
        .post_estimation(&gasoline_request(case_id))
        .await
        .json()
        .await
        .unwrap();
    let id = body["data"]["estimationId"].as_str().unwrap().to_string();
    (case_id, id)
}

#[tokio::test]
async fn finalize_marks_estimation_final() {
    let app = TestApp::spawn().await;
    let (_, id) = create_draft(&app).await;
    let approver = Uuid::new_v4();

    let response = app.finalize(&id, approver).await;
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["isFinal"], true);
    assert_eq!(body["data"]["status"], "final");
    assert_eq!(body["data"]["approvedBy"], json!(approver));
    assert!(body["data"]["approvedAt"].is_string());

    let actions: Vec<AuditAction> = app
        .backend
        .audit_entries()
        .await
        .iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions, vec![AuditAction::Calculate, AuditAction::Approve]);
}

#[tokio::test]
async fn second_finalize_conflicts() {
    let app = TestApp::spawn().await;
    let (_, id) = create_draft(&app).await;

    assert!(app.finalize(&id, Uuid::new_v4()).await.status().is_success());

    let response = app.finalize(&id, Uuid::new_v4()).await;
    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("already final"));
}

#[tokio::test]
async fn finalize_unknown_estimation_is_not_found() {
    let app = TestApp::spawn().await;

    let response = app.finalize(&Uuid::new_v4().to_string(), Uuid::new_v4()).await;

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn finalize_requires_approver() {
    let app = TestApp::spawn().await;
    let (_, id) = create_draft(&app).await;

    let response = app
        .client
        .post(app.url(&format!("/estimations/{}/finalize", id)))
        .json(&json!({}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn draft_can_be_recalculated_in_place() {
    let app = TestApp::spawn().await;
    let (case_id, id) = create_draft(&app).await;

    let response = app
        .client
        .post(app.url(&format!("/estimations/{}/recalculate", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["estimationId"], id.as_str());
    assert_eq!(body["data"]["calculationVersion"], 1);

    let (_, list) = app
        .get_json(&format!("/cases/{}/estimations", case_id))
        .await;
    assert_eq!(list["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn final_estimation_cannot_be_recalculated() {
    let app = TestApp::spawn().await;
    let (_, id) = create_draft(&app).await;
    app.finalize(&id, Uuid::new_v4()).await;

    let response = app
        .client
        .post(app.url(&format!("/estimations/{}/recalculate", id)))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("cannot be modified"));

    let (_, view) = app.get_json(&format!("/estimations/{}", id)).await;
    assert_eq!(view["data"]["isFinal"], true);
}

#[tokio::test]
async fn finalized_estimation_does_not_block_new_versions() {
    let app = TestApp::spawn().await;
    let (case_id, id) = create_draft(&app).await;
    app.finalize(&id, Uuid::new_v4()).await;

    let body: Value = app
        .post_estimation(&gasoline_request(case_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["calculationVersion"], 2);

    let (_, latest) = app
        .get_json(&format!("/cases/{}/estimations/latest", case_id))
        .await;
    assert_eq!(latest["data"]["calculationVersion"], 2);
    assert_eq!(latest["data"]["isFinal"], false);
}

#[tokio::test]
async fn invalid_path_id_is_rejected() {
    let app = TestApp::spawn().await;

    let (status, body) = app.get_json("/estimations/not-a-uuid").await;

    assert_eq!(status.as_u16(), 400);
    assert_eq!(body["success"], false);
}
