use super::*;
use assert_matches::assert_matches;
use mockito::{Matcher, Server};
use serde_json::json;

fn dispatcher_for(server: &Server) -> ActionDispatcher {
    ActionDispatcher::new(DispatcherConfig {
        base_url: server.url(),
        timeout_ms: 5000,
    })
}

// Test dispatcher configuration
#[test]
fn test_dispatcher_config_default() {
    let config = DispatcherConfig::default();
    assert_eq!(config.base_url, "http://localhost:5678");
    assert_eq!(config.timeout_ms, 30000);
}

#[test]
fn test_base_url_trailing_slash() {
    let dispatcher = ActionDispatcher::new(DispatcherConfig {
        base_url: "http://localhost:5678/".to_string(),
        ..Default::default()
    });
    assert_eq!(dispatcher.webhook_url(Action::CreateVm), "http://localhost:5678/webhook/create_vm");
}

#[tokio::test]
async fn test_trigger_control_action() {
    let mut server = Server::new_async().await;
    let mock = server.mock("POST", "/webhook/create_vm")
        .match_query(Matcher::UrlEncoded("request_id".into(), "r1".into()))
        .match_body(Matcher::Json(json!({ "request_id": "r1" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success": true, "status": "accepted"}"#)
        .create_async()
        .await;

    let dispatcher = dispatcher_for(&server);
    let data = dispatcher.trigger(Action::CreateVm, &RequestId::parse("r1").unwrap()).await.unwrap();

    assert_eq!(data["status"], "accepted");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_trigger_empty_body_is_ok() {
    let mut server = Server::new_async().await;
    let mock = server.mock("POST", "/webhook/stop_simulation")
        .match_query(Matcher::UrlEncoded("request_id".into(), "r3".into()))
        .with_status(200)
        .create_async()
        .await;

    let dispatcher = dispatcher_for(&server);
    let data = dispatcher.trigger(Action::StopSimulation, &RequestId::parse("r3").unwrap()).await.unwrap();

    assert_eq!(data, json!({}));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_trigger_rejects_query_actions() {
    let dispatcher = ActionDispatcher::new(DispatcherConfig::default());
    let result = dispatcher.trigger(Action::ListVolumes, &RequestId::parse("r1").unwrap()).await;
    assert_matches!(result, Err(DispatchError::Validation(_)));
}

#[tokio::test]
async fn test_http_error_status() {
    let mut server = Server::new_async().await;
    let mock = server.mock("POST", "/webhook/hibernate_vm")
        .match_query(Matcher::Any)
        .with_status(502)
        .with_body("bad gateway")
        .create_async()
        .await;

    let dispatcher = dispatcher_for(&server);
    let result = dispatcher.trigger(Action::HibernateVm, &RequestId::parse("r2").unwrap()).await;

    assert_matches!(result, Err(DispatchError::HttpStatus { status: 502, body }) if body == "bad gateway");
    // Exactly one call, no retry
    mock.assert_async().await;
}

#[tokio::test]
async fn test_success_false_is_rejected() {
    let mut server = Server::new_async().await;
    let _mock = server.mock("POST", "/webhook/attach_volume")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success": false, "message": "volume busy"}"#)
        .create_async()
        .await;

    let dispatcher = dispatcher_for(&server);
    let result = dispatcher.attach_volume(&AttachVolumeRequest {
        vm_id: "vm-1".to_string(),
        vm_name: "gpu-box".to_string(),
        volume_id: "vol-9".to_string(),
        volume_name: "data".to_string(),
        project_id: "p1".to_string(),
    }).await;

    assert_matches!(result, Err(DispatchError::Rejected(msg)) if msg == "volume busy");
}

#[tokio::test]
async fn test_transport_error() {
    let dispatcher = ActionDispatcher::new(DispatcherConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        timeout_ms: 1000,
    });

    let result = dispatcher.trigger(Action::RestoreVm, &RequestId::parse("r1").unwrap()).await;
    assert_matches!(result, Err(DispatchError::NetworkError(_)));
}

#[tokio::test]
async fn test_list_volumes() {
    let mut server = Server::new_async().await;
    let mock = server.mock("POST", "/webhook/list_volumes")
        .match_query(Matcher::UrlEncoded("project_id".into(), "p1".into()))
        .match_body(Matcher::Json(json!({ "project_id": "p1" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success": true, "volumes": [
            {"volume_id": "v1", "volume_name": "data", "volume_size_gb": 100, "volume_state": "available"},
            {"volume_id": "v2", "volume_name": "scratch"}
        ]}"#)
        .create_async()
        .await;

    let dispatcher = dispatcher_for(&server);
    let volumes = dispatcher.list_volumes("p1").await.unwrap();

    assert_eq!(volumes.len(), 2);
    assert_eq!(volumes[0].volume_size_gb, Some(100.0));
    assert_eq!(volumes[1].volume_state, None);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_list_volumes_missing_field() {
    let mut server = Server::new_async().await;
    let _mock = server.mock("POST", "/webhook/list_volumes")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"success": true, "message": "no storage backend"}"#)
        .create_async()
        .await;

    let dispatcher = dispatcher_for(&server);
    let result = dispatcher.list_volumes("p1").await;
    assert_matches!(result, Err(DispatchError::Rejected(msg)) if msg == "no storage backend");
}

#[tokio::test]
async fn test_check_project_out_of_credits() {
    let mut server = Server::new_async().await;
    let _mock = server.mock("POST", "/webhook/project_id_check")
        .match_body(Matcher::Json(json!({ "project_id": "p1" })))
        .with_status(200)
        .with_body(r#"{"out_of_credits": true}"#)
        .create_async()
        .await;

    let dispatcher = dispatcher_for(&server);
    let check = dispatcher.check_project("p1").await.unwrap();
    assert!(check.out_of_credits);
}

#[tokio::test]
async fn test_check_vm_status() {
    let mut server = Server::new_async().await;
    let _mock = server.mock("POST", "/webhook/check_vm_status")
        .match_body(Matcher::Json(json!({ "vm_name": "gpu-box" })))
        .with_status(200)
        .with_body(r#"{"success": true, "request_status": "running", "user_vm_ip": "10.0.0.9", "user_vm_name": "gpu-box"}"#)
        .create_async()
        .await;

    let dispatcher = dispatcher_for(&server);
    let status = dispatcher.check_vm_status("gpu-box").await.unwrap();

    assert_eq!(status.status(), Some("running"));
    assert_eq!(status.user_vm_ip.as_deref(), Some("10.0.0.9"));
    assert_eq!(status.field("success"), Some(&json!(true)));
}

#[tokio::test]
async fn test_get_project_name() {
    let mut server = Server::new_async().await;
    let _mock = server.mock("POST", "/webhook/get_project_name")
        .match_query(Matcher::UrlEncoded("project_id".into(), "p1".into()))
        .with_status(200)
        .with_body(r#"{"success": true, "project_name": "Fluid Lab"}"#)
        .create_async()
        .await;

    let dispatcher = dispatcher_for(&server);
    assert_eq!(dispatcher.get_project_name("p1").await.unwrap(), "Fluid Lab");
}

#[tokio::test]
async fn test_validation_happens_before_network() {
    // Nothing listens on this address; validation must fail first
    let dispatcher = ActionDispatcher::new(DispatcherConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        timeout_ms: 1000,
    });

    assert_matches!(dispatcher.check_vm_status("  ").await, Err(DispatchError::Validation(msg)) if msg == "vm_name is required");
    assert_matches!(dispatcher.list_volumes("").await, Err(DispatchError::Validation(_)));
    assert_matches!(
        dispatcher.detach_volume(&DetachVolumeRequest {
            vm_id: String::new(),
            vm_name: "gpu-box".to_string(),
            volume_id: "v1".to_string(),
        }).await,
        Err(DispatchError::Validation(_))
    );
}

#[test]
fn test_error_display() {
    let error = DispatchError::HttpStatus { status: 404, body: "Not found".to_string() };
    assert!(error.to_string().contains("404"));
    assert!(error.to_string().contains("Not found"));
}

#[tokio::test]
async fn test_show_credits() {
    let mut server = Server::new_async().await;
    let mock = server.mock("POST", "/webhook/show_credits")
        .match_query(Matcher::UrlEncoded("request_id".into(), "r5".into()))
        .match_body(Matcher::Json(json!({ "request_id": "r5" })))
        .with_status(200)
        .with_body(r#"{"success": true, "credits_used": 12.5, "credits_remaining": 87.5}"#)
        .create_async()
        .await;

    let dispatcher = dispatcher_for(&server);
    let data = dispatcher.show_credits(&RequestId::parse("r5").unwrap()).await.unwrap();

    assert_eq!(data["credits_remaining"], json!(87.5));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_add_ssh_key() {
    let mut server = Server::new_async().await;
    let mock = server.mock("POST", "/webhook/add_ssh_key")
        .match_body(Matcher::Json(json!({
            "pubkey": "ssh-ed25519 AAAA user@host",
            "envkey_name": "laptop",
            "vm_ip": "10.0.0.9"
        })))
        .with_status(200)
        .with_body(r#"{"success": true, "message": "Key added"}"#)
        .create_async()
        .await;

    let dispatcher = dispatcher_for(&server);
    let data = dispatcher.add_ssh_key(&SshKeyRequest {
        pubkey: "ssh-ed25519 AAAA user@host".to_string(),
        envkey_name: "laptop".to_string(),
        vm_ip: "10.0.0.9".to_string(),
    }).await.unwrap();

    assert_eq!(data["message"], "Key added");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_add_ssh_key_requires_pubkey() {
    let dispatcher = ActionDispatcher::new(DispatcherConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        timeout_ms: 1000,
    });

    let result = dispatcher.add_ssh_key(&SshKeyRequest {
        pubkey: " ".to_string(),
        envkey_name: "laptop".to_string(),
        vm_ip: "10.0.0.9".to_string(),
    }).await;

    assert_matches!(result, Err(DispatchError::Validation(msg)) if msg == "pubkey is required");
}

#[tokio::test]
async fn test_attach_volume_sends_request_fields() {
    let mut server = Server::new_async().await;
    let mock = server.mock("POST", "/webhook/attach_volume")
        .match_body(Matcher::Json(json!({
            "vm_id": "vm-1",
            "vm_name": "gpu-box",
            "volume_id": "vol-9",
            "volume_name": "data",
            "project_id": "p1"
        })))
        .with_status(200)
        .with_body(r#"{"success": true, "volume_state": "attaching"}"#)
        .create_async()
        .await;

    let dispatcher = dispatcher_for(&server);
    let data = dispatcher.attach_volume(&AttachVolumeRequest {
        vm_id: "vm-1".to_string(),
        vm_name: "gpu-box".to_string(),
        volume_id: "vol-9".to_string(),
        volume_name: "data".to_string(),
        project_id: "p1".to_string(),
    }).await.unwrap();

    assert_eq!(data["volume_state"], "attaching");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_detach_volume_sends_request_fields() {
    let mut server = Server::new_async().await;
    let mock = server.mock("POST", "/webhook/detach_volume")
        .match_body(Matcher::Json(json!({
            "vm_id": "vm-1",
            "vm_name": "gpu-box",
            "volume_id": "vol-9"
        })))
        .with_status(200)
        .create_async()
        .await;

    let dispatcher = dispatcher_for(&server);
    let data = dispatcher.detach_volume(&DetachVolumeRequest {
        vm_id: "vm-1".to_string(),
        vm_name: "gpu-box".to_string(),
        volume_id: "vol-9".to_string(),
    }).await.unwrap();

    assert_eq!(data, json!({}));
    mock.assert_async().await;
}
