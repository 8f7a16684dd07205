//! Two clients sharing one account against a live edge proxy

use std::sync::Arc;

use parley_client::{AlwaysConfirm, MemoryBackend, ParleyClient, SendOutcome};
use parley_config::{ClientConfig, ServerConfig};
use parley_server::{build_app, AppState, MemoryKv};
use serde_json::json;

async fn spawn_server(upstream_url: String) -> String {
    let config = ServerConfig {
        allowed_users: vec!["ana".to_string()],
        upstream_url,
        data_path: None,
        ..ServerConfig::default()
    };
    let state = AppState::new(config, Arc::new(MemoryKv::new()))
        .unwrap()
        .with_password_iterations(1_000)
        .with_api_key("upstream-key");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_app(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(server_url: &str) -> ParleyClient {
    let config = ClientConfig {
        server_url: server_url.to_string(),
        data_dir: None,
        ..ClientConfig::default()
    };
    ParleyClient::with_backend(
        &config,
        Arc::new(MemoryBackend::new()),
        Arc::new(AlwaysConfirm),
    )
    .unwrap()
}

async fn mock_upstream(server: &mut mockito::ServerGuard, reply: &str) -> mockito::Mock {
    server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer upstream-key")
        .with_status(200)
        .with_body(
            json!({
                "choices": [{"message": {"role": "assistant", "content": reply}}],
                "usage": {"total_tokens": 12}
            })
            .to_string(),
        )
        .create_async()
        .await
}

#[tokio::test]
async fn test_two_devices_converge() {
    let mut upstream = mockito::Server::new_async().await;
    let _reply = mock_upstream(&mut upstream, "Start at Belém.").await;
    let url = spawn_server(format!("{}/v1/chat/completions", upstream.url())).await;

    let laptop = client(&url);
    let phone = client(&url);
    laptop.session().register("Ana", "pw").await.unwrap();
    phone.session().login("ana", "pw").await.unwrap();

    let outcome = laptop
        .controller()
        .send_message("Plan a day in Lisbon", vec![])
        .await
        .unwrap();
    assert!(matches!(outcome, SendOutcome::Replied(_)));
    laptop.sync().wait_background().await;
    let id = laptop.controller().active().await.unwrap().unwrap().id;

    let report = phone
        .sync()
        .server_sync_merge()
        .await
        .unwrap()
        .done()
        .unwrap();
    assert_eq!(report.adopted, vec![id.clone()]);
    let on_phone = phone.store().load().await.unwrap();
    let adopted = on_phone.get(&id).unwrap();
    assert_eq!(adopted.title, "Plan a day in Lisbon");
    assert_eq!(adopted.messages.len(), 2);

    assert!(phone.controller().select_conversation(&id).await.unwrap());
    phone
        .controller()
        .send_message("And in the evening?", vec![])
        .await
        .unwrap();
    phone.sync().wait_background().await;

    let report = laptop
        .sync()
        .server_sync_merge()
        .await
        .unwrap()
        .done()
        .unwrap();
    assert_eq!(report.updated, vec![id.clone()]);
    let on_laptop = laptop.store().load().await.unwrap();
    assert_eq!(on_laptop.get(&id).unwrap().messages.len(), 4);
    assert_eq!(
        on_laptop.get(&id).unwrap().messages,
        phone.store().load().await.unwrap().get(&id).unwrap().messages
    );
}

#[tokio::test]
async fn test_signed_out_device_does_not_sync() {
    let url = spawn_server("http://127.0.0.1:9/v1/chat/completions".to_string()).await;
    let device = client(&url);

    device.session().register("ana", "pw").await.unwrap();
    device.controller().create_conversation().await.unwrap();
    device.sync().wait_background().await;
    let token = device.session().current_session().unwrap().token;
    device.session().logout().await.unwrap();

    assert!(device
        .sync()
        .server_sync_merge()
        .await
        .unwrap()
        .is_skipped());

    let status = reqwest::Client::new()
        .get(format!("{}/auth/me", url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_restore_after_restart() {
    let url = spawn_server("http://127.0.0.1:9/v1/chat/completions".to_string()).await;
    let backend = Arc::new(MemoryBackend::new());
    let config = ClientConfig {
        server_url: url.clone(),
        ..ClientConfig::default()
    };

    let first =
        ParleyClient::with_backend(&config, backend.clone(), Arc::new(AlwaysConfirm)).unwrap();
    first.session().register("ana", "pw").await.unwrap();
    first.shutdown().await;

    let second = ParleyClient::with_backend(&config, backend, Arc::new(AlwaysConfirm)).unwrap();
    second.start().await.unwrap();
    let session = second.session().current_session().unwrap();
    assert_eq!(session.username, "ana");
    second.shutdown().await;
}
