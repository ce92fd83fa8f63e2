mod harness;

use foundry_config::ProviderType;
use harness::config::ConfigBuilder;
use harness::server::TestServer;

/// Keyless provider that is never called
fn builder(dir: &tempfile::TempDir) -> ConfigBuilder {
    ConfigBuilder::new(dir.path()).with_provider_key("trellis", ProviderType::Trellis, "http://127.0.0.1:9", None)
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let dir = tempfile::tempdir().unwrap();
    let config = builder(&dir).build();
    let server = TestServer::start(config).await.unwrap();

    let resp = server.client().get(server.url("/health")).send().await.unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn health_endpoint_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let config = builder(&dir).without_health().build();
    let server = TestServer::start(config).await.unwrap();

    let resp = server.client().get(server.url("/health")).send().await.unwrap();

    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(builder(&dir).build()).await.unwrap();

    let resp = server.client().get(server.url("/api/nothing")).send().await.unwrap();

    assert_eq!(resp.status(), 404);
}
