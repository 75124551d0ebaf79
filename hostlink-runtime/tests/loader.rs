//! Loader tests: sources, content-type handling and state transitions.

mod common;

use common::{guest_module, minimal_module};
use hostlink_core::HostlinkError;
use hostlink_runtime::{
    BridgeConfig, HostEnv, Loader, LoaderStatus, ModuleSource, Runtime, RuntimeConfig,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn loader() -> Loader {
    let runtime = Runtime::new(RuntimeConfig::testing()).expect("Failed to create runtime");
    Loader::new(Arc::new(runtime), BridgeConfig::default(), HostEnv::default())
        .expect("Failed to create loader")
}

async fn serve(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn loads_streamed_module_once() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/app.wasm",
        ResponseTemplate::new(200).set_body_raw(minimal_module(), "application/wasm"),
    )
    .await;

    let loader = loader();
    assert_eq!(loader.status(), LoaderStatus::Uninitialized);

    let url = format!("{}/app.wasm", server.uri());
    let first = loader.init(ModuleSource::Url(url.clone())).await.unwrap();
    assert_eq!(loader.status(), LoaderStatus::Ready);
    assert_eq!(first.lock().module_name(), "app.wasm");

    let second = loader.init(ModuleSource::Url(url)).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &loader.bridge().unwrap()));
}

#[tokio::test]
async fn falls_back_to_buffered_load_on_wrong_mime() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/app.bin",
        ResponseTemplate::new(200).set_body_raw(minimal_module(), "application/octet-stream"),
    )
    .await;

    let loader = loader();
    let bridge = loader
        .init(ModuleSource::Url(format!("{}/app.bin", server.uri())))
        .await
        .unwrap();
    bridge.lock().call("__hostlink_start").unwrap();
    assert_eq!(loader.status(), LoaderStatus::Ready);
}

#[tokio::test]
async fn html_body_is_rejected_and_loader_recovers() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/app.wasm",
        ResponseTemplate::new(200)
            .set_body_raw(b"<!doctype html><html></html>".to_vec(), "application/wasm"),
    )
    .await;

    let loader = loader();
    let err = loader
        .init(ModuleSource::Url(format!("{}/app.wasm", server.uri())))
        .await
        .unwrap_err();
    assert!(matches!(err, HostlinkError::BadMagic { .. }));
    assert_eq!(loader.status(), LoaderStatus::Uninitialized);
    assert!(loader.bridge().is_none());

    loader.init_sync(minimal_module()).unwrap();
    assert_eq!(loader.status(), LoaderStatus::Ready);
}

#[tokio::test]
async fn http_error_status_is_reported() {
    let server = MockServer::start().await;
    serve(&server, "/missing.wasm", ResponseTemplate::new(404)).await;

    let loader = loader();
    let err = loader
        .init(ModuleSource::Url(format!("{}/missing.wasm", server.uri())))
        .await
        .unwrap_err();
    assert!(matches!(err, HostlinkError::HttpStatus { status: 404, .. }));
    assert_eq!(loader.status(), LoaderStatus::Uninitialized);
}

#[tokio::test]
async fn loads_from_file() {
    let mut file = tempfile::Builder::new()
        .suffix(".wasm")
        .tempfile()
        .unwrap();
    file.write_all(&minimal_module()).unwrap();

    let loader = loader();
    let bridge = loader.init(file.path().to_path_buf()).await.unwrap();
    assert!(bridge.lock().module_name().ends_with(".wasm"));
}

#[tokio::test]
async fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let loader = loader();
    let err = loader
        .init(dir.path().join("absent.wasm"))
        .await
        .unwrap_err();
    assert!(matches!(err, HostlinkError::Io { .. }));
    assert_eq!(loader.status(), LoaderStatus::Uninitialized);
}

#[tokio::test]
async fn trapping_start_leaves_loader_uninitialized() {
    let wasm = guest_module("", r#"(func (export "__hostlink_start") unreachable)"#);

    let loader = loader();
    let err = loader.init(wasm).await.unwrap_err();
    assert!(matches!(err, HostlinkError::GuestTrap { ref function, .. } if function == "__hostlink_start"));
    assert_eq!(loader.status(), LoaderStatus::Uninitialized);
}

#[tokio::test]
async fn missing_import_fails_instantiation() {
    let wasm = guest_module(
        r#"(import "hostlink" "no_such_import" (func (param i32)))"#,
        r#"(func (export "__hostlink_start"))"#,
    );

    let loader = loader();
    let err = loader.init(wasm).await.unwrap_err();
    assert!(matches!(err, HostlinkError::Instantiate { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_init_is_rejected() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/slow.wasm",
        ResponseTemplate::new(200)
            .set_body_raw(minimal_module(), "application/wasm")
            .set_delay(Duration::from_millis(500)),
    )
    .await;

    let loader = Arc::new(loader());
    let url = format!("{}/slow.wasm", server.uri());
    let pending = {
        let loader = Arc::clone(&loader);
        tokio::spawn(async move { loader.init(ModuleSource::Url(url)).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(loader.status(), LoaderStatus::Instantiating);
    let err = loader.init_sync(minimal_module()).unwrap_err();
    assert!(matches!(err, HostlinkError::LoaderBusy));

    let bridge = pending.await.unwrap().unwrap();
    assert_eq!(loader.status(), LoaderStatus::Ready);
    assert!(Arc::ptr_eq(&bridge, &loader.bridge().unwrap()));
}
