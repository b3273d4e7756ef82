//! Mutual TLS, trust anchors and proxy tunneling.

mod support;

use std::sync::Arc;

use http::StatusCode;

use support::{init_tracing, tls_server};
use towline::client::{Client, CollectingHandler};
use towline::tls::{
    FileStoreKeyMaterial, KeyMaterialProvider, NoKeyMaterial, StoreFormat, TrustProvider,
};
use towline::{Body, ErrorKind, Request};

const CLIENT_STORE: &str = "tests/minica/client/store.pem";
const CA_FILE: &str = "tests/minica/minica.pem";
const UNTRUSTED_CA_FILE: &str = "tests/minica/untrusted-ca.pem";

fn get(uri: http::Uri) -> Request {
    http::Request::get(uri).body(Body::empty()).unwrap()
}

fn trust() -> TrustProvider {
    TrustProvider::pem_file(CA_FILE).unwrap()
}

fn client_keys() -> Arc<dyn KeyMaterialProvider> {
    Arc::new(FileStoreKeyMaterial::load(CLIENT_STORE, StoreFormat::Pem, None).unwrap())
}

#[tokio::test]
async fn server_only_tls_round_trip() {
    init_tracing();
    let server = tls_server(false, StatusCode::OK, "secure").await;
    let client = Client::builder()
        .trust(trust())
        .key_material(Some(Arc::new(NoKeyMaterial)))
        .build()
        .unwrap();

    for _ in 0..2 {
        let (handler, collected) = CollectingHandler::new();
        client
            .execute(get(server.uri("https", "/")), handler)
            .await
            .unwrap();

        let collected = collected.await.unwrap();
        assert_eq!(collected.status(), StatusCode::OK);
        assert_eq!(collected.body.as_ref(), b"secure");
    }

    // Both requests shared one negotiated connection.
    assert_eq!(server.accepts(), 1);
}

#[tokio::test]
async fn mutual_tls_round_trip() {
    init_tracing();
    let server = tls_server(true, StatusCode::OK, "mutual").await;
    let client = Client::builder()
        .trust(trust())
        .key_material(Some(client_keys()))
        .build()
        .unwrap();

    let (handler, collected) = CollectingHandler::new();
    client
        .execute(get(server.uri("https", "/")), handler)
        .await
        .unwrap();

    let collected = collected.await.unwrap();
    assert_eq!(collected.status(), StatusCode::OK);
    assert_eq!(collected.body.as_ref(), b"mutual");
}

#[tokio::test]
async fn missing_client_certificate_fails_before_headers() {
    init_tracing();
    let server = tls_server(true, StatusCode::OK, "unreached").await;
    let client = Client::builder()
        .trust(trust())
        .key_material(Some(Arc::new(NoKeyMaterial)))
        .build()
        .unwrap();

    let (handler, collected) = CollectingHandler::new();
    let error = client
        .execute(get(server.uri("https", "/")), handler)
        .await
        .unwrap_err();

    // Under TLS 1.3 the certificate-required alert may arrive only on the
    // first read, after the local handshake finished.
    assert!(
        matches!(error.kind(), ErrorKind::Handshake | ErrorKind::Connection),
        "unexpected error: {error}"
    );

    let collected = collected.await.unwrap();
    assert!(collected.head.is_none(), "no response head was delivered");
    assert!(collected.error.is_some());
}

#[tokio::test]
async fn untrusted_server_is_a_handshake_error() {
    init_tracing();
    let server = tls_server(false, StatusCode::OK, "unreached").await;
    let client = Client::builder()
        .trust(TrustProvider::pem_file(UNTRUSTED_CA_FILE).unwrap())
        .key_material(Some(Arc::new(NoKeyMaterial)))
        .build()
        .unwrap();

    let (handler, collected) = CollectingHandler::new();
    let error = client
        .execute(get(server.uri("https", "/")), handler)
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Handshake);
    assert!(collected.await.unwrap().head.is_none());
}

#[tokio::test]
async fn tls_proxy_refusing_connect_delivers_its_response() {
    init_tracing();
    // A proxy that answers every request, CONNECT included, with 404.
    let proxy = tls_server(false, StatusCode::NOT_FOUND, "no tunnel here").await;
    let client = Client::builder()
        .proxy(proxy.uri("https", "/"))
        .trust(trust())
        .key_material(Some(client_keys()))
        .build()
        .unwrap();

    let (handler, collected) = CollectingHandler::new();
    client
        .execute(get("https://origin.invalid/".parse().unwrap()), handler)
        .await
        .unwrap();

    let collected = collected.await.unwrap();
    assert_eq!(collected.status(), StatusCode::NOT_FOUND);
    assert_eq!(collected.body.as_ref(), b"no tunnel here");
    assert!(collected.error.is_none());
    assert_eq!(proxy.accepts(), 1);
}

#[tokio::test]
async fn environment_key_material_round_trip() {
    init_tracing();
    let server = tls_server(true, StatusCode::OK, "from env").await;

    std::env::set_var("TOWLINE_KEY_STORE", CLIENT_STORE);
    std::env::set_var("TOWLINE_KEY_STORE_TYPE", "pem");

    // The default provider reads the variables at first negotiation.
    let client = Client::builder().trust(trust()).build().unwrap();
    let (handler, collected) = CollectingHandler::new();
    client
        .execute(get(server.uri("https", "/")), handler)
        .await
        .unwrap();
    assert_eq!(collected.await.unwrap().status(), StatusCode::OK);

    // An explicit `None` keeps the same default provider.
    let client = Client::builder()
        .trust(trust())
        .key_material(None)
        .build()
        .unwrap();
    let (handler, collected) = CollectingHandler::new();
    client
        .execute(get(server.uri("https", "/")), handler)
        .await
        .unwrap();
    assert_eq!(collected.await.unwrap().status(), StatusCode::OK);

    std::env::remove_var("TOWLINE_KEY_STORE");
    std::env::remove_var("TOWLINE_KEY_STORE_TYPE");

    // With the variables cleared a fresh client has no certificate to
    // offer and the server turns it away.
    let client = Client::builder().trust(trust()).build().unwrap();
    let (handler, collected) = CollectingHandler::new();
    let error = client
        .execute(get(server.uri("https", "/")), handler)
        .await
        .unwrap_err();
    assert!(matches!(
        error.kind(),
        ErrorKind::Handshake | ErrorKind::Connection
    ));
    assert!(collected.await.unwrap().head.is_none());
}
