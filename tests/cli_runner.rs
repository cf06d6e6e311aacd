//! Subcommand dispatch against a mock Pyxis

use clap::Parser;
use pubtools_pyxis::Client;
use pubtools_pyxis::cli::{Args, Runner};
use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn runner(server: &MockServer, args: &[&str]) -> Runner {
    let uri = server.uri();
    let mut argv = vec!["pubtools-pyxis"];
    argv.push(args[0]);
    argv.extend_from_slice(&["--pyxis-server", uri.as_str(), "--pyxis-krb-principal", "someone@REALM"]);
    argv.extend_from_slice(&args[1..]);
    Runner::new(Args::try_parse_from(argv).unwrap())
}

fn client_for(server: &MockServer) -> Client {
    Client::builder(server.uri())
        .with_backoff_factor(0.0)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_upload_signatures_from_file() {
    let server = MockServer::start().await;
    let signatures = json!([
        {"manifest_digest": "sha256:a", "reference": "registry.io/r:1"},
        {"manifest_digest": "sha256:b", "reference": "registry.io/r:2"}
    ]);
    for signature in signatures.as_array().unwrap() {
        Mock::given(method("POST"))
            .and(path("/v1/signatures"))
            .and(body_json(signature.clone()))
            .respond_with(ResponseTemplate::new(201).set_body_json(signature.clone()))
            .expect(1)
            .mount(&server)
            .await;
    }

    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", signatures).unwrap();
    let arg = format!("--signatures=@{}", file.path().display());

    let result = runner(&server, &["upload-signatures", arg.as_str()])
        .dispatch(&client_for(&server))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_get_signatures_from_csv() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/signatures"))
        .and(query_param("filter", "manifest_digest=in=(sha256:a,sha256:b)"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": [{"_id": "1"}], "total": 1, "page_size": 100})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = runner(
        &server,
        &["get-signatures", "--manifest-digest", "sha256:a,sha256:b"],
    )
    .dispatch(&client_for(&server))
    .await
    .unwrap();
    assert_eq!(result, Some(json!([{"_id": "1"}])));
}

#[tokio::test]
async fn test_delete_signatures_prints_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(2)
        .mount(&server)
        .await;

    let result = runner(&server, &["delete-signatures", "--ids", "x,y"])
        .dispatch(&client_for(&server))
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_get_operator_indices_command() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/operators/indices"))
        .and(query_param("ocp_versions_range", "4.6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"path": "idx"}]})))
        .mount(&server)
        .await;

    let result = runner(&server, &["get-operator-indices", "--ocp-versions-range", "4.6"])
        .dispatch(&client_for(&server))
        .await
        .unwrap();
    assert_eq!(result, Some(json!([{"path": "idx"}])));
}

#[tokio::test]
async fn test_conflicting_registry_flags_fail_before_auth() {
    let server = MockServer::start().await;
    let runner = runner(
        &server,
        &[
            "get-repo-metadata",
            "--repo-name",
            "r",
            "--only-internal-registry",
            "--only-partner-registry",
        ],
    );
    assert_eq!(runner.run().await, 1);
    assert!(server.received_requests().await.unwrap().is_empty());
}
