use reqwest::{Client, StatusCode};
use scim_bulk::api::handlers::AppState;
use scim_bulk::api::routes::create_router;
use scim_bulk::config::{AppConfig, BulkConfig};
use scim_bulk::logic::UNBOUNDED_PERMITS;
use scim_bulk::InMemoryBackend;
use serde_json::{json, Value};
use tokio::net::TcpListener;

// Test client wrapper for making API calls
struct TestClient {
    client: Client,
    base_url: String,
}

impl TestClient {
    fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    async fn post(&self, path: &str, json: Value) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(&format!("{}{}", self.base_url, path))
            .json(&json)
            .send()
            .await
    }

    async fn post_body(
        &self,
        path: &str,
        content_type: &str,
        body: reqwest::Body,
    ) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(&format!("{}{}", self.base_url, path))
            .header("content-type", content_type)
            .body(body)
            .send()
            .await
    }

    async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client
            .get(&format!("{}{}", self.base_url, path))
            .send()
            .await
    }

    async fn get_url(&self, url: &str) -> reqwest::Result<reqwest::Response> {
        self.client.get(url).send().await
    }

    async fn patch(&self, path: &str, json: Value) -> reqwest::Result<reqwest::Response> {
        self.client
            .patch(&format!("{}{}", self.base_url, path))
            .json(&json)
            .send()
            .await
    }
}

/// Serve the router on an ephemeral port.
async fn spawn_server(bulk: BulkConfig) -> (TestClient, AppState<InMemoryBackend>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let mut config = AppConfig::default();
    config.bulk = bulk;
    config.server.base_uri = Some(format!("http://{}", address));

    let state = scim_bulk::build_state(&config).unwrap();
    let app = create_router().with_state(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (TestClient::new(format!("http://{}", address)), state)
}

fn bulk(operations: Value) -> Value {
    json!({
        "schemas": ["urn:scim:schemas:core:1.0"],
        "Operations": operations
    })
}

#[tokio::test]
async fn test_bulk_workflow_with_bulk_id_references() {
    let (client, _state) = spawn_server(BulkConfig::default()).await;

    println!("1. Creating a user and a group that references it");
    let response = client
        .post(
            "/Bulk",
            bulk(json!([
                {
                    "method": "POST",
                    "bulkId": "alice",
                    "path": "/Users",
                    "data": {"schemas": ["urn:scim:schemas:core:1.0"], "userName": "alice"}
                },
                {
                    "method": "POST",
                    "bulkId": "admins",
                    "path": "/Groups",
                    "data": {
                        "displayName": "Admins",
                        "members": [{"value": "bulkId:alice", "display": "Alice"}]
                    }
                },
                {
                    "method": "PUT",
                    "path": "/Users/bulkId:alice",
                    "data": {"userName": "alice", "title": "Administrator"}
                }
            ])),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let operations = body["Operations"].as_array().unwrap();
    assert_eq!(operations.len(), 3);
    assert_eq!(operations[0]["status"]["code"], json!("201"));
    assert_eq!(operations[1]["status"]["code"], json!("201"));
    assert_eq!(operations[2]["status"]["code"], json!("200"));
    assert_eq!(operations[0]["location"], operations[2]["location"]);

    println!("2. Reading back the user through its location");
    let user_location = operations[2]["location"].as_str().unwrap();
    let response = client.get_url(user_location).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let etag = response
        .headers()
        .get("etag")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(json!(etag), operations[2]["version"]);
    let user: Value = response.json().await.unwrap();
    assert_eq!(user["title"], json!("Administrator"));
    assert_eq!(user["meta"]["location"], json!(user_location));

    println!("3. Verifying the group member was resolved");
    let group_location = operations[1]["location"].as_str().unwrap();
    let group: Value = client.get_url(group_location).await.unwrap().json().await.unwrap();
    assert_eq!(group["members"][0]["value"], user["id"]);

    println!("✓ bulkId references resolved across operations");
}

#[tokio::test]
async fn test_xml_response_and_fail_on_errors() {
    let (client, _state) = spawn_server(BulkConfig::default()).await;

    let operations: Vec<Value> = (0..10)
        .map(|n| json!({"method": "DELETE", "path": format!("/Users/missing-{}", n)}))
        .collect();
    let mut request = bulk(json!(operations));
    request["failOnErrors"] = json!(3);

    let response = client.post("/Bulk.xml", request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/xml"
    );
    let body = response.text().await.unwrap();
    assert!(body.starts_with("<?xml"));
    assert_eq!(body.matches("<scim:Operation>").count(), 3);
    assert_eq!(body.matches("<scim:code>404</scim:code>").count(), 3);
}

#[tokio::test]
async fn test_quota_rejections_have_no_side_effects() {
    let (client, state) = spawn_server(BulkConfig {
        max_operations: Some(1),
        max_payload_size: Some(512),
        max_concurrent_requests: None,
    })
    .await;

    let big_name = "x".repeat(1024);
    let response = client
        .post(
            "/Bulk",
            bulk(json!([{"method": "POST", "bulkId": "a", "path": "/Users", "data": {"userName": big_name}}])),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["Errors"][0]["code"], json!("413"));

    let response = client
        .post(
            "/Bulk",
            bulk(json!([
                {"method": "POST", "bulkId": "a", "path": "/Users", "data": {"userName": "a"}},
                {"method": "POST", "bulkId": "b", "path": "/Users", "data": {"userName": "b"}}
            ])),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    assert_eq!(state.processor.backend().resource_count(), 0);
    assert_eq!(
        state.processor.quota().available_permits(),
        UNBOUNDED_PERMITS as u64
    );
}

#[tokio::test]
async fn test_chunked_body_over_payload_limit_is_rejected_while_reading() {
    let (client, state) = spawn_server(BulkConfig {
        max_payload_size: Some(256),
        ..BulkConfig::default()
    })
    .await;

    let operations: Vec<Value> = (0..10)
        .map(|n| json!({"method": "POST", "bulkId": format!("u{}", n), "path": "/Users", "data": {"userName": format!("user-{}", n)}}))
        .collect();
    let payload = bulk(json!(operations)).to_string().into_bytes();
    assert!(payload.len() > 256);

    // Streamed without a Content-Length header, so only the byte count read
    // so far can trip the limit.
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
        payload.chunks(64).map(|chunk| Ok(chunk.to_vec())).collect();
    let body = reqwest::Body::wrap_stream(futures::stream::iter(chunks));

    let response = client
        .post_body("/Bulk", "application/json", body)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["Errors"][0]["code"], json!("413"));
    assert_eq!(
        body["Errors"][0]["description"],
        json!("The size of the bulk operation exceeds the maxPayloadSize (256)")
    );

    assert_eq!(state.processor.backend().resource_count(), 0);
    assert_eq!(
        state.processor.quota().available_permits(),
        UNBOUNDED_PERMITS as u64
    );
}

#[tokio::test]
async fn test_xml_request_round_trip() {
    let (client, _state) = spawn_server(BulkConfig::default()).await;

    let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<scim:Bulk xmlns:scim="urn:scim:schemas:core:1.0">
  <scim:failOnErrors>1</scim:failOnErrors>
  <scim:Operations>
    <scim:Operation>
      <scim:method>POST</scim:method>
      <scim:bulkId>bob</scim:bulkId>
      <scim:path>/Users</scim:path>
      <scim:data><scim:userName>bob</scim:userName></scim:data>
    </scim:Operation>
    <scim:Operation>
      <scim:method>POST</scim:method>
      <scim:bulkId>crew</scim:bulkId>
      <scim:path>/Groups</scim:path>
      <scim:data>
        <scim:displayName>Crew</scim:displayName>
        <scim:members><scim:member><scim:value>bulkId:bob</scim:value></scim:member></scim:members>
      </scim:data>
    </scim:Operation>
  </scim:Operations>
</scim:Bulk>"#;

    let response = client
        .post_body("/Bulk.json", "application/xml", reqwest::Body::from(body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let result: Value = response.json().await.unwrap();
    assert_eq!(result["Operations"][0]["status"]["code"], json!("201"));
    assert_eq!(result["Operations"][1]["status"]["code"], json!("201"));

    let user: Value = client
        .get_url(result["Operations"][0]["location"].as_str().unwrap())
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let group: Value = client
        .get_url(result["Operations"][1]["location"].as_str().unwrap())
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(group["members"][0]["value"], user["id"]);
}

#[tokio::test]
async fn test_concurrency_limit_returns_503() {
    let (client, state) = spawn_server(BulkConfig {
        max_concurrent_requests: Some(1),
        ..BulkConfig::default()
    })
    .await;
    let request = bulk(json!([{"method": "DELETE", "path": "/Users/missing"}]));

    let held = state.processor.quota().try_acquire().unwrap();
    let response = client.post("/Bulk", request.clone()).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["Errors"][0]["code"], json!("503"));

    drop(held);
    let response = client.post("/Bulk", request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_quota_updates() {
    let (client, _state) = spawn_server(BulkConfig::default()).await;

    let config: Value = client
        .get("/ServiceProviderConfigs")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(config["bulk"]["supported"], json!(true));
    assert_eq!(config["bulk"]["maxOperations"], json!(i64::MAX));

    let response = client
        .patch(
            "/admin/bulk",
            json!({"maxOperations": 100, "maxPayloadSize": 1048576, "maxConcurrentRequests": 4}),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot: Value = response.json().await.unwrap();
    assert_eq!(snapshot["maxOperations"], json!(100));
    assert_eq!(snapshot["maxConcurrentRequests"], json!(4));
    assert_eq!(snapshot["availablePermits"], json!(4));

    let response = client
        .patch("/admin/bulk", json!({"maxConcurrentRequests": 0, "maxOperations": 5}))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .patch("/admin/bulk", json!({"maxOperations": null}))
        .await
        .unwrap();
    let snapshot: Value = response.json().await.unwrap();
    assert_eq!(snapshot["maxOperations"], Value::Null);
    assert_eq!(snapshot["maxPayloadSize"], json!(1048576));
    assert_eq!(snapshot["maxConcurrentRequests"], json!(4));

    let config: Value = client
        .get("/ServiceProviderConfigs")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(config["bulk"]["maxOperations"], json!(i64::MAX));
    assert_eq!(config["bulk"]["maxPayloadSize"], json!(1048576));
}
