use std::sync::Arc;
use std::time::Duration;

use postview_api::app::AppServices;
use postview_api::config::AppConfig;
use reqwest::StatusCode;
use serde_json::{json, Value};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    _services: Arc<AppServices>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory wiring, ephemeral port.
        let config = AppConfig {
            publish_timeout: Duration::from_secs(1),
            partitions: 2,
            ..AppConfig::default()
        };
        let (app, services) = postview_api::app::build_app(&config)
            .await
            .expect("failed to build app");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            handle,
            _services: services,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn create_user(client: &reqwest::Client, srv: &TestServer, name: &str, department: &str) -> i64 {
    let res = client
        .post(srv.url("/api/users"))
        .json(&json!({
            "name": name,
            "email": format!("{}@example.com", name.to_lowercase()),
            "department": department,
            "status": "ACTIVE"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["version"], 1);
    body["id"].as_i64().unwrap()
}

/// The view is eventually consistent with the user side; poll the view
/// listing until `check` accepts it.
async fn authors_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    check: impl Fn(&[Value]) -> bool,
) -> Vec<Value> {
    for _ in 0..100 {
        let res = client.get(srv.url("/api/posts/users")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let rows: Vec<Value> = res.json().await.unwrap();
        if check(&rows) {
            return rows;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    panic!("user view did not converge within timeout");
}

fn row_for(rows: &[Value], id: i64) -> Option<&Value> {
    rows.iter().find(|r| r["userId"] == id)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_is_ok() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn user_flows_into_post_enrichment_and_department_filter() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let bob = create_user(&client, &srv, "Bob", "Eng").await;
    let sue = create_user(&client, &srv, "Sue", "Sales").await;
    authors_eventually(&client, &srv, |rows| rows.len() == 2).await;

    let res = client
        .post(srv.url("/api/posts"))
        .json(&json!({ "title": "Roadmap", "content": "Q3", "authorId": bob }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let post: Value = res.json().await.unwrap();
    assert_eq!(post["authorName"], "Bob");
    assert_eq!(post["authorEmail"], "bob@example.com");
    assert_eq!(post["authorDepartment"], "Eng");

    let res = client
        .post(srv.url("/api/posts"))
        .json(&json!({ "title": "Pipeline", "authorId": sue }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let eng: Vec<Value> = client
        .get(srv.url("/api/posts/by-department/Eng"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(eng.len(), 1);
    assert_eq!(eng[0]["id"], post["id"]);

    let sales_authors: Vec<Value> = client
        .get(srv.url("/api/posts/users/department/Sales"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sales_authors.len(), 1);
    assert_eq!(sales_authors[0]["name"], "Sue");

    let active: Vec<Value> = client
        .get(srv.url("/api/posts/users/status/ACTIVE"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(active.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rename_and_delete_propagate_to_reads() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let alice = create_user(&client, &srv, "Alice", "Eng").await;
    authors_eventually(&client, &srv, |rows| row_for(rows, alice).is_some()).await;

    let post: Value = client
        .post(srv.url("/api/posts"))
        .json(&json!({ "title": "Hello", "authorId": alice }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let post_id = post["id"].as_i64().unwrap();

    let res = client
        .put(srv.url(&format!("/api/users/{alice}")))
        .json(&json!({ "name": "Alicia", "email": "alicia@example.com", "department": "Research", "status": "ACTIVE" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let updated: Value = res.json().await.unwrap();
    assert_eq!(updated["version"], 2);

    let rows = authors_eventually(&client, &srv, |rows| {
        row_for(rows, alice).is_some_and(|r| r["version"] == 2)
    })
    .await;
    assert_eq!(row_for(&rows, alice).unwrap()["name"], "Alicia");

    let read: Value = client
        .get(srv.url(&format!("/api/posts/{post_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(read["authorName"], "Alicia");
    assert_eq!(read["authorDepartment"], "Research");

    let res = client
        .delete(srv.url(&format!("/api/users/{alice}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    authors_eventually(&client, &srv, |rows| row_for(rows, alice).is_none()).await;

    // The post keeps the last author fields it saw.
    let read: Value = client
        .get(srv.url(&format!("/api/posts/{post_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(read["authorName"], "Alicia");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn post_with_unknown_author_is_still_created() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/posts"))
        .json(&json!({ "title": "Orphan", "authorId": 404 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let post: Value = res.json().await.unwrap();
    assert!(post["authorName"].is_null());
    assert_eq!(post["authorId"], 404);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn errors_use_json_shape() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/api/posts/999")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
    assert_eq!(body["message"], "post not found: 999");

    let res = client.delete(srv.url("/api/users/999")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.get(srv.url("/api/posts/abc")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");

    let res = client
        .post(srv.url("/api/posts"))
        .json(&json!({ "title": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
}
