use fedstream_backend::api;
use fedstream_backend::config::{FedstreamConfig, FedstreamPaths};
use fedstream_backend::database::Database;
use fedstream_backend::federation::registry::PeerRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tokio::time::{sleep, Duration};

struct TestNode {
    _dir: TempDir,
    database: Database,
    server: tokio::task::JoinHandle<()>,
    base_url: String,
    api_base: String,
}

impl TestNode {
    async fn shutdown(self) {
        self.server.abort();
        let _ = self.server.await;
    }
}

fn next_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .unwrap()
        .port()
}

async fn wait_for_health(base_url: &str) {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if let Ok(resp) = client.get(format!("{base_url}/health")).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("server did not become healthy in time");
}

/// Spawns a node on an ephemeral port, optionally pre-seeding its peers
/// file with other instances' addresses.
async fn spawn_node(peers: &[&TestNode]) -> TestNode {
    spawn_node_with_peer_addresses(
        &peers
            .iter()
            .map(|peer| peer.api_base.clone())
            .collect::<Vec<_>>(),
    )
    .await
}

async fn spawn_node_with_peer_addresses(peer_addresses: &[String]) -> TestNode {
    let dir = tempdir().expect("tempdir");
    let port = next_port();
    let paths = FedstreamPaths::from_base_dir(dir.path()).expect("paths");

    if !peer_addresses.is_empty() {
        let peers: Vec<Value> = peer_addresses
            .iter()
            .map(|address| {
                json!({
                    "service_address": address,
                    "username": "node",
                    "password": "secret",
                })
            })
            .collect();
        std::fs::write(&paths.peers_path, serde_json::to_vec(&peers).unwrap())
            .expect("write peers file");
    }

    let base_url = format!("http://127.0.0.1:{port}");
    let api_base = format!("{base_url}/api/v1");
    let config = FedstreamConfig::new(port, api_base.clone(), paths);

    let database = Database::connect(&config.paths).expect("database");
    database.ensure_migrations().expect("migrations");
    let registry = Arc::new(
        PeerRegistry::from_file(
            &config.paths.peers_path,
            api::build_http_client(&config).expect("http client"),
        )
        .expect("registry"),
    );

    let server_database = database.clone();
    let server = tokio::spawn(async move {
        let _ = api::serve_http(config, server_database, registry).await;
    });

    wait_for_health(&base_url).await;

    TestNode {
        _dir: dir,
        database,
        server,
        base_url,
        api_base,
    }
}

fn trailing_id(url: &str) -> i64 {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap()
        .parse()
        .expect("numeric id tail")
}

async fn create_author(client: &reqwest::Client, node: &TestNode, username: &str) -> i64 {
    let repr: Value = client
        .post(format!("{}/authors", node.base_url))
        .json(&json!({"username": username, "display_name": format!("{username} display")}))
        .send()
        .await
        .expect("create author response")
        .json()
        .await
        .expect("author json");
    trailing_id(repr.get("id").and_then(Value::as_str).expect("author id"))
}

async fn create_post(
    client: &reqwest::Client,
    node: &TestNode,
    author_id: i64,
    title: &str,
    visibility: &str,
) -> i64 {
    let repr: Value = client
        .post(format!("{}/posts/{author_id}", node.base_url))
        .json(&json!({
            "title": title,
            "description": "integration",
            "content": "hello world",
            "visibility": visibility,
        }))
        .send()
        .await
        .expect("create post response")
        .json()
        .await
        .expect("post json");
    trailing_id(repr.get("id").and_then(Value::as_str).expect("post id"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn inbox_like_from_local_actor_round_trips() {
    let node = spawn_node(&[]).await;
    let client = reqwest::Client::new();

    let author = create_author(&client, &node, "bob").await;
    let post = create_post(&client, &node, author, "Likeable", "PUBLIC").await;

    let payload = json!({
        "type": "Like",
        "author": {"id": format!("{}/authors/{author}", node.api_base)},
        "object": format!("{}/authors/{author}/posts/{post}", node.api_base),
    });

    let resp = client
        .post(format!("{}/authors/{author}/inbox", node.api_base))
        .json(&payload)
        .send()
        .await
        .expect("inbox response");
    assert_eq!(resp.status(), 200);
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("application/json"), "{content_type}");
    let body: Value = resp.json().await.expect("like body");
    assert_eq!(body["type"], "Like");
    assert_eq!(body["summary"], "bob display likes your post");

    // Redelivery of the same activity is an idempotent no-op.
    let resp = client
        .post(format!("{}/authors/{author}/inbox", node.api_base))
        .json(&payload)
        .send()
        .await
        .expect("inbox redelivery");
    assert_eq!(resp.status(), 200);

    let likes: Value = client
        .get(format!("{}/authors/{author}/posts/{post}/likes", node.api_base))
        .send()
        .await
        .expect("likes response")
        .json()
        .await
        .expect("likes json");
    assert_eq!(likes["type"], "likes");
    assert_eq!(likes["items"].as_array().unwrap().len(), 1);

    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn inbox_like_from_remote_actor_is_stored_separately() {
    use fedstream_backend::database::repositories::LikeRepository;

    let node = spawn_node(&[]).await;
    let client = reqwest::Client::new();

    let author = create_author(&client, &node, "bob").await;
    let post = create_post(&client, &node, author, "Likeable", "PUBLIC").await;

    let resp = client
        .post(format!("{}/authors/{author}/inbox", node.api_base))
        .json(&json!({
            "type": "Like",
            "author": {
                "id": "https://peer.example/api/v1/authors/9",
                "display_name": "Remote Rae",
            },
            "object": format!("{}/authors/{author}/posts/{post}", node.api_base),
        }))
        .send()
        .await
        .expect("inbox response");
    assert_eq!(resp.status(), 204);
    assert!(resp.bytes().await.expect("body").is_empty());

    let (local, remote) = node
        .database
        .with_repositories(|repos| {
            Ok((
                repos.likes().count_for_post(post)?,
                repos.likes().remote_count_for_post(post)?,
            ))
        })
        .expect("counts");
    assert_eq!(local, 0);
    assert_eq!(remote, 1);

    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn inbox_rejects_unknown_and_malformed_activities() {
    let node = spawn_node(&[]).await;
    let client = reqwest::Client::new();
    let author = create_author(&client, &node, "bob").await;
    let inbox = format!("{}/authors/{author}/inbox", node.api_base);

    let resp = client
        .post(&inbox)
        .json(&json!({"type": "Poke"}))
        .send()
        .await
        .expect("unknown type response");
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.expect("detail body");
    assert_eq!(body["detail"], "Unknown type");

    let resp = client
        .post(&inbox)
        .header("content-type", "application/json")
        .body("this is not json")
        .send()
        .await
        .expect("malformed response");
    assert_eq!(resp.status(), 422);

    for kind in ["Post", "Comment"] {
        let resp = client
            .post(&inbox)
            .json(&json!({"type": kind}))
            .send()
            .await
            .expect("deferred response");
        assert_eq!(resp.status(), 501, "inbound {kind} is a named gap");
    }

    let resp = client.get(&inbox).send().await.expect("get inbox");
    assert_eq!(resp.status(), 501);
    let resp = client.delete(&inbox).send().await.expect("delete inbox");
    assert_eq!(resp.status(), 501);

    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn stream_merges_two_instances_newest_first() {
    let node_a = spawn_node(&[]).await;
    let node_b = spawn_node(&[&node_a]).await;
    let client = reqwest::Client::new();

    let alice = create_author(&client, &node_a, "alice").await;
    let bob = create_author(&client, &node_b, "bob").await;

    // Interleave creation across instances; publish instants increase.
    create_post(&client, &node_b, bob, "first-local", "PUBLIC").await;
    sleep(Duration::from_millis(20)).await;
    create_post(&client, &node_a, alice, "second-remote", "PUBLIC").await;
    sleep(Duration::from_millis(20)).await;
    create_post(&client, &node_b, bob, "third-local", "PUBLIC").await;

    let stream: Value = client
        .get(format!("{}/stream/{bob}", node_b.base_url))
        .send()
        .await
        .expect("stream response")
        .json()
        .await
        .expect("stream json");
    assert_eq!(stream["type"], "stream");
    let items = stream["items"].as_array().expect("stream items");
    let titles: Vec<&str> = items
        .iter()
        .map(|item| item["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["third-local", "second-remote", "first-local"]);

    // The remote item's detail URL routes through the local proxy and
    // re-fetches the post live from the owning peer.
    let remote_item = &items[1];
    let detail_url = remote_item["detailUrl"].as_str().expect("detail url");
    assert!(detail_url.contains("/remote/posts?url="), "{detail_url}");
    let detail: Value = client
        .get(detail_url)
        .send()
        .await
        .expect("remote detail response")
        .json()
        .await
        .expect("remote detail json");
    assert_eq!(detail["title"], "second-remote");
    assert_eq!(detail["author"]["displayName"], "alice display");

    node_b.shutdown().await;
    node_a.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stream_survives_an_unreachable_peer() {
    // Nothing listens on the peer address; its contribution must be empty.
    let dead_peer = format!("http://127.0.0.1:{}/api/v1", next_port());
    let node = spawn_node_with_peer_addresses(&[dead_peer]).await;
    let client = reqwest::Client::new();

    let bob = create_author(&client, &node, "bob").await;
    create_post(&client, &node, bob, "still-here", "PUBLIC").await;

    let resp = client
        .get(format!("{}/stream/{bob}", node.base_url))
        .send()
        .await
        .expect("stream response");
    assert_eq!(resp.status(), 200);
    let stream: Value = resp.json().await.expect("stream json");
    let items = stream["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["title"], "still-here");

    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn friends_posts_need_a_symmetric_follow() {
    let node = spawn_node(&[]).await;
    let client = reqwest::Client::new();

    let alice = create_author(&client, &node, "alice").await;
    let bob = create_author(&client, &node, "bob").await;
    create_post(&client, &node, alice, "for-friends", "FRIENDS").await;

    let feed_titles = |client: &reqwest::Client| {
        let url = format!("{}/stream/{bob}", node.base_url);
        let client = client.clone();
        async move {
            let stream: Value = client
                .get(url)
                .send()
                .await
                .expect("stream response")
                .json()
                .await
                .expect("stream json");
            stream["items"]
                .as_array()
                .unwrap()
                .iter()
                .map(|item| item["title"].as_str().unwrap().to_string())
                .collect::<Vec<_>>()
        }
    };

    assert!(feed_titles(&client).await.is_empty());

    // bob -> alice accepted; one direction only is still not enough.
    let resp = client
        .post(format!("{}/follow/{bob}/request/{alice}", node.base_url))
        .send()
        .await
        .expect("request response");
    assert_eq!(resp.status(), 204);
    let resp = client
        .post(format!("{}/follow/{alice}/accept/{bob}", node.base_url))
        .send()
        .await
        .expect("accept response");
    assert_eq!(resp.status(), 204);
    assert!(feed_titles(&client).await.is_empty());

    // alice -> bob closes the pair; the FRIENDS post becomes visible.
    let resp = client
        .post(format!("{}/follow/{alice}/request/{bob}", node.base_url))
        .send()
        .await
        .expect("request response");
    assert_eq!(resp.status(), 204);
    let resp = client
        .post(format!("{}/follow/{bob}/accept/{alice}", node.base_url))
        .send()
        .await
        .expect("accept response");
    assert_eq!(resp.status(), 204);
    assert_eq!(feed_titles(&client).await, vec!["for-friends".to_string()]);

    // Both sides now list each other as true friends.
    let friends: Value = client
        .get(format!("{}/follow/{alice}/friends", node.base_url))
        .send()
        .await
        .expect("friends response")
        .json()
        .await
        .expect("friends json");
    assert_eq!(friends["items"].as_array().unwrap().len(), 1);

    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn follower_edges_use_put_get_delete_semantics() {
    let node = spawn_node(&[]).await;
    let client = reqwest::Client::new();

    let alice = create_author(&client, &node, "alice").await;
    let bob = create_author(&client, &node, "bob").await;
    let edge = format!("{}/authors/{alice}/followers/{bob}", node.api_base);

    let resp = client.put(&edge).send().await.expect("put follower");
    assert_eq!(resp.status(), 200, "first PUT creates the edge");
    let resp = client.put(&edge).send().await.expect("put follower again");
    assert_eq!(resp.status(), 204, "repeated PUT is a no-op");

    let resp = client.get(&edge).send().await.expect("get follower");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("follower json");
    assert_eq!(body["displayName"], "bob display");

    let followers: Value = client
        .get(format!("{}/authors/{alice}/followers", node.api_base))
        .send()
        .await
        .expect("followers response")
        .json()
        .await
        .expect("followers json");
    assert_eq!(followers["type"], "followers");
    assert_eq!(followers["items"].as_array().unwrap().len(), 1);

    let resp = client.delete(&edge).send().await.expect("delete follower");
    assert_eq!(resp.status(), 204);
    let resp = client.get(&edge).send().await.expect("get follower after delete");
    assert_eq!(resp.status(), 404);

    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn follow_activity_crosses_instances_through_the_outbox() {
    let node_a = spawn_node(&[]).await;
    let node_b = spawn_node(&[&node_a]).await;
    let client = reqwest::Client::new();

    let alice = create_author(&client, &node_a, "alice").await;
    let bob = create_author(&client, &node_b, "bob").await;

    // Bob (on B) asks to follow Alice (on A) using her representation as
    // fetched from A's author API.
    let alice_repr: Value = client
        .get(format!("{}/authors/{alice}", node_a.api_base))
        .send()
        .await
        .expect("alice repr response")
        .json()
        .await
        .expect("alice repr json");

    let resp = client
        .post(format!("{}/follow/{bob}/remote", node_b.base_url))
        .json(&alice_repr)
        .send()
        .await
        .expect("remote follow response");
    assert_eq!(resp.status(), 202);

    // The Follow activity landed in Alice's inbox as a remote request.
    let requests: Value = client
        .get(format!("{}/follow/{alice}/requests", node_a.base_url))
        .send()
        .await
        .expect("requests response")
        .json()
        .await
        .expect("requests json");
    let items = requests["items"].as_array().expect("request items");
    assert_eq!(items.len(), 1);
    let from_url = items[0]["id"].as_str().expect("requester id");
    assert!(from_url.ends_with(&format!("/authors/{bob}")), "{from_url}");

    // Alice accepts; the edge is kept by URL on her side.
    let resp = client
        .post(format!("{}/follow/{alice}/accept-remote", node_a.base_url))
        .query(&[("url", from_url)])
        .send()
        .await
        .expect("accept remote response");
    assert_eq!(resp.status(), 204);

    node_b.shutdown().await;
    node_a.shutdown().await;
}
