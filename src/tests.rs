//! Integration tests for the content manager backend.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::auth::IdentityVerifier;
use crate::client::{
    ApiClient, ClientError, ContentPatch, ProjectSubscription, Session, SignInProfile, Workspace,
};
use crate::config::{Config, DEFAULT_MAX_UPLOAD_BYTES};
use crate::db::{init_database, Repository};
use crate::models::{InvitedUser, MetadataPatch, ProjectLocale};
use crate::storage::ObjectStore;
use crate::{create_router, AppState};

const SECRET: &str = "integration-test-secret";

#[derive(serde::Serialize)]
struct Claims<'a> {
    sub: &'a str,
    exp: u64,
}

/// Mint an identity token for `uid`.
fn token(uid: &str) -> String {
    let exp = (chrono::Utc::now().timestamp() + 3600) as u64;
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &Claims { sub: uid, exp },
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    storage_path: PathBuf,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_upload_limit(DEFAULT_MAX_UPLOAD_BYTES).await
    }

    async fn with_upload_limit(max_upload_bytes: usize) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");
        let storage_path = temp_dir.path().join("storage");

        // Bind first so public file URLs point at this server
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));
        let storage = Arc::new(
            ObjectStore::open(&storage_path, &base_url)
                .await
                .expect("Failed to open storage"),
        );

        let config = Config {
            db_path,
            storage_path: storage_path.clone(),
            bind_addr: addr,
            public_base_url: base_url.clone(),
            log_level: "warn".to_string(),
            idp_secret: Some(SECRET.to_string()),
            idp_issuer: None,
            idp_audience: None,
            allowed_origins: Vec::new(),
            max_upload_bytes,
        };

        let state = AppState {
            repo,
            identity: Arc::new(IdentityVerifier::from_config(&config)),
            storage,
            config: Arc::new(config),
        };

        let app = create_router(state);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        TestFixture {
            client: Client::new(),
            base_url,
            storage_path,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_as(&self, uid: &str, path: &str, extra: &[(&str, &str)]) -> (u16, Value) {
        let user_token = token(uid);
        let mut query: Vec<(&str, &str)> = vec![("uid", uid), ("userToken", &user_token)];
        query.extend_from_slice(extra);
        let resp = self
            .client
            .get(self.url(path))
            .query(&query)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn send_json(&self, method: reqwest::Method, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .request(method, self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn create_project(&self, uid: &str, id: &str, invited: &[&str]) -> (u16, Value) {
        let users: Vec<Value> = invited.iter().map(|uid| json!({ "uid": uid })).collect();
        self.send_json(
            reqwest::Method::PUT,
            "/project",
            json!({
                "name": format!("Project {}", id),
                "id": id,
                "uid": uid,
                "userToken": token(uid),
                "users": users,
                "currentUserProjectIds": [],
            }),
        )
        .await
    }

    async fn register(&self, uid: &str) {
        let (status, _) = self
            .send_json(
                reqwest::Method::PUT,
                "/user",
                json!({
                    "uid": uid,
                    "userToken": token(uid),
                    "displayName": uid.to_uppercase(),
                    "email": format!("{}@example.com", uid),
                    "photoUrl": format!("https://img.example.com/{}.png", uid),
                }),
            )
            .await;
        assert_eq!(status, 200);
    }

    fn workspace(&self) -> Workspace {
        Workspace::new(ApiClient::new(&self.base_url)).with_poll_interval(Duration::from_millis(50))
    }
}

fn profile(uid: &str) -> SignInProfile {
    SignInProfile {
        uid: uid.to_string(),
        token: token(uid),
        display_name: Some(uid.to_uppercase()),
        email: Some(format!("{}@example.com", uid)),
        photo_url: Some(format!("https://img.example.com/{}.png", uid)),
    }
}

#[tokio::test]
async fn test_health_and_liveness() {
    let fixture = TestFixture::new().await;

    let resp = fixture.client.get(fixture.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");

    let resp = fixture.client.get(fixture.url("/")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "API is working");
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/no/such/route"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_create_project_scenario() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .send_json(
            reqwest::Method::PUT,
            "/project",
            json!({
                "name": "Demo",
                "id": "p1",
                "uid": "u1",
                "userToken": token("u1"),
                "users": [{ "uid": "u2" }],
                "currentUserProjectIds": [],
            }),
        )
        .await;

    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Created new project – Demo – successfully");
    assert_eq!(
        body["data"]["project"]["userRoles"],
        json!({ "u1": "owner", "u2": "editor" })
    );
    assert!(body["revisionId"].as_i64().unwrap() > 0);

    let (_, ids) = fixture.get_as("u1", "/projectIds", &[]).await;
    assert_eq!(ids["data"]["projectIds"], json!(["p1"]));

    let (_, user) = fixture.get_as("u1", "/user/u1", &[]).await;
    assert_eq!(user["data"]["user"]["projectIds"], json!(["p1"]));

    // Invited users can open the project as editors
    let (status, content) = fixture.get_as("u2", "/project/p1/content", &[]).await;
    assert_eq!(status, 200);
    assert_eq!(content["data"]["content"]["projectId"], "p1");
}

#[tokio::test]
async fn test_create_project_missing_params_writes_nothing() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .send_json(
            reqwest::Method::PUT,
            "/project",
            json!({ "id": "p1", "uid": "u1", "userToken": token("u1") }),
        )
        .await;

    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
    assert_eq!(
        body["message"],
        "The following params are missing: name, users, currentUserProjectIds"
    );

    let (_, ids) = fixture.get_as("u1", "/projectIds", &[]).await;
    assert_eq!(ids["data"]["projectIds"], json!([]));
    let (_, projects) = fixture.get_as("u1", "/projects", &[]).await;
    assert_eq!(projects["data"]["projects"], json!([]));
}

#[tokio::test]
async fn test_create_project_rejects_foreign_token_and_duplicates() {
    let fixture = TestFixture::new().await;

    // u2's token cannot create on behalf of u1
    let (status, body) = fixture
        .send_json(
            reqwest::Method::PUT,
            "/project",
            json!({
                "name": "Demo",
                "id": "p1",
                "uid": "u1",
                "userToken": token("u2"),
                "users": [],
                "currentUserProjectIds": [],
            }),
        )
        .await;
    assert_eq!(status, 403);
    assert_eq!(body["message"], "Token doesn't match UID");

    let (status, _) = fixture.create_project("u1", "p1", &[]).await;
    assert_eq!(status, 200);
    let (status, body) = fixture.create_project("u2", "p1", &[]).await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (_, ids) = fixture.get_as("u1", "/projectIds", &[]).await;
    assert_eq!(ids["data"]["projectIds"], json!(["p1"]));
}

#[tokio::test]
async fn test_update_metadata_requires_matching_owner() {
    let fixture = TestFixture::new().await;
    fixture.create_project("u1", "p1", &["u2"]).await;

    // Token for u2 while claiming to be u1
    let (status, body) = fixture
        .send_json(
            reqwest::Method::PATCH,
            "/project/updateMetadata",
            json!({
                "id": "p1",
                "uid": "u1",
                "userToken": token("u2"),
                "userRoles": { "u2": "owner" },
            }),
        )
        .await;
    assert_eq!(status, 403);
    assert_eq!(body["message"], "Token doesn't match UID");

    // A genuine editor is still not an owner
    let (status, body) = fixture
        .send_json(
            reqwest::Method::PATCH,
            "/project/updateMetadata",
            json!({
                "id": "p1",
                "uid": "u2",
                "userToken": token("u2"),
                "userRoles": { "u2": "owner" },
            }),
        )
        .await;
    assert_eq!(status, 403);
    assert_eq!(body["message"], "Only owners can perform this action");

    let (_, projects) = fixture.get_as("u1", "/projects", &[]).await;
    assert_eq!(
        projects["data"]["projects"][0]["userRoles"],
        json!({ "u1": "owner", "u2": "editor" })
    );
    assert_eq!(projects["data"]["projects"][0]["version"], 1);
}

#[tokio::test]
async fn test_update_metadata_merges_fields() {
    let fixture = TestFixture::new().await;
    fixture.create_project("u1", "p1", &["u2"]).await;

    let (status, body) = fixture
        .send_json(
            reqwest::Method::PATCH,
            "/project/updateMetadata",
            json!({
                "id": "p1",
                "uid": "u1",
                "userToken": token("u1"),
                "name": "Renamed",
            }),
        )
        .await;
    assert_eq!(status, 200, "{}", body);

    let metadata = &body["data"]["metadata"];
    assert_eq!(metadata["name"], "Renamed");
    assert_eq!(metadata["relativeBasePath"], "/");
    assert_eq!(metadata["userRoles"], json!({ "u1": "owner", "u2": "editor" }));
    assert_eq!(metadata["version"], 2);
    // Credentials are never persisted into the record
    assert!(metadata.get("userToken").is_none());

    // Stale expected version is rejected
    let (status, body) = fixture
        .send_json(
            reqwest::Method::PATCH,
            "/project/updateMetadata",
            json!({
                "id": "p1",
                "uid": "u1",
                "userToken": token("u1"),
                "name": "Again",
                "expectedVersion": 1,
            }),
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "VERSION_MISMATCH");
    assert_eq!(body["error"]["details"]["currentVersion"], 2);
}

#[tokio::test]
async fn test_update_metadata_keeps_an_owner() {
    let fixture = TestFixture::new().await;
    fixture.create_project("u1", "p1", &["u2"]).await;

    let (status, body) = fixture
        .send_json(
            reqwest::Method::PATCH,
            "/project/updateMetadata",
            json!({
                "id": "p1",
                "uid": "u1",
                "userToken": token("u1"),
                "userRoles": { "u1": "editor", "u2": "editor" },
            }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_list_projects_filter_and_membership() {
    let fixture = TestFixture::new().await;
    fixture.create_project("u1", "p1", &[]).await;
    fixture.create_project("u1", "p2", &[]).await;
    fixture.create_project("u2", "p3", &[]).await;

    let (status, body) = fixture
        .get_as("u1", "/projects", &[("projectIds", "p1,p3")])
        .await;
    assert_eq!(status, 200);
    let ids: Vec<&str> = body["data"]["projects"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["p1"]);

    let (_, body) = fixture.get_as("u1", "/projects", &[]).await;
    assert_eq!(body["data"]["projects"].as_array().unwrap().len(), 2);

    // Identity is verified even for listing
    let resp = fixture
        .client
        .get(fixture.url("/projects"))
        .query(&[("uid", "u1"), ("userToken", "not-a-jwt")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Bearer header works in place of the query token
    let resp = fixture
        .client
        .get(fixture.url("/projects"))
        .query(&[("uid", "u2")])
        .bearer_auth(token("u2"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["projects"][0]["id"], "p3");
}

#[tokio::test]
async fn test_locales_are_deduplicated() {
    let fixture = TestFixture::new().await;
    fixture.create_project("u1", "p1", &["u2"]).await;

    let en = json!({ "code": "en", "name": "English" });
    let (status, body) = fixture
        .send_json(
            reqwest::Method::PATCH,
            "/project/updateMetadata",
            json!({
                "id": "p1",
                "uid": "u1",
                "userToken": token("u1"),
                "locales": [en, { "code": "de", "name": "German" }, en],
            }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["metadata"]["locales"].as_array().unwrap().len(), 2);

    // Adding an existing locale through the editor endpoint does not repeat it
    let (status, body) = fixture
        .send_json(
            reqwest::Method::POST,
            "/project/p1/locales",
            json!({
                "uid": "u2",
                "userToken": token("u2"),
                "code": "en",
                "name": "English",
                "content": { "title": "Hello" },
            }),
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(
        body["data"]["metadata"]["locales"],
        json!([{ "code": "en", "name": "English" }, { "code": "de", "name": "German" }])
    );
    assert_eq!(
        body["data"]["content"]["locales"]["en"]["content"]["title"],
        "Hello"
    );
}

#[tokio::test]
async fn test_content_update_merges_locales() {
    let fixture = TestFixture::new().await;
    fixture.create_project("u1", "p1", &["u2"]).await;

    for (code, title) in [("en", "Hello"), ("de", "Hallo")] {
        let mut locales = serde_json::Map::new();
        locales.insert(
            code.to_string(),
            json!({ "name": code, "content": { "title": title } }),
        );
        let (status, _) = fixture
            .send_json(
                reqwest::Method::PATCH,
                "/project/p1/content",
                json!({
                    "uid": "u2",
                    "userToken": token("u2"),
                    "locales": locales,
                }),
            )
            .await;
        assert_eq!(status, 200);
    }

    let (_, body) = fixture.get_as("u1", "/project/p1/content", &[]).await;
    let locales = &body["data"]["content"]["locales"];
    assert_eq!(locales["en"]["content"]["title"], "Hello");
    assert_eq!(locales["de"]["content"]["title"], "Hallo");

    let (_, revision) = fixture.get_as("u1", "/project/p1/revision", &[]).await;
    assert_eq!(revision["data"]["version"], body["data"]["content"]["version"]);

    // Strangers cannot read content
    let (status, _) = fixture.get_as("u3", "/project/p1/content", &[]).await;
    assert_eq!(status, 403);
    let (status, _) = fixture.get_as("u1", "/project/missing/content", &[]).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_schema_and_assets() {
    let fixture = TestFixture::new().await;
    fixture.create_project("u1", "p1", &[]).await;
    let user_token = token("u1");
    let creds = [("uid", "u1"), ("userToken", user_token.as_str())];

    let schema = json!({ "type": "object", "properties": { "title": { "type": "string" } } });
    let resp = fixture
        .client
        .put(fixture.url("/project/p1/schema"))
        .query(&creds)
        .body(schema.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let schema_url = body["data"]["schemaUrl"].as_str().unwrap().to_string();
    assert_eq!(schema_url, fixture.url("/files/p1/schema.json"));

    let fetched: Value = fixture
        .client
        .get(&schema_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched, schema);

    let (_, content) = fixture.get_as("u1", "/project/p1/content", &[]).await;
    assert_eq!(content["data"]["content"]["schemaUrl"], schema_url.as_str());

    // A schema must be a JSON object
    let resp = fixture
        .client
        .put(fixture.url("/project/p1/schema"))
        .query(&creds)
        .body("[1, 2]")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = fixture
        .client
        .put(fixture.url("/project/p1/assets/logo.png"))
        .query(&creds)
        .body(vec![0x89, b'P', b'N', b'G'])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["asset"]["type"], "image/png");
    assert_eq!(body["data"]["asset"]["size"], 4);

    let resp = fixture
        .client
        .put(fixture.url("/project/p1/assets/.hidden"))
        .query(&creds)
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let (status, body) = fixture.get_as("u1", "/project/p1/assets", &[]).await;
    assert_eq!(status, 200);
    let assets = body["data"]["assets"].as_array().unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0]["name"], "logo.png");
    assert_eq!(assets[0]["remoteUrl"], fixture.url("/files/p1/assets/logo.png"));
}

#[tokio::test]
async fn test_oversized_uploads_are_rejected() {
    let fixture = TestFixture::with_upload_limit(1024).await;
    let (status, _) = fixture.create_project("u1", "p1", &[]).await;
    assert_eq!(status, 200);
    let user_token = token("u1");
    let creds = [("uid", "u1"), ("userToken", user_token.as_str())];

    let resp = fixture
        .client
        .put(fixture.url("/project/p1/assets/big.bin"))
        .query(&creds)
        .body(vec![0u8; 4096])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);
    assert!(!fixture.storage_path.join("p1/assets/big.bin").exists());

    let schema = json!({ "type": "object", "description": "x".repeat(4096) });
    let resp = fixture
        .client
        .put(fixture.url("/project/p1/schema"))
        .query(&creds)
        .body(schema.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);
    assert!(!fixture.storage_path.join("p1/schema.json").exists());

    let (_, content) = fixture.get_as("u1", "/project/p1/content", &[]).await;
    assert!(content["data"]["content"]["schemaUrl"].is_null());

    // Uploads within the limit still go through
    let resp = fixture
        .client
        .put(fixture.url("/project/p1/assets/small.bin"))
        .query(&creds)
        .body(vec![0u8; 512])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let (_, body) = fixture.get_as("u1", "/project/p1/assets", &[]).await;
    let names: Vec<&str> = body["data"]["assets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["small.bin"]);
}

#[tokio::test]
async fn test_project_ids_are_url_safe() {
    let fixture = TestFixture::new().await;

    for bad in ["a,b", "what?x", "a b", "50%", "x&y"] {
        let (status, body) = fixture.create_project("u1", bad, &[]).await;
        assert_eq!(status, 400, "id {:?} was accepted", bad);
        assert_eq!(body["success"], false);
    }
    let (_, body) = fixture.get_as("u1", "/projectIds", &[]).await;
    assert_eq!(body["data"]["projectIds"], json!([]));

    fixture.create_project("u1", "p1", &[]).await;
    fixture.create_project("u1", "p_2", &[]).await;
    fixture.create_project("u1", "p-3", &[]).await;

    // The client sends one projectIds[] pair per id
    let mut api = ApiClient::new(&fixture.base_url);
    api.set_session(Some(Session {
        uid: "u1".into(),
        token: token("u1"),
    }));
    let filter = vec!["p1".to_string(), "p-3".to_string()];
    let mut ids: Vec<String> = api
        .list_projects(Some(filter.as_slice()))
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["p-3", "p1"]);

    // A blank filter narrows nothing
    let (status, body) = fixture
        .get_as("u1", "/projects", &[("projectIds", "")])
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["projects"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_user_registration_and_updates() {
    let fixture = TestFixture::new().await;
    fixture.register("u1").await;
    fixture.register("u2").await;

    let (status, body) = fixture
        .send_json(
            reqwest::Method::PUT,
            "/user",
            json!({ "uid": "u3", "userToken": token("u3"), "displayName": "U3" }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "The following params are missing: email, photoUrl");

    // Self-edit is allowed
    let (status, body) = fixture
        .send_json(
            reqwest::Method::PATCH,
            "/user/u1",
            json!({ "uid": "u1", "userToken": token("u1"), "displayName": "First" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["user"]["displayName"], "First");
    assert_eq!(body["data"]["user"]["email"], "u1@example.com");

    // Editing others or granting roles takes an admin
    let (status, _) = fixture
        .send_json(
            reqwest::Method::PATCH,
            "/user/u1",
            json!({ "uid": "u2", "userToken": token("u2"), "displayName": "Hijacked" }),
        )
        .await;
    assert_eq!(status, 403);
    let (status, _) = fixture
        .send_json(
            reqwest::Method::PATCH,
            "/user/u2",
            json!({ "uid": "u2", "userToken": token("u2"), "role": "admin" }),
        )
        .await;
    assert_eq!(status, 403);

    let (_, body) = fixture.get_as("u2", "/users", &[]).await;
    let names: Vec<&str> = body["data"]["users"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["displayName"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["First", "U2"]);
}

#[tokio::test]
async fn test_workspace_flow() {
    let fixture = TestFixture::new().await;
    fixture.register("u2").await;

    let mut workspace = fixture.workspace();
    let me = workspace.sign_in(profile("u1"), true).await.unwrap();
    assert_eq!(me.display_name, "U1");

    workspace.fetch_all_users().await.unwrap();
    let invited: Vec<InvitedUser> = workspace
        .user_state()
        .users
        .iter()
        .filter(|u| u.uid == "u2")
        .map(InvitedUser::from)
        .collect();

    let project = workspace
        .create_new_project("Demo", "p1", &invited)
        .await
        .unwrap();
    assert_eq!(project.id, "p1");
    assert_eq!(workspace.project_state().project_ids, vec!["p1"]);
    let summary = &workspace.project_state().user_projects[0];
    assert_eq!(summary.users.len(), 2);
    assert_eq!(
        workspace.user_state().current_user.as_ref().unwrap().project_ids,
        Some(vec!["p1".to_string()])
    );

    workspace.set_current_project("p1").await.unwrap();
    assert!(workspace.subscription().unwrap().is_active());

    workspace
        .create_new_locale("en", "English", Some(json!({ "title": "Hello" })))
        .await
        .unwrap();
    assert_eq!(
        workspace.get_current_project_content("en").unwrap().content,
        Some(json!({ "title": "Hello" }))
    );

    let schema_url = workspace
        .upload_schema(br#"{"type":"object"}"#.to_vec())
        .await
        .unwrap();
    assert!(schema_url.ends_with("/files/p1/schema.json"));
    assert_eq!(
        workspace.project_state().current_project_schema,
        Some(json!({ "type": "object" }))
    );

    let asset = workspace
        .upload_asset("notes.txt", b"hello".to_vec())
        .await
        .unwrap();
    assert_eq!(asset.content_type, "text/plain");
    // The upload re-lists the project's assets
    let stored: Vec<&str> = workspace
        .project_state()
        .current_project
        .as_ref()
        .unwrap()
        .assets
        .iter()
        .map(|a| a.name.as_str())
        .collect();
    assert_eq!(stored, vec!["notes.txt"]);

    // Changes made elsewhere show up on the next listing or re-sync
    let mut other = ApiClient::new(&fixture.base_url);
    other.set_session(Some(Session {
        uid: "u1".into(),
        token: token("u1"),
    }));
    other
        .upload_asset("p1", "logo.png", vec![0x89, b'P', b'N', b'G'])
        .await
        .unwrap();
    other
        .update_project_metadata(
            "p1",
            MetadataPatch {
                name: Some("Edited elsewhere".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(workspace.get_project_assets().await.unwrap().len(), 2);
    assert_eq!(
        workspace.project_state().current_project.as_ref().unwrap().assets[0].name,
        "logo.png"
    );

    let mut locales = BTreeMap::new();
    locales.insert(
        "en".to_string(),
        ProjectLocale {
            name: "English".into(),
            content: Some(json!({ "title": "Updated" })),
        },
    );
    let current = workspace
        .update_project(ContentPatch {
            schema_url: None,
            locales: Some(locales),
        })
        .await
        .unwrap();
    assert_eq!(
        current.content.locales["en"].content,
        Some(json!({ "title": "Updated" }))
    );
    assert_eq!(current.metadata.name, "Edited elsewhere");
    assert_eq!(
        workspace.project_state().user_projects[0].metadata.name,
        "Edited elsewhere"
    );

    let metadata = workspace
        .update_projects_metadata(
            "p1",
            MetadataPatch {
                name: Some("Renamed".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(metadata.name, "Renamed");
    assert_eq!(
        workspace.project_state().user_projects[0].metadata.name,
        "Renamed"
    );

    workspace.sign_out();
    assert!(workspace.subscription().is_none());
    assert!(workspace.user_state().current_user.is_none());
    assert!(workspace.project_state().user_projects.is_empty());
    assert!(matches!(
        workspace.fetch_all_users().await,
        Err(ClientError::NotSignedIn)
    ));
}

#[tokio::test]
async fn test_workspace_receives_live_updates() {
    let fixture = TestFixture::new().await;

    let mut owner = fixture.workspace();
    owner.sign_in(profile("u1"), true).await.unwrap();
    owner.create_new_project("Demo", "p1", &[]).await.unwrap();
    owner.set_current_project("p1").await.unwrap();

    // Someone else edits the content out of band
    let mut other = ApiClient::new(&fixture.base_url);
    other.set_session(Some(Session {
        uid: "u1".into(),
        token: token("u1"),
    }));
    let mut locales = BTreeMap::new();
    locales.insert(
        "fr".to_string(),
        ProjectLocale {
            name: "French".into(),
            content: Some(json!({ "title": "Bonjour" })),
        },
    );
    other
        .update_project_content("p1", None, Some(locales))
        .await
        .unwrap();

    let current = tokio::time::timeout(Duration::from_secs(5), owner.apply_project_update())
        .await
        .expect("no live update arrived")
        .unwrap();
    assert_eq!(
        current.content.locales["fr"].content,
        Some(json!({ "title": "Bonjour" }))
    );

    owner.reset_current_project();
    assert!(owner.project_state().current_project.is_none());
    assert!(matches!(
        owner.apply_project_update().await,
        Err(ClientError::NoCurrentProject)
    ));
}

#[tokio::test]
async fn test_dropping_subscription_stops_polling() {
    let fixture = TestFixture::new().await;
    fixture.create_project("u1", "p1", &[]).await;

    let mut api = ApiClient::new(&fixture.base_url);
    api.set_session(Some(Session {
        uid: "u1".into(),
        token: token("u1"),
    }));

    let subscription = ProjectSubscription::spawn(api, "p1", 1, Duration::from_millis(20));
    let handle = subscription.abort_handle();
    assert!(subscription.is_active());
    assert_eq!(subscription.project_id(), "p1");

    drop(subscription);

    for _ in 0..50 {
        if handle.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(handle.is_finished());
}

#[tokio::test]
async fn test_workspace_surfaces_forbidden() {
    let fixture = TestFixture::new().await;
    fixture.create_project("u1", "p1", &[]).await;

    let mut stranger = fixture.workspace();
    stranger.sign_in(profile("u9"), true).await.unwrap();
    let err = stranger.set_current_project("p1").await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert!(stranger.subscription().is_none());
}
