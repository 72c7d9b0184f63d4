use std::path::PathBuf;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use rusqlite::params;
use rust_cms::core::Engine;
use rust_cms::{build_router, AppState, Config};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    app: Router,
    state: AppState,
    token: String,
    _dir: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.resolve_paths(dir.path());
        let engine = Engine::with_config(dir.path().to_path_buf(), config).unwrap();
        let state = engine.app_state().unwrap();
        let app = build_router(state.clone());

        let mut test_app = Self {
            app,
            state,
            token: String::new(),
            _dir: dir,
        };
        test_app.token = test_app.login("admin", "admin123").await;
        test_app
    }

    async fn login(&self, username: &str, password: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "username": username, "password": password })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["access_token"].as_str().unwrap().to_string()
    }

    async fn request(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let (status, bytes) = self.request(request).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn admin(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send(method, uri, Some(&self.token), body).await
    }

    fn multipart(&self, uri: &str, filename: &str, content_type: &str, data: &[u8]) -> Request<Body> {
        let boundary = "cms-test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
                 Content-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(
            format!(
                "\r\n--{boundary}\r\nContent-Disposition: form-data; name=\"alt_text\"\r\n\r\nA picture\r\n--{boundary}--\r\n"
            )
            .as_bytes(),
        );
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn create_post(&self, title: &str, extra: Value) -> Value {
        let mut body = json!({ "title": title, "content": "Some **content**", "status": "published" });
        if let (Some(target), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            target.extend(extra.clone());
        }
        let (status, post) = self.admin(Method::POST, "/api/posts", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{post}");
        post
    }
}

#[tokio::test]
async fn test_auth_guards() {
    let app = TestApp::new().await;

    let (status, _) = app.send(Method::GET, "/api/admin/dashboard", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app
        .send(Method::GET, "/api/admin/dashboard", Some("not-a-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "username": "reader", "email": "reader@example.com", "password": "secret" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["role"], "subscriber");
    assert!(body["user"].get("password_hash").is_none());

    let (status, body) = app
        .send(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({ "username": "reader", "email": "other@example.com", "password": "secret" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["field"], "username");

    let reader = app.login("reader@example.com", "secret").await;
    let (status, body) = app.send(Method::GET, "/api/auth/me", Some(&reader), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "reader");

    let (status, _) = app.send(Method::GET, "/api/admin/dashboard", Some(&reader), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app
        .send(Method::POST, "/api/posts", Some(&reader), Some(json!({ "title": "Nope" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.admin(Method::GET, "/api/admin/dashboard", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["total_users"], 2);

    let (status, body) = app.send(Method::GET, "/api/does-not-exist", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Endpoint not found");
}

#[tokio::test]
async fn test_invisible_category_hides_posts() {
    let app = TestApp::new().await;

    let (status, tech) = app
        .admin(Method::POST, "/api/categories", Some(json!({ "name": "Tech" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, archive) = app
        .admin(
            Method::POST,
            "/api/categories",
            Some(json!({ "name": "Archive", "is_visible": false })),
        )
        .await;

    let p1 = app.create_post("P1", json!({ "category_id": tech["id"] })).await;
    let p2 = app.create_post("P2", json!({ "category_id": archive["id"] })).await;

    let (status, list) = app.send(Method::GET, "/api/posts", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let slugs: Vec<&str> = list["posts"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["slug"].as_str())
        .collect();
    assert_eq!(slugs, vec![p1["slug"].as_str().unwrap()]);
    assert!(list["posts"][0].get("content").is_none());

    let uri = format!("/api/posts/{}", p2["slug"].as_str().unwrap());
    let (status, _) = app.send(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let uri = format!("/api/posts/{}", p1["id"]);
    let (status, post) = app.send(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(post["category"]["name"], "Tech");
    assert_eq!(post["view_count"], 1);

    let (_, tree) = app.send(Method::GET, "/api/categories", None, None).await;
    let names: Vec<&str> = tree
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert!(names.contains(&"Tech"));
    assert!(!names.contains(&"Archive"));
}

#[tokio::test]
async fn test_empty_comment_rejected() {
    let app = TestApp::new().await;
    let post = app.create_post("Discuss", json!({})).await;
    let uri = format!("/api/posts/{}/comments", post["slug"].as_str().unwrap());

    let (status, _) = app
        .send(Method::POST, &uri, None, Some(json!({ "name": "Ann", "content": "   " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let count: i64 = app
        .state
        .db
        .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM comments", [], |r| r.get(0))?))
        .await
        .unwrap();
    assert_eq!(count, 0);

    let (status, body) = app
        .send(Method::POST, &uri, None, Some(json!({ "name": "Ann", "content": "Nice post" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["comment"]["status"], "approved");

    let (_, thread) = app.send(Method::GET, &uri, None, None).await;
    assert_eq!(thread["total"], 1);
    assert_eq!(thread["comments"][0]["author_name"], "Ann");
}

#[tokio::test]
async fn test_comment_moderation_setting() {
    let app = TestApp::new().await;
    let post = app.create_post("Moderated", json!({})).await;
    let uri = format!("/api/posts/{}/comments", post["slug"].as_str().unwrap());

    let (status, settings) = app
        .admin(Method::PUT, "/api/settings", Some(json!({ "comment_moderation": "true" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["comment_moderation"], "true");

    let (status, body) = app
        .send(Method::POST, &uri, None, Some(json!({ "name": "Bob", "content": "First!" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["comment"]["status"], "pending");
    assert_eq!(body["message"], "Comment submitted and awaiting moderation");

    let (_, thread) = app.send(Method::GET, &uri, None, None).await;
    assert_eq!(thread["total"], 0);

    app.admin(Method::PUT, "/api/settings", Some(json!({ "comment_moderation": "false" })))
        .await;
    let (_, body) = app
        .send(Method::POST, &uri, None, Some(json!({ "name": "Bob", "content": "Again" })))
        .await;
    assert_eq!(body["comment"]["status"], "approved");
    let (_, thread) = app.send(Method::GET, &uri, None, None).await;
    assert_eq!(thread["total"], 1);
    assert_eq!(thread["comments"][0]["content"], "Again");
}

#[tokio::test]
async fn test_bulk_delete_is_one_level() {
    let app = TestApp::new().await;
    let post = app.create_post("Thread", json!({})).await;
    let post_id = post["id"].as_i64().unwrap();

    app.state
        .db
        .call(move |conn| {
            let now = Utc::now();
            for (id, parent) in [(5, None), (9, None), (12, Some(5)), (20, Some(12)), (30, None)] {
                conn.execute(
                    "INSERT INTO comments (id, post_id, author_name, content, status, parent_id, created_at)
                     VALUES (?1, ?2, 'guest', 'text', 'approved', ?3, ?4)",
                    params![id, post_id, parent, now],
                )?;
            }
            Ok(())
        })
        .await
        .unwrap();

    let (status, body) = app
        .admin(
            Method::POST,
            "/api/admin/comments/bulk",
            Some(json!({ "comment_ids": [5, 9], "action": "delete" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["affected"], 3);

    let remaining: Vec<(i64, Option<i64>)> = app
        .state
        .db
        .call(|conn| {
            let mut stmt = conn.prepare("SELECT id, parent_id FROM comments ORDER BY id")?;
            let rows = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
        .unwrap();
    assert_eq!(remaining, vec![(20, Some(12)), (30, None)]);

    let (status, _) = app
        .admin(
            Method::POST,
            "/api/admin/comments/bulk",
            Some(json!({ "comment_ids": [30], "action": "archive" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.admin(Method::GET, "/api/admin/comments?status=approved", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["stats"]["approved"], 2);
}

#[tokio::test]
async fn test_concurrent_identical_titles() {
    let app = TestApp::new().await;
    let body = || Some(json!({ "title": "Foo", "status": "published" }));

    let (first, second) = tokio::join!(
        app.admin(Method::POST, "/api/posts", body()),
        app.admin(Method::POST, "/api/posts", body()),
    );
    assert_eq!(first.0, StatusCode::CREATED);
    assert_eq!(second.0, StatusCode::CREATED);

    let mut slugs = vec![
        first.1["slug"].as_str().unwrap().to_string(),
        second.1["slug"].as_str().unwrap().to_string(),
    ];
    slugs.sort();
    assert_eq!(slugs, vec!["foo".to_string(), "foo-1".to_string()]);
}

#[tokio::test]
async fn test_revisions_follow_updates() {
    let app = TestApp::new().await;
    let post = app.create_post("Draft", json!({ "status": "draft", "tags": ["a", "b"] })).await;
    let id = post["id"].as_i64().unwrap();
    assert!(post["published_at"].is_null());

    for (i, status) in ["draft", "published", "published"].iter().enumerate() {
        let (code, updated) = app
            .admin(
                Method::PUT,
                &format!("/api/posts/{id}"),
                Some(json!({ "content": format!("version {i}"), "status": status, "tags": ["b"] })),
            )
            .await;
        assert_eq!(code, StatusCode::OK, "{updated}");
    }

    let (status, revisions) = app
        .admin(Method::GET, &format!("/api/posts/{id}/revisions"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let revisions = revisions.as_array().unwrap();
    assert_eq!(revisions.len(), 4);

    let (_, post) = app.admin(Method::GET, &format!("/api/posts/{id}"), None).await;
    assert_eq!(post["content"], "version 2");
    assert!(!post["published_at"].is_null());
    assert_eq!(post["tags"].as_array().unwrap().len(), 1);

    let (status, _) = app.admin(Method::DELETE, &format!("/api/posts/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.admin(Method::GET, &format!("/api/posts/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_media_upload_and_delete() {
    let app = TestApp::new().await;
    let png = [0x89u8, b'P', b'N', b'G', 1, 2, 3];

    let request = app.multipart("/api/media", "../My Photo.png", "image/png", &png);
    let (status, bytes) = app.request(request).await;
    assert_eq!(status, StatusCode::CREATED);
    let media: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(media["file_type"], "image");
    assert_eq!(media["original_filename"], "My_Photo.png");
    assert_eq!(media["alt_text"], "A picture");
    let url = media["url"].as_str().unwrap().to_string();
    assert!(url.starts_with("/uploads/images/"));

    let request = Request::builder().uri(&url).body(Body::empty()).unwrap();
    let (status, served) = app.request(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(served, png);

    let request = app.multipart("/api/media", "照片.png", "image/png", &png);
    let (status, bytes) = app.request(request).await;
    assert_eq!(status, StatusCode::CREATED);
    let photo: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(photo["original_filename"], "file.png");

    let request = app.multipart("/api/media", "script.exe", "application/octet-stream", b"MZ");
    let (status, _) = app.request(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, list) = app.admin(Method::GET, "/api/media?file_type=image", None).await;
    assert_eq!(list["total"], 2);

    let on_disk: PathBuf = app
        .state
        .media
        .root()
        .join(url.trim_start_matches("/uploads/"));
    assert!(on_disk.exists());
    let (status, _) = app
        .admin(Method::DELETE, &format!("/api/media/{}", media["id"]), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!on_disk.exists());
}

#[tokio::test]
async fn test_backup_and_restore_over_http() {
    let app = TestApp::new().await;
    let post = app.create_post("Backed up", json!({ "tags": ["keep"] })).await;
    let request = app.multipart("/api/media", "doc.txt", "text/plain", b"file body");
    let (status, _) = app.request(request).await;
    assert_eq!(status, StatusCode::CREATED);

    let request = Request::builder()
        .uri("/api/admin/backup")
        .header(header::AUTHORIZATION, format!("Bearer {}", app.token))
        .body(Body::empty())
        .unwrap();
    let (status, archive) = app.request(request).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .admin(Method::DELETE, &format!("/api/posts/{}", post["id"]), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let request = app.multipart("/api/admin/restore", "backup.json.gz", "application/gzip", &archive);
    let (status, bytes) = app.request(request).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&bytes));
    let summary: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(summary["files"], 1);

    // 恢复后原来的令牌仍然有效，因为用户 ID 被保留
    let uri = format!("/api/posts/{}", post["slug"].as_str().unwrap());
    let (status, restored) = app.admin(Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(restored["id"], post["id"]);
    assert_eq!(restored["tags"][0]["name"], "keep");
}
