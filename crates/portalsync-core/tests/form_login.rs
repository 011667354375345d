use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use portalsync_core::auth::{AuthError, StaticCredentials};
use portalsync_core::store::SessionStore;
use portalsync_core::{Config, Crawler, Epoch, FetchError};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LOGIN_PAGE: &str = r#"<html><div class="custom-login-page"><form></form></div></html>"#;

fn config_for(server: &MockServer, state_dir: &Path) -> Config {
    let json = serde_json::json!({
        "crawlers": {
            "portal": {
                "username": "student",
                "state_dir": state_dir,
                "login": {
                    "login_url": format!("{}/login.php", server.uri()),
                    "extra_fields": { "cmd[doStandardAuthentication]": "Login" },
                    "success": { "kind": "present_marker", "marker": "logout.php" },
                    "expired_marker": "custom-login-page"
                }
            }
        }
    });
    serde_json::from_value(json).expect("config")
}

fn crawler(config: &Config, password: &str) -> Crawler {
    Crawler::from_config(
        config,
        "portal",
        Arc::new(StaticCredentials::new("student", password)),
        None,
    )
    .expect("crawler")
}

/// Files need the session cookie; without it the portal bounces to its login page
async fn mount_portal(server: &MockServer, expected_logins: u64) {
    Mock::given(method("GET"))
        .and(path("/files/notes.pdf"))
        .and(header("cookie", "sid=good"))
        .respond_with(ResponseTemplate::new(200).set_body_string("%PDF-notes"))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files/notes.pdf"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/login.php"))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/login.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/login.php"))
        .and(body_string_contains("username=student"))
        .and(body_string_contains("password=secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "sid=good; Path=/; HttpOnly")
                .set_body_string(r#"<a href="logout.php">Logout</a>"#),
        )
        .expect(expected_logins)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/login.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expired_session_triggers_single_login_for_concurrent_fetches() {
    let server = MockServer::start().await;
    mount_portal(&server, 1).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_for(&server, dir.path());
    let crawler = crawler(&config, "secret");
    let url = format!("{}/files/notes.pdf", server.uri());

    let pages = crawler
        .run(|ctx| async move {
            let fetches = (0..5).map(|_| {
                let ctx = ctx.clone();
                let url = url.clone();
                async move { ctx.fetch(&url).await }
            });
            join_all(fetches)
                .await
                .into_iter()
                .collect::<Result<Vec<_>, FetchError>>()
        })
        .await
        .expect("all fetches succeed");

    assert_eq!(pages.len(), 5);
    assert!(pages.iter().all(|p| p.body() == b"%PDF-notes"));
    assert_eq!(crawler.coordinator().epoch().await, Epoch::from(1));

    let saved = SessionStore::new(dir.path()).load().expect("session saved");
    assert_eq!(saved.cookies()[0].name(), "sid");
    assert_eq!(saved.cookies()[0].value(), "good");
}

#[tokio::test]
async fn saved_session_is_reused_by_the_next_run() {
    let server = MockServer::start().await;
    mount_portal(&server, 1).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_for(&server, dir.path());
    let url = format!("{}/files/notes.pdf", server.uri());

    for _ in 0..2 {
        let crawler = crawler(&config, "secret");
        let url = url.clone();
        let page = crawler
            .run(|ctx| async move { ctx.fetch(&url).await })
            .await
            .expect("fetch");
        assert_eq!(page.body(), b"%PDF-notes");
    }
    // The login mock's expect(1) is verified when the server drops
}

#[tokio::test]
async fn rejected_credentials_abort_the_run() {
    let server = MockServer::start().await;
    mount_portal(&server, 0).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_for(&server, dir.path());
    let crawler = crawler(&config, "wrong");
    let url = format!("{}/files/notes.pdf", server.uri());

    let err = crawler
        .run(|ctx| async move { ctx.fetch(&url).await })
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, FetchError::Auth(AuthError::ProbeFailed(_))));
    assert!(!SessionStore::new(dir.path()).path().exists());
}

#[tokio::test]
async fn encrypted_session_requires_a_key() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config_for(&server, dir.path());
    if let Some(c) = config.crawlers.get_mut("portal") {
        c.encrypt_session = true;
    }

    let result = Crawler::from_config(
        &config,
        "portal",
        Arc::new(StaticCredentials::new("student", "secret")),
        None,
    );
    assert!(result.is_err());
}

#[tokio::test]
async fn unusable_timeout_is_a_config_error() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config_for(&server, dir.path());
    if let Some(c) = config.crawlers.get_mut("portal") {
        c.http_timeout_secs = 1e30;
    }

    let err = Crawler::from_config(
        &config,
        "portal",
        Arc::new(StaticCredentials::new("student", "secret")),
        None,
    )
    .err()
    .expect("timeout rejected");
    assert!(format!("{:#}", err).contains("http_timeout_secs"));
}
