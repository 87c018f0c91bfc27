use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;
use tower::ServiceExt;

use gravvy_api::{ApiSettings, AppStateInner, router};
use gravvy_db::Database;
use gravvy_db::models::NewClip;
use gravvy_media::MediaStore;
use gravvy_notify::{ActivityRecorder, EventBus, EventHandler, Transport};
use gravvy_types::PhoneNumber;
use gravvy_types::events::DomainEvent;

const BOUNDARY: &str = "gravvy-test-boundary";

struct TestApp {
    app: Router,
    db: Arc<Database>,
    bus: EventBus,
    _media: TempDir,
}

fn test_settings() -> ApiSettings {
    ApiSettings {
        base_url: "http://gravvy.test/api/v1".into(),
        ..ApiSettings::default()
    }
}

async fn test_app() -> TestApp {
    test_app_with(test_settings(), |db| {
        vec![Arc::new(ActivityRecorder::new(db.clone())) as Arc<dyn EventHandler>]
    })
    .await
}

/// App over a fresh database and media root, with the bus handlers built by
/// `handlers`.
async fn test_app_with(
    settings: ApiSettings,
    handlers: impl FnOnce(&Arc<Database>) -> Vec<Arc<dyn EventHandler>>,
) -> TestApp {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let media_dir = TempDir::new().unwrap();
    let media = MediaStore::new(media_dir.path().to_path_buf(), "/media")
        .await
        .unwrap();
    let bus = EventBus::new(handlers(&db));

    let state = Arc::new(AppStateInner {
        db: db.clone(),
        media,
        bus: bus.clone(),
        transport: Transport::Log,
        settings,
    });
    TestApp {
        app: router(state),
        db,
        bus,
        _media: media_dir,
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Token {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Token {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a str, &'a [u8]),
}

fn multipart_request(uri: &str, token: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, filename, content_type, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        name, filename, content_type
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header(header::AUTHORIZATION, format!("Token {}", token))
        .body(Body::from(body))
        .unwrap()
}

/// Register and activate; returns the user id.
async fn register(t: &TestApp, phone: &str, password: &str) -> i64 {
    let (status, body) = send(
        &t.app,
        json_request(
            "POST",
            "/users/",
            None,
            json!({ "phone_number": phone, "password": password }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["phone_number"], phone);

    let user_id = body["id"].as_i64().unwrap();
    let code = t
        .db
        .get_registration_profile(user_id)
        .unwrap()
        .unwrap()
        .verification_code;

    let (status, body) = send(
        &t.app,
        json_request(
            "POST",
            "/account/activate/",
            None,
            json!({ "phone_number": phone, "password": password, "verification_code": code }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body, json!({ "detail": true }));
    user_id
}

async fn log_in(t: &TestApp, phone: &str, password: &str) -> String {
    let (status, body) = send(
        &t.app,
        json_request(
            "POST",
            "/account/auth/",
            None,
            json!({ "phone_number": phone, "password": password }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["token"].as_str().unwrap().to_string()
}

/// Register, activate and log in; returns the token.
async fn sign_up(t: &TestApp, phone: &str, password: &str) -> String {
    register(t, phone, password).await;
    log_in(t, phone, password).await
}

fn empty_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Token {}", token))
        .body(Body::empty())
        .unwrap()
}

fn clip(name: &str) -> NewClip {
    NewClip {
        mp4: format!("vid/c/{name}.mp4"),
        photo: format!("img/c/{name}.jpg"),
        duration: 2.0,
    }
}

/// Multipart parts of a new video with a lead clip, inviting `phones`.
fn new_video_parts<'a>(title: &'a str, phones: &[&'a str]) -> Vec<Part<'a>> {
    let mut parts = vec![
        Part::Text("title", title),
        Part::File("lead_clip[mp4]", "clip.mp4", "video/mp4", b"mp4-bytes"),
        Part::File("lead_clip[photo]", "clip.jpg", "image/jpeg", b"jpg-bytes"),
        Part::Text("lead_clip[duration]", "3.5"),
    ];
    parts.extend(
        phones
            .iter()
            .map(|phone| Part::Text("users[][phone_number]", *phone)),
    );
    parts
}

#[tokio::test]
async fn account_lifecycle() {
    let t = test_app().await;

    let (status, body) = send(
        &t.app,
        json_request(
            "POST",
            "/users/",
            None,
            json!({ "phone_number": "not a number", "password": "" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["phone_number"][0], "Enter a valid phone number.");
    assert_eq!(body["password"][0], "This field may not be blank.");

    let (status, body) = send(
        &t.app,
        json_request(
            "POST",
            "/account/activate/",
            None,
            json!({ "phone_number": "+18005551234", "password": "pw", "verification_code": 1234 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["non_field_errors"][0],
        "Unable to login with provided credentials."
    );

    let token = sign_up(&t, "+18005551234", "hunter22").await;

    let (status, body) = send(
        &t.app,
        json_request(
            "POST",
            "/account/auth/",
            None,
            json!({ "phone_number": "+18005551234", "password": "wrong" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["non_field_errors"][0],
        "Unable to login with provided credentials."
    );

    let (status, body) = send(&t.app, get("/user/", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phone_number"], "+18005551234");
    assert_eq!(
        body["videos_url"],
        "http://gravvy.test/api/v1/users/+18005551234/videos/"
    );

    let (status, body) = send(&t.app, get("/users/+18005551234/", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("videos_url").is_none());

    let (status, body) = send(
        &t.app,
        json_request("PATCH", "/user/", Some(&token), json!({ "full_name": " Ann " })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["full_name"], "Ann");
}

#[tokio::test]
async fn bad_or_missing_credentials_are_rejected() {
    let t = test_app().await;

    let (status, body) = send(&t.app, get("/user/", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Authentication credentials were not provided.");

    let (status, body) = send(&t.app, get("/user/", Some("deadbeef"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Invalid token");

    let (status, _) = send(&t.app, get("/videos/nope/", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn video_flow() {
    let t = test_app().await;
    let mut events = t.bus.subscribe();
    let ann = sign_up(&t, "+18005551234", "hunter22").await;
    let bob = sign_up(&t, "+18005551235", "hunter33").await;

    let (status, body) = send(
        &t.app,
        multipart_request(
            "/videos/",
            &ann,
            &[
                Part::Text("title", "Beach day"),
                Part::File("lead_clip[mp4]", "clip.mp4", "video/mp4", b"mp4-bytes"),
                Part::File("lead_clip[photo]", "clip.jpg", "image/jpeg", b"jpg-bytes"),
                Part::Text("lead_clip[duration]", "3.5"),
                Part::Text("users[][phone_number]", "8005551235"),
                Part::Text("users[][phone_number]", "+18005551239"),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["clips_count"], 1);
    assert_eq!(body["duration"], 3.5);
    assert_eq!(body["membership_status"], 3);
    let hash = body["hash_key"].as_str().unwrap().to_string();

    // one invitation per invited number
    for _ in 0..2 {
        match events.recv().await.unwrap() {
            DomainEvent::MemberInvited { .. } => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    let placeholder = t
        .db
        .get_user_by_phone(&PhoneNumber::parse("+18005551239").unwrap())
        .unwrap()
        .unwrap();
    assert!(!placeholder.is_active);

    let (status, body) = send(&t.app, get(&format!("/videos/{hash}/users/"), Some(&ann))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let like = || {
        Request::builder()
            .method("POST")
            .uri(format!("/videos/{hash}/like/"))
            .header(header::AUTHORIZATION, format!("Token {}", bob))
            .body(Body::empty())
            .unwrap()
    };
    let (status, body) = send(&t.app, like()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["likes_count"], 1);
    assert_eq!(body["liked"], true);
    let (_, body) = send(&t.app, like()).await;
    assert_eq!(body["likes_count"], 1);

    let (status, body) = send(&t.app, get("/user/activities/", Some(&ann))).await;
    assert_eq!(status, StatusCode::OK);
    let verbs: Vec<&str> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["verb"].as_str().unwrap())
        .collect();
    assert_eq!(verbs, ["like", "invite", "invite"]);
    assert_eq!(body["next"], Value::Null);

    let (status, body) = send(&t.app, get("/user/recentcontacts/", Some(&ann))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"].as_array().unwrap().len(), 2);

    // only the owner may rename
    let (status, _) = send(
        &t.app,
        json_request(
            "PATCH",
            &format!("/videos/{hash}/"),
            Some(&bob),
            json!({ "title": "Mine now" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &t.app,
        multipart_request(
            &format!("/videos/{hash}/clips/"),
            &bob,
            &[
                Part::File("mp4", "b.mp4", "video/mp4", b"more-mp4"),
                Part::File("photo", "b.jpg", "image/jpeg", b"more-jpg"),
                Part::Text("duration", "2"),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["order"], 1);

    let (status, body) = send(&t.app, get(&format!("/videos/{hash}/"), Some(&ann))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clips_count"], 2);
    assert_eq!(body["duration"], 5.5);
    assert_eq!(body["new_clips_count"], 1);

    let (status, _) = send(
        &t.app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/videos/{hash}/users/+18005551235/"))
            .header(header::AUTHORIZATION, format!("Token {}", bob))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&t.app, get(&format!("/videos/{hash}/"), Some(&ann))).await;
    assert_eq!(body["clips_count"], 1);

    let (status, _) = send(
        &t.app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/videos/{hash}/"))
            .header(header::AUTHORIZATION, format!("Token {}", ann))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&t.app, get(&format!("/videos/{hash}/"), Some(&ann))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn uploads_are_validated() {
    let t = test_app().await;
    let ann = sign_up(&t, "+18005551234", "hunter22").await;

    let (status, body) = send(
        &t.app,
        multipart_request(
            "/videos/",
            &ann,
            &[
                Part::File("lead_clip[mp4]", "clip.mov", "video/quicktime", b"mov"),
                Part::Text("lead_clip[duration]", "soon"),
                Part::Text("users[][phone_number]", "12"),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["lead_clip[mp4]"][0],
        "Upload a valid mp4 file. Detected file type: video/quicktime"
    );
    assert_eq!(body["lead_clip[photo]"][0], "No file was submitted.");
    assert_eq!(body["lead_clip[duration]"][0], "A valid number is required.");
    assert_eq!(body["users"][0], "Enter a valid phone number.");
}

#[tokio::test]
async fn likes_are_stored_once_without_any_listener() {
    let t = test_app_with(test_settings(), |_| vec![]).await;
    let ann = register(&t, "+18005551234", "hunter22").await;
    let bob = sign_up(&t, "+18005551235", "hunter33").await;
    let bob_id = t
        .db
        .get_user_by_phone(&PhoneNumber::parse("+18005551235").unwrap())
        .unwrap()
        .unwrap()
        .id;

    let video = t
        .db
        .create_video(
            ann,
            "Beach",
            "",
            &clip("a"),
            &[PhoneNumber::parse("+18005551235").unwrap()],
            Utc::now(),
        )
        .unwrap()
        .video;
    let mut events = t.bus.subscribe();

    let uri = format!("/videos/{}/like/", video.hash_key);
    let (first, second) = tokio::join!(
        send(&t.app, empty_request("POST", &uri, &bob)),
        send(&t.app, empty_request("POST", &uri, &bob)),
    );
    for (status, body) in [first, second] {
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["likes_count"], 1);
        assert_eq!(body["liked"], true);
    }

    let likers = t.db.likers(video.id).unwrap();
    assert_eq!(likers.len(), 1);
    assert_eq!(likers[0].id, bob_id);
    assert_eq!(t.db.get_video(video.id).unwrap().unwrap().likes_count, 1);

    let mut liked = 0;
    loop {
        match events.try_recv() {
            Ok(DomainEvent::VideoLiked { actor_id, .. }) => {
                assert_eq!(actor_id, bob_id);
                liked += 1;
            }
            Ok(other) => panic!("unexpected event: {:?}", other),
            Err(TryRecvError::Empty) => break,
            Err(e) => panic!("event stream broke: {}", e),
        }
    }
    assert_eq!(liked, 1);
}

#[tokio::test]
async fn expired_tokens_are_refused_until_the_next_login() {
    let t = test_app().await;
    let ann = register(&t, "+18005551234", "hunter22").await;

    let stale = t
        .db
        .obtain_token(ann, Utc::now() - Duration::days(15), Duration::days(14))
        .unwrap();
    let (status, body) = send(&t.app, get("/user/", Some(&stale.key))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Token has expired");

    let fresh = log_in(&t, "+18005551234", "hunter22").await;
    assert_ne!(fresh, stale.key);
    let (status, body) = send(&t.app, get("/user/", Some(&fresh))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phone_number"], "+18005551234");

    let (status, body) = send(&t.app, get("/user/", Some(&stale.key))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Invalid token");
}

#[tokio::test]
async fn removing_a_member_recomputes_the_video() {
    let t = test_app().await;
    let ann = sign_up(&t, "+18005551234", "hunter22").await;
    let bob = sign_up(&t, "+18005551235", "hunter33").await;

    let (status, body) = send(
        &t.app,
        multipart_request("/videos/", &ann, &new_video_parts("Beach", &["+18005551235"])),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let hash = body["hash_key"].as_str().unwrap().to_string();
    let lead_id = body["clips"][0]["id"].as_i64().unwrap();

    let (status, body) = send(
        &t.app,
        multipart_request(
            &format!("/videos/{hash}/clips/"),
            &bob,
            &[
                Part::File("mp4", "b.mp4", "video/mp4", b"more-mp4"),
                Part::File("photo", "b.jpg", "image/jpeg", b"more-jpg"),
                Part::Text("duration", "2"),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let bob_clip_id = body["id"].as_i64().unwrap();

    let (status, _) = send(
        &t.app,
        empty_request("DELETE", &format!("/videos/{hash}/clips/{lead_id}/"), &ann),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // the remaining clip leads now
    let video = t.db.get_video_by_hash(&hash).unwrap().unwrap();
    let bob_clip = t.db.get_clip(video.id, bob_clip_id).unwrap().unwrap();
    assert_eq!(video.photo.as_deref(), Some(bob_clip.photo.as_str()));
    assert_eq!(video.clips_count, 1);

    let (status, _) = send(
        &t.app,
        empty_request("DELETE", &format!("/videos/{hash}/users/+18005551235/"), &ann),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&t.app, get(&format!("/videos/{hash}/"), Some(&ann))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clips_count"], 0);
    assert_eq!(body["duration"], 0.0);
    assert_eq!(body["photo_thumbnail"], "");
    assert_eq!(body["clips"].as_array().unwrap().len(), 0);
    assert!(t.db.get_video_by_hash(&hash).unwrap().unwrap().photo.is_none());
}

#[tokio::test]
async fn recent_contacts_are_capped_and_skip_the_caller() {
    let t = test_app_with(
        ApiSettings {
            max_recent_contacts: 2,
            ..test_settings()
        },
        |db| vec![Arc::new(ActivityRecorder::new(db.clone())) as Arc<dyn EventHandler>],
    )
    .await;
    let ann = sign_up(&t, "+18005551234", "hunter22").await;

    let (status, body) = send(
        &t.app,
        multipart_request(
            "/videos/",
            &ann,
            &new_video_parts(
                "Beach",
                &["+18005551234", "+18005551237", "+18005551238", "+18005551239"],
            ),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, body) = send(&t.app, get("/user/recentcontacts/", Some(&ann))).await;
    assert_eq!(status, StatusCode::OK);
    let phones: Vec<&str> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["phone_number"].as_str().unwrap())
        .collect();
    assert_eq!(phones.len(), 2);
    assert!(!phones.contains(&"+18005551234"));
}

#[tokio::test]
async fn ranked_videos_are_paged() {
    let t = test_app().await;
    let ann = register(&t, "+18005551234", "hunter22").await;

    let now = Utc::now();
    let mut hashes = Vec::new();
    for i in 0..26 {
        let video = t
            .db
            .create_video(ann, &format!("Video {i}"), "", &clip(&format!("c{i}")), &[], now)
            .unwrap()
            .video;
        for _ in 0..(i % 5) {
            t.db.record_play(video.id).unwrap();
        }
        hashes.push(video.hash_key);
    }

    let (status, first) = send(&t.app, get("/videos/", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["count"], 26);
    assert_eq!(first["next"], "http://gravvy.test/api/v1/videos/?page=2");
    assert_eq!(first["previous"], Value::Null);
    let first = first["results"].as_array().unwrap().clone();
    assert_eq!(first.len(), 25);

    let scores: Vec<f64> = first.iter().map(|v| v["score"].as_f64().unwrap()).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]), "{scores:?}");
    assert_eq!(first[0]["plays_count"], 4);

    let (status, second) = send(&t.app, get("/videos/?page=2", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["next"], Value::Null);
    assert_eq!(second["previous"], "http://gravvy.test/api/v1/videos/");
    let second = second["results"].as_array().unwrap().clone();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0]["plays_count"], 0);

    let mut seen: Vec<String> = first
        .iter()
        .chain(second.iter())
        .map(|v| v["hash_key"].as_str().unwrap().to_string())
        .collect();
    seen.sort();
    hashes.sort();
    assert_eq!(seen, hashes);

    let (status, _) = send(&t.app, get("/videos/?page=3", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&t.app, get("/videos/?page=0", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
