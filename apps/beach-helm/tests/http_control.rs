use std::sync::Arc;

use axum::body;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use tokio::sync::mpsc;
use tower::util::ServiceExt;

use beach_helm::auth::TokenResolver;
use beach_helm::control::ControlStatus;
use beach_helm::desktop::{ScreenSize, VirtualDesktop};
use beach_helm::profile::Profile;
use beach_helm::protocol::{ControlHost, ServerEvent, SessionRef, Settings};
use beach_helm::registry::{Registration, SessionRegistry, DEFAULT_OUTBOUND_BUFFER};
use beach_helm::routes::{self, SESSION_HEADER, SESSION_SECRET_HEADER};
use beach_helm::session::Session;
use beach_helm::state::AppState;

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

const SCREEN: ScreenSize = ScreenSize::new(1280, 720, 30);

fn build_state(settings: Settings) -> AppState {
    let desktop = VirtualDesktop::new(vec![SCREEN, ScreenSize::new(1920, 1080, 30)], SCREEN)
        .expect("desktop");
    let registry = SessionRegistry::new(settings, DEFAULT_OUTBOUND_BUFFER);
    let resolver = TokenResolver::new(Some("captain".into()), Some("crew".into()));
    AppState::new(registry, Arc::new(desktop), Arc::new(resolver))
}

fn join(state: &AppState, profile: Profile) -> Registration {
    let mut registration = state.registry().register(profile, SCREEN);
    drain(&mut registration.receiver);
    registration
}

fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn send(
    state: &AppState,
    method: &str,
    uri: &str,
    credentials: &[(&str, &str)],
) -> Result<Response, Box<dyn std::error::Error + Send + Sync>> {
    let mut request = Request::builder().method(method).uri(uri);
    for (name, value) in credentials {
        request = request.header(*name, *value);
    }
    let response = routes::router(state.clone())
        .oneshot(request.body(Body::empty())?)
        .await?;
    Ok(response)
}

/// Call as `session`, presenting its id and secret.
async fn call(
    state: &AppState,
    method: &str,
    uri: &str,
    session: Option<&Session>,
) -> Result<Response, Box<dyn std::error::Error + Send + Sync>> {
    match session {
        Some(session) => {
            let credentials = [
                (SESSION_HEADER, session.id()),
                (SESSION_SECRET_HEADER, session.secret()),
            ];
            send(state, method, uri, &credentials).await
        }
        None => send(state, method, uri, &[]).await,
    }
}

async fn json_body(response: Response) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>> {
    let body = body::to_bytes(response.into_body(), 1024 * 64).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[test_timeout::tokio_timeout_test]
async fn health_reports_room_summary() -> TestResult {
    let state = build_state(Settings::default());
    let _a = join(&state, Profile::user());

    let response = call(&state, "GET", "/health", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await?;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["sessions"], 1);
    assert_eq!(json["has_host"], false);
    Ok(())
}

#[test_timeout::tokio_timeout_test]
async fn control_routes_require_connected_session() -> TestResult {
    let state = build_state(Settings::default());

    let missing = call(&state, "POST", "/api/room/control/request", None).await?;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let unknown = send(
        &state,
        "POST",
        "/api/room/control/request",
        &[(SESSION_HEADER, "ghost"), (SESSION_SECRET_HEADER, "ghost")],
    )
    .await?;
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[test_timeout::tokio_timeout_test]
async fn leaked_session_id_is_not_a_credential() -> TestResult {
    let state = build_state(Settings {
        locked_controls: true,
    });
    let admin = join(&state, Profile::admin());
    let mut viewer = state.registry().register(Profile::viewer(), SCREEN);

    // every session learns the others' ids from its own system/init
    let leaked_id = match drain(&mut viewer.receiver).first() {
        Some(ServerEvent::SystemInit(init)) => init
            .sessions
            .iter()
            .map(|info| info.id.clone())
            .find(|id| id != viewer.session.id())
            .ok_or("admin missing from system/init")?,
        other => return Err(format!("expected system/init, got {other:?}").into()),
    };
    assert_eq!(leaked_id, admin.session.id());

    let attempts: [&[(&str, &str)]; 3] = [
        &[(SESSION_HEADER, leaked_id.as_str())],
        &[
            (SESSION_HEADER, leaked_id.as_str()),
            (SESSION_SECRET_HEADER, viewer.session.secret()),
        ],
        &[
            (SESSION_HEADER, leaked_id.as_str()),
            (SESSION_SECRET_HEADER, ""),
        ],
    ];
    for credentials in attempts {
        for uri in ["/api/room/control/take", "/api/room/control/request"] {
            let response = send(&state, "POST", uri, credentials).await?;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }
    assert!(state.registry().get_host().is_none());

    let take = call(&state, "POST", "/api/room/control/take", Some(&admin.session)).await?;
    assert_eq!(take.status(), StatusCode::NO_CONTENT);
    assert!(admin.session.is_host());
    Ok(())
}

#[test_timeout::tokio_timeout_test]
async fn request_grants_then_pends() -> TestResult {
    let state = build_state(Settings::default());
    let mut a = join(&state, Profile::user());
    let mut b = join(&state, Profile::user());
    let a_id = a.session.id().to_string();
    let b_id = b.session.id().to_string();

    let granted = call(&state, "POST", "/api/room/control/request", Some(&a.session)).await?;
    assert_eq!(granted.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        drain(&mut b.receiver),
        vec![ServerEvent::ControlHost(ControlHost {
            has_host: true,
            host_id: Some(a_id.clone()),
            id: Some(a_id.clone()),
        })]
    );
    drain(&mut a.receiver);

    let pending = call(&state, "POST", "/api/room/control/request", Some(&b.session)).await?;
    assert_eq!(pending.status(), StatusCode::ACCEPTED);
    let json = json_body(pending).await?;
    assert_eq!(json["message"], "control request sent");

    assert!(a.session.is_host());
    assert_eq!(
        drain(&mut a.receiver),
        vec![ServerEvent::ControlRequest(SessionRef { id: b_id.clone() })]
    );

    let status = call(&state, "GET", "/api/room/control", Some(&b.session)).await?;
    let status: ControlStatus = serde_json::from_value(json_body(status).await?)?;
    assert_eq!(
        status,
        ControlStatus {
            has_host: true,
            host_id: Some(a_id),
        }
    );
    Ok(())
}

#[test_timeout::tokio_timeout_test]
async fn release_by_non_host_is_unprocessable() -> TestResult {
    let state = build_state(Settings::default());
    let a = join(&state, Profile::user());
    let b = join(&state, Profile::user());
    a.session.set_as_host()?;

    let response = call(
        &state,
        "POST",
        "/api/room/control/release",
        Some(&b.session),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = json_body(response).await?;
    assert_eq!(json["message"], "session is not the host");
    assert!(a.session.is_host());
    Ok(())
}

#[test_timeout::tokio_timeout_test]
async fn take_and_reset_are_admin_only() -> TestResult {
    let state = build_state(Settings::default());
    let admin = join(&state, Profile::admin());
    let host = join(&state, Profile::user());
    host.session.set_as_host()?;

    let user = join(&state, Profile::user());
    let denied = call(&state, "POST", "/api/room/control/take", Some(&user.session)).await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    let denied = call(&state, "POST", "/api/room/control/reset", Some(&host.session)).await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    assert!(host.session.is_host());

    let take = call(&state, "POST", "/api/room/control/take", Some(&admin.session)).await?;
    assert_eq!(take.status(), StatusCode::NO_CONTENT);
    assert!(admin.session.is_host());
    assert!(!host.session.is_host());

    let reset = call(&state, "POST", "/api/room/control/reset", Some(&admin.session)).await?;
    assert_eq!(reset.status(), StatusCode::NO_CONTENT);
    assert!(state.registry().get_host().is_none());
    Ok(())
}

#[test_timeout::tokio_timeout_test]
async fn give_validates_target() -> TestResult {
    let state = build_state(Settings::default());
    let host = join(&state, Profile::user());
    let viewer = join(&state, Profile::viewer());
    let other = join(&state, Profile::user());
    host.session.set_as_host()?;

    let missing = call(
        &state,
        "POST",
        "/api/room/control/give/nobody",
        Some(&host.session),
    )
    .await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let uri = format!("/api/room/control/give/{}", viewer.session.id());
    let not_allowed = call(&state, "POST", &uri, Some(&host.session)).await?;
    assert_eq!(not_allowed.status(), StatusCode::BAD_REQUEST);
    assert!(host.session.is_host());

    let uri = format!("/api/room/control/give/{}", other.session.id());
    let by_bystander = call(&state, "POST", &uri, Some(&viewer.session)).await?;
    assert_eq!(by_bystander.status(), StatusCode::FORBIDDEN);

    let given = call(&state, "POST", &uri, Some(&host.session)).await?;
    assert_eq!(given.status(), StatusCode::NO_CONTENT);
    assert!(other.session.is_host());
    assert!(!host.session.is_host());
    Ok(())
}

#[test_timeout::tokio_timeout_test]
async fn locked_controls_reject_non_admin_request() -> TestResult {
    let state = build_state(Settings {
        locked_controls: true,
    });
    let user = join(&state, Profile::user());
    let admin = join(&state, Profile::admin());

    let denied = call(&state, "POST", "/api/room/control/request", Some(&user.session)).await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    assert!(state.registry().get_host().is_none());

    let granted =
        call(&state, "POST", "/api/room/control/request", Some(&admin.session)).await?;
    assert_eq!(granted.status(), StatusCode::NO_CONTENT);
    assert!(admin.session.is_host());
    Ok(())
}

#[test_timeout::tokio_timeout_test]
async fn sessions_listing_is_admin_only() -> TestResult {
    let state = build_state(Settings::default());
    let admin = join(&state, Profile::admin());
    let user = join(&state, Profile::user());

    let denied = call(&state, "GET", "/api/room/sessions", Some(&user.session)).await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let listed = call(&state, "GET", "/api/room/sessions", Some(&admin.session)).await?;
    assert_eq!(listed.status(), StatusCode::OK);
    let json = json_body(listed).await?;
    assert_eq!(json.as_array().map(Vec::len), Some(2));
    Ok(())
}

#[test_timeout::tokio_timeout_test]
async fn metrics_absent_without_recorder() -> TestResult {
    let state = build_state(Settings::default());
    let response = call(&state, "GET", "/metrics", None).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}
