//! End-to-end pipeline tests against a scripted in-memory backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crm_gateway::{
    AuthEvent, AuthSession, Credentials, EndpointKey, Error, GatewayClient, GatewayConfig, Lead,
    LeadConversion, ListPage, MemorySessionStore, Method, Params, SessionStore, Transport,
    TransportError, TransportRequest, TransportResponse,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

const SESSION_KEY: &str = "crm_gateway.session";

#[derive(Clone)]
enum Reply {
    Json(u16, Value),
    Raw(u16, &'static str),
    Timeout,
}

#[derive(Default)]
struct BackendState {
    routes: Mutex<HashMap<(Method, String), Reply>>,
    sent: Mutex<Vec<TransportRequest>>,
    valid_token: Mutex<String>,
    issued: AtomicUsize,
    refresh_calls: AtomicUsize,
    refresh_fails: AtomicBool,
    reject_everything: AtomicBool,
}

/// Fake CRM backend. Answers login/refresh itself and serves scripted
/// replies for everything else, but only to the currently valid token.
#[derive(Clone, Default)]
struct Backend(Arc<BackendState>);

impl Backend {
    fn route(&self, method: Method, path: &str, reply: Reply) {
        self.0.routes.lock().insert((method, path.to_owned()), reply);
    }

    /// Server-side expiry: every token issued so far is now rejected.
    fn expire_tokens(&self) {
        *self.0.valid_token.lock() = String::new();
    }

    fn accept_token(&self, token: &str) {
        *self.0.valid_token.lock() = token.to_owned();
    }

    fn refresh_calls(&self) -> usize {
        self.0.refresh_calls.load(Ordering::SeqCst)
    }

    /// Requests that reached the resource routes (auth endpoints excluded).
    fn sent(&self) -> Vec<TransportRequest> {
        self.0.sent.lock().clone()
    }

    fn issue_token(&self) -> String {
        let n = self.0.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let token = format!("token-{n}");
        self.accept_token(&token);
        token
    }
}

fn reply(status: u16, body: &Value) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse {
        status,
        body: body.to_string(),
    })
}

impl Transport for Backend {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        match request.path.as_str() {
            "/auth/login" => {
                let token = self.issue_token();
                return reply(
                    200,
                    &json!({
                        "accessToken": token,
                        "refreshToken": "refresh-1",
                        "expiresIn": 3600,
                        "user": { "id": "u1", "userName": "admin" }
                    }),
                );
            }
            "/auth/refresh" => {
                self.0.refresh_calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                if self.0.refresh_fails.load(Ordering::SeqCst) {
                    return reply(401, &json!({ "message": "Refresh token revoked" }));
                }
                let token = self.issue_token();
                return reply(
                    200,
                    &json!({
                        "success": true,
                        "data": { "accessToken": token, "expiresIn": 3600 }
                    }),
                );
            }
            _ => {}
        }

        self.0.sent.lock().push(request.clone());

        let expected = format!("Bearer {}", self.0.valid_token.lock());
        if self.0.reject_everything.load(Ordering::SeqCst)
            || request.authorization() != Some(expected.as_str())
        {
            return reply(
                401,
                &json!({ "errors": [{ "title": "Unauthorized", "detail": "Token expired" }] }),
            );
        }

        let route = self
            .0
            .routes
            .lock()
            .get(&(request.method, request.path.clone()))
            .cloned();
        match route {
            Some(Reply::Json(status, body)) => reply(status, &body),
            Some(Reply::Raw(status, body)) => Ok(TransportResponse {
                status,
                body: body.to_owned(),
            }),
            Some(Reply::Timeout) => Err(TransportError::Timeout),
            None => reply(404, &json!({ "message": "No route" })),
        }
    }
}

fn gateway() -> (GatewayClient<Backend, MemorySessionStore>, Backend) {
    let backend = Backend::default();
    let config = GatewayConfig::new("https://crm.test/Api/V8".parse().unwrap());
    let gateway = GatewayClient::new(&config, backend.clone(), MemorySessionStore::new()).unwrap();
    (gateway, backend)
}

async fn logged_in() -> (GatewayClient<Backend, MemorySessionStore>, Backend) {
    let (gateway, backend) = gateway();
    gateway.login(&Credentials::new("admin", "secret")).await.unwrap();
    (gateway, backend)
}

fn lead_document(id: &str, last_name: &str) -> Value {
    json!({
        "data": {
            "type": "Leads",
            "id": id,
            "attributes": { "first_name": "John", "last_name": last_name, "email1": "j@x.com" }
        }
    })
}

fn lead_list() -> Value {
    json!({
        "data": [
            { "id": "l1", "first_name": "John", "last_name": "Doe", "email1": "j@x.com" },
            { "id": "l2", "first_name": "Ann", "last_name": "Lee", "lead_source": "Web" }
        ],
        "pagination": { "page": 1, "limit": 10, "total": 23, "pages": 3 }
    })
}

// ── Validation ─────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_request_never_reaches_the_network() {
    let (gateway, backend) = logged_in().await;

    let err = gateway
        .request("leads.create", Some(json!({ "firstName": "John" })), &Params::new())
        .await
        .unwrap_err();

    match err {
        Error::InvalidRequest { endpoint, diagnostics } => {
            assert_eq!(endpoint, "leads.create");
            assert!(diagnostics.iter().any(|d| d.contains("lastName")), "{diagnostics:?}");
        }
        other => panic!("expected InvalidRequest, got {other:?}"),
    }
    assert!(backend.sent().is_empty());
}

#[tokio::test]
async fn missing_path_param_and_unknown_endpoint_fail_locally() {
    let (gateway, backend) = logged_in().await;

    let err = gateway.call(EndpointKey::LeadsGet, None, &Params::new()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::MissingPathParam { endpoint: "leads.get", ref param } if param == "id"
    ));

    let err = gateway.request("leads.archive", None, &Params::new()).await.unwrap_err();
    assert!(matches!(err, Error::UnknownEndpoint(ref key) if key == "leads.archive"));

    assert!(backend.sent().is_empty());
}

#[tokio::test]
async fn response_missing_required_field_is_invalid_response() {
    let (gateway, backend) = logged_in().await;
    backend.route(
        Method::Get,
        "/module/Leads/l1",
        Reply::Json(
            200,
            json!({
                "data": { "type": "Leads", "id": "l1", "attributes": { "first_name": "John" } }
            }),
        ),
    );

    let err = gateway
        .call(EndpointKey::LeadsGet, None, &Params::new().path("id", "l1"))
        .await
        .unwrap_err();

    match err {
        Error::InvalidResponse { endpoint, diagnostics } => {
            assert_eq!(endpoint, "leads.get");
            assert!(diagnostics.iter().any(|d| d.contains("lastName")), "{diagnostics:?}");
        }
        other => panic!("expected InvalidResponse, got {other:?}"),
    }
}

// ── Wire shape ─────────────────────────────────────────────────────

#[tokio::test]
async fn create_lead_sends_wire_names_only() {
    let (gateway, backend) = logged_in().await;
    backend.route(Method::Post, "/module/Leads", Reply::Json(201, lead_document("l9", "Doe")));

    let created = gateway
        .request(
            "leads.create",
            Some(json!({
                "firstName": "John",
                "lastName": "Doe",
                "email": "j@x.com",
                "status": "New"
            })),
            &Params::new(),
        )
        .await
        .unwrap();

    assert_eq!(created["id"], "l9");
    assert_eq!(created["lastName"], "Doe");
    assert_eq!(created["email"], "j@x.com");

    let sent = backend.sent();
    assert_eq!(sent.len(), 1);
    let body = sent[0].body.as_ref().unwrap();
    assert_eq!(body["data"]["type"], "Leads");
    assert!(body["data"].get("id").is_none());

    let attributes = body["data"]["attributes"].as_object().unwrap();
    assert_eq!(attributes["email1"], "j@x.com");
    assert_eq!(attributes["first_name"], "John");
    assert_eq!(attributes["status"], "New");
    assert!(!attributes.contains_key("email"));
    assert!(
        attributes.keys().all(|k| !k.chars().any(|c| c.is_ascii_uppercase())),
        "camelCase key leaked: {attributes:?}"
    );
}

#[tokio::test]
async fn update_carries_the_path_id() {
    let (gateway, backend) = logged_in().await;
    backend.route(
        Method::Patch,
        "/module/Leads/l1",
        Reply::Json(200, lead_document("l1", "Smith")),
    );

    let updated: Lead = gateway
        .call_as(
            EndpointKey::LeadsUpdate,
            Some(json!({ "lastName": "Smith" })),
            &Params::new().path("id", "l1"),
        )
        .await
        .unwrap();

    assert_eq!(updated.last_name, "Smith");
    let sent = backend.sent();
    let body = sent[0].body.as_ref().unwrap();
    assert_eq!(body["data"]["id"], "l1");
    assert_eq!(body["data"]["attributes"], json!({ "last_name": "Smith" }));
}

#[tokio::test]
async fn list_keeps_pagination_and_renames_items() {
    let (gateway, backend) = logged_in().await;
    backend.route(Method::Get, "/leads", Reply::Json(200, lead_list()));

    let value = gateway
        .call(EndpointKey::LeadsList, None, &Params::new().query("page", 1).query("limit", 10))
        .await
        .unwrap();

    assert_eq!(value["pagination"], json!({ "page": 1, "limit": 10, "total": 23, "pages": 3 }));
    assert_eq!(value["data"][0]["firstName"], "John");
    assert_eq!(value["data"][0]["email"], "j@x.com");
    assert_eq!(value["data"][1]["leadSource"], "Web");

    let sent = backend.sent();
    assert_eq!(
        sent[0].query,
        [("page".to_owned(), "1".to_owned()), ("limit".to_owned(), "10".to_owned())]
    );

    let page: ListPage<Lead> = gateway
        .request_as("leads.list", None, &Params::new())
        .await
        .unwrap();
    assert_eq!(page.data.len(), 2);
    let pagination = page.pagination.unwrap();
    assert_eq!(
        (pagination.page, pagination.limit, pagination.total, pagination.pages),
        (1, 10, 23, 3)
    );
}

#[tokio::test]
async fn account_contacts_flatten_resource_documents() {
    let (gateway, backend) = logged_in().await;
    backend.route(
        Method::Get,
        "/module/Accounts/a1/relationships/contacts",
        Reply::Json(
            200,
            json!({
                "data": [
                    {
                        "type": "Contacts",
                        "id": "c1",
                        "attributes": { "last_name": "Doe", "phone_work": "555" }
                    }
                ],
                "meta": { "total-records": 1 }
            }),
        ),
    );

    let value = gateway
        .call(EndpointKey::AccountContacts, None, &Params::new().path("id", "a1"))
        .await
        .unwrap();

    assert_eq!(value["data"][0], json!({ "id": "c1", "lastName": "Doe", "phone": "555" }));
    assert_eq!(value["meta"]["total-records"], 1);
}

#[tokio::test]
async fn convert_lead_uses_the_simple_envelope() {
    let (gateway, backend) = logged_in().await;
    backend.route(
        Method::Post,
        "/leads/l1/convert",
        Reply::Json(
            200,
            json!({ "success": true, "data": { "contact_id": "c7", "account_id": "a3" } }),
        ),
    );

    let conversion: LeadConversion = gateway
        .request_as(
            "leads.convert",
            Some(json!({ "createAccount": true })),
            &Params::new().path("id", "l1"),
        )
        .await
        .unwrap();

    assert_eq!(conversion.contact_id.to_string(), "c7");
    assert_eq!(backend.sent()[0].body, Some(json!({ "create_account": true })));
}

#[tokio::test]
async fn delete_accepts_no_content_or_acknowledgement() {
    let (gateway, backend) = logged_in().await;
    backend.route(Method::Delete, "/module/Contacts/c1", Reply::Raw(204, ""));
    backend.route(
        Method::Delete,
        "/module/Contacts/c2",
        Reply::Json(200, json!({ "success": true, "data": { "id": "c2" } })),
    );

    let gone = gateway
        .call(EndpointKey::ContactsDelete, None, &Params::new().path("id", "c1"))
        .await
        .unwrap();
    assert!(gone.is_null());

    let acknowledged = gateway
        .call(EndpointKey::ContactsDelete, None, &Params::new().path("id", "c2"))
        .await
        .unwrap();
    assert_eq!(acknowledged, json!({ "id": "c2" }));
    assert!(backend.sent().iter().all(|r| r.body.is_none()));
}

// ── Failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn non_success_status_carries_backend_message_without_retry() {
    let (gateway, backend) = logged_in().await;
    backend.route(
        Method::Post,
        "/module/Opportunities",
        Reply::Json(
            422,
            json!({ "errors": [{ "title": "Unprocessable", "detail": "Invalid sales stage" }] }),
        ),
    );

    let err = gateway
        .call(
            EndpointKey::OpportunitiesCreate,
            Some(json!({
                "name": "Deal",
                "amount": 10,
                "salesStage": "Bogus",
                "closeDate": "2026-01-01"
            })),
            &Params::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::RequestFailed { status: 422, ref backend_message }
            if backend_message == "Invalid sales stage"
    ));
    assert_eq!(backend.sent().len(), 1);
    assert_eq!(backend.refresh_calls(), 0);
}

#[tokio::test]
async fn timeout_is_terminal_and_never_refreshes() {
    let (gateway, backend) = logged_in().await;
    backend.route(Method::Get, "/dashboard/stats", Reply::Timeout);

    let err = gateway.call(EndpointKey::DashboardStats, None, &Params::new()).await.unwrap_err();

    assert!(matches!(err, Error::Timeout));
    assert!(err.is_retryable());
    assert_eq!(backend.refresh_calls(), 0);
    assert_eq!(backend.sent().len(), 1);
}

// ── Refresh ────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_401s_share_one_refresh() {
    let (gateway, backend) = logged_in().await;
    backend.route(Method::Get, "/leads", Reply::Json(200, lead_list()));
    backend.expire_tokens();

    let params = Params::new();
    let results = futures::future::join_all(
        (0..5).map(|_| gateway.call(EndpointKey::LeadsList, None, &params)),
    )
    .await;

    assert_eq!(backend.refresh_calls(), 1);
    for result in &results {
        assert_eq!(result.as_ref().unwrap()["pagination"]["total"], 23);
    }

    let sent = backend.sent();
    assert_eq!(sent.len(), 10);
    let stale = sent.iter().filter(|r| r.authorization() == Some("Bearer token-1")).count();
    let fresh = sent.iter().filter(|r| r.authorization() == Some("Bearer token-2")).count();
    assert_eq!((stale, fresh), (5, 5));

    // Later calls use the refreshed token straight away.
    gateway.call(EndpointKey::LeadsList, None, &Params::new()).await.unwrap();
    assert_eq!(backend.sent().last().unwrap().authorization(), Some("Bearer token-2"));
    assert_eq!(backend.refresh_calls(), 1);
    assert!(
        gateway
            .auth()
            .store()
            .get(SESSION_KEY)
            .unwrap()
            .contains("token-2")
    );
}

#[tokio::test]
async fn failed_refresh_expires_every_caller() {
    let (gateway, backend) = logged_in().await;
    let mut events = gateway.subscribe();
    backend.route(Method::Get, "/leads", Reply::Json(200, lead_list()));
    backend.0.refresh_fails.store(true, Ordering::SeqCst);
    backend.expire_tokens();

    let params = Params::new();
    let results = futures::future::join_all(
        (0..5).map(|_| gateway.call(EndpointKey::LeadsList, None, &params)),
    )
    .await;

    assert_eq!(backend.refresh_calls(), 1);
    assert!(results.iter().all(|r| matches!(r, Err(e) if e.is_session_expired())));
    assert!(gateway.session().is_none());
    assert!(gateway.auth().store().get(SESSION_KEY).is_none());
    assert_eq!(events.recv().await.unwrap(), AuthEvent::SessionExpired);
    // Nobody retried.
    assert_eq!(backend.sent().len(), 5);
}

#[tokio::test]
async fn second_401_is_a_failed_request() {
    let (gateway, backend) = logged_in().await;
    backend.0.reject_everything.store(true, Ordering::SeqCst);

    let err = gateway.call(EndpointKey::DashboardStats, None, &Params::new()).await.unwrap_err();

    assert!(matches!(
        err,
        Error::RequestFailed { status: 401, ref backend_message }
            if backend_message == "Token expired"
    ));
    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(backend.sent().len(), 2);
    assert!(gateway.session().is_some());
}

#[tokio::test]
async fn anonymous_401_is_session_expired() {
    let (gateway, backend) = gateway();

    let err = gateway.call(EndpointKey::CurrentUser, None, &Params::new()).await.unwrap_err();

    assert!(err.is_session_expired());
    assert_eq!(backend.refresh_calls(), 0);
    assert!(backend.sent()[0].authorization().is_none());
}

#[tokio::test]
async fn expired_session_is_refreshed_before_sending() {
    let (gateway, backend) = gateway();
    backend.route(
        Method::Get,
        "/me",
        Reply::Json(200, json!({ "id": "u1", "user_name": "admin" })),
    );
    let stale = AuthSession::new(
        "token-0",
        "refresh-0",
        time::OffsetDateTime::now_utc() - time::Duration::minutes(5),
        Value::Null,
    );
    gateway
        .auth()
        .store()
        .save(SESSION_KEY, &serde_json::to_string(&stale).unwrap())
        .await
        .unwrap();

    assert_eq!(gateway.restore().await.unwrap().access_token, "token-0");
    let me = gateway.call(EndpointKey::CurrentUser, None, &Params::new()).await.unwrap();

    assert_eq!(me["userName"], "admin");
    assert_eq!(backend.refresh_calls(), 1);
    let sent = backend.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].authorization(), Some("Bearer token-1"));
}

// ── Session lifecycle ──────────────────────────────────────────────

#[tokio::test]
async fn restored_session_is_used_for_requests() {
    let (gateway, backend) = gateway();
    backend.accept_token("stored-token");
    backend.route(
        Method::Get,
        "/dashboard/stats",
        Reply::Json(
            200,
            json!({
                "success": true,
                "data": {
                    "total_leads": 4, "total_contacts": 3, "total_accounts": 2,
                    "open_opportunities": 1, "pipeline_value": 1500.5
                }
            }),
        ),
    );
    let stored = AuthSession::new(
        "stored-token",
        "stored-refresh",
        time::OffsetDateTime::now_utc() + time::Duration::hours(1),
        json!({ "id": "u1" }),
    );
    gateway
        .auth()
        .store()
        .save(SESSION_KEY, &serde_json::to_string(&stored).unwrap())
        .await
        .unwrap();

    gateway.restore().await.unwrap();
    let stats: crm_gateway::DashboardStats = gateway
        .call_as(EndpointKey::DashboardStats, None, &Params::new())
        .await
        .unwrap();

    assert_eq!(stats.total_leads, 4);
    assert!((stats.pipeline_value - 1500.5).abs() < f64::EPSILON);
    assert_eq!(backend.refresh_calls(), 0);
}

#[tokio::test]
async fn logout_twice_is_idempotent() {
    let (gateway, _) = logged_in().await;
    let mut events = gateway.subscribe();
    assert!(gateway.auth().store().get(SESSION_KEY).is_some());

    gateway.logout().await;
    assert!(gateway.session().is_none());
    assert!(gateway.auth().store().get(SESSION_KEY).is_none());

    gateway.logout().await;
    assert!(gateway.session().is_none());
    assert!(gateway.auth().store().get(SESSION_KEY).is_none());

    assert_eq!(events.recv().await.unwrap(), AuthEvent::LoggedOut);
    assert!(events.try_recv().is_err());
}
