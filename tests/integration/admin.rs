//! Admin operations authorised by a service-account access token.

// std
use std::time::Duration;
// crates.io
use firebase_edge_auth::{Error, KeyValueStore, MemoryStore, Result, TokenKind};
use serde_json::json;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{body_json, header, method, path},
};
// self
use crate::common;

async fn mount_lookup(server: &MockServer, user: serde_json::Value) {
	Mock::given(method("POST"))
		.and(path("/identitytoolkit/v1/projects/demo-project/accounts:lookup"))
		.and(header("authorization", "Bearer ya29.admin-token"))
		.and(body_json(json!({ "localId": ["user-123"] })))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "identitytoolkit#GetAccountInfoResponse",
			"users": [user]
		})))
		.mount(server)
		.await;
}

#[tokio::test]
async fn creates_session_cookies_with_a_bearer_token() -> Result<()> {
	let server = common::provider().await;

	Mock::given(method("POST"))
		.and(path("/identitytoolkit/v1/projects/demo-project:createSessionCookie"))
		.and(header("authorization", "Bearer ya29.admin-token"))
		.and(body_json(json!({ "idToken": "id-token", "validDuration": 432_000 })))
		.respond_with(
			ResponseTemplate::new(200).set_body_json(json!({ "sessionCookie": "session-cookie" })),
		)
		.expect(2)
		.mount(&server)
		.await;

	let auth = common::admin_client(&server);
	let expires_in = Duration::from_secs(5 * 24 * 60 * 60);

	assert_eq!(auth.create_session_cookie("id-token", expires_in).await?, "session-cookie");
	assert_eq!(auth.create_session_cookie("id-token", expires_in).await?, "session-cookie");

	let exchanges = server
		.received_requests()
		.await
		.unwrap_or_default()
		.into_iter()
		.filter(|request| request.url.path() == "/oauth2/token")
		.count();

	assert_eq!(exchanges, 1, "the access token should be reused from the store");

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn sets_and_clears_custom_claims() -> Result<()> {
	let server = common::provider().await;

	Mock::given(method("POST"))
		.and(path("/identitytoolkit/v1/projects/demo-project/accounts:update"))
		.and(body_json(json!({ "localId": "user-123", "customAttributes": "{\"role\":\"admin\"}" })))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "localId": "user-123" })))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path("/identitytoolkit/v1/projects/demo-project/accounts:update"))
		.and(body_json(json!({ "localId": "user-123", "customAttributes": "{}" })))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "localId": "user-123" })))
		.expect(1)
		.mount(&server)
		.await;

	let auth = common::admin_client(&server);

	auth.set_custom_user_claims("user-123", Some(&json!({ "role": "admin" }))).await?;
	auth.set_custom_user_claims("user-123", None).await?;

	assert!(matches!(
		auth.set_custom_user_claims("user-123", Some(&json!({ "iss": "me" }))).await,
		Err(Error::Validation { field: "custom_claims", .. })
	));

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn looks_up_users() -> Result<()> {
	let server = common::provider().await;

	mount_lookup(
		&server,
		json!({
			"localId": "user-123",
			"email": "ada@example.com",
			"customAttributes": "{\"role\":\"admin\"}",
			"validSince": "1700000000"
		}),
	)
	.await;

	let user = common::admin_client(&server).get_user("user-123").await?;

	assert_eq!(user.email.as_deref(), Some("ada@example.com"));
	assert_eq!(
		user.custom_claims()?.and_then(|claims| claims.get("role").cloned()),
		Some(json!("admin"))
	);

	Ok(())
}

#[tokio::test]
async fn revocation_rejects_tokens_minted_before_valid_since() -> Result<()> {
	let server = common::provider().await;
	let now = chrono::Utc::now().timestamp();

	mount_lookup(
		&server,
		json!({ "localId": "user-123", "validSince": (now - 10).to_string() }),
	)
	.await;

	let auth = common::admin_client(&server);
	let mut stale = common::claims(TokenKind::IdToken, "user-123");

	stale["auth_time"] = json!(now - 3600);

	let mut fresh = common::claims(TokenKind::IdToken, "user-123");

	fresh["auth_time"] = json!(now - 5);

	assert!(matches!(
		auth.verify_id_token_and_check_revoked(&common::sign(&stale)).await,
		Err(Error::TokenRevoked { kind: TokenKind::IdToken })
	));
	assert_eq!(
		auth.verify_id_token_and_check_revoked(&common::sign(&fresh)).await?.uid(),
		"user-123"
	);

	// Plain verification does not consult the account.
	assert!(auth.verify_id_token(&common::sign(&stale)).await.is_ok());

	Ok(())
}

#[tokio::test]
async fn revocation_rejects_disabled_accounts() {
	let server = common::provider().await;

	mount_lookup(&server, json!({ "localId": "user-123", "disabled": true })).await;

	let auth = common::admin_client(&server);
	let cookie = common::sign(&common::claims(TokenKind::SessionCookie, "user-123"));

	assert!(matches!(
		auth.verify_session_cookie_and_check_revoked(&cookie).await,
		Err(Error::UserDisabled { ref uid }) if uid == "user-123"
	));
}

#[tokio::test]
async fn revoke_refresh_tokens_moves_valid_since() -> Result<()> {
	let server = common::provider().await;

	Mock::given(method("POST"))
		.and(path("/identitytoolkit/v1/projects/demo-project/accounts:update"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "localId": "user-123" })))
		.expect(1)
		.mount(&server)
		.await;

	let before = chrono::Utc::now().timestamp();

	common::admin_client(&server).revoke_refresh_tokens("user-123").await?;

	let requests = server.received_requests().await.unwrap_or_default();
	let update = requests
		.iter()
		.find(|request| request.url.path().ends_with("accounts:update"))
		.expect("update request");
	let body: serde_json::Value = serde_json::from_slice(&update.body)?;

	assert_eq!(body["localId"], "user-123");
	assert!(body["validSince"].as_i64().is_some_and(|secs| secs >= before));
	assert!(body.get("customAttributes").is_none());

	Ok(())
}

#[tokio::test]
async fn rejected_access_tokens_are_dropped_from_the_store() -> Result<()> {
	let server = common::provider().await;

	Mock::given(method("POST"))
		.and(path("/identitytoolkit/v1/projects/demo-project/accounts:lookup"))
		.respond_with(ResponseTemplate::new(401).set_body_json(json!({
			"error": { "code": 401, "message": "CREDENTIAL_MISMATCH" }
		})))
		.mount(&server)
		.await;

	let store = std::sync::Arc::new(MemoryStore::new());
	let auth = firebase_edge_auth::FirebaseAuth::builder(common::config(&server))
		.service_account(common::service_account())
		.store(store.clone())
		.build()?;
	let err = auth.get_user("user-123").await.unwrap_err();
	let cache_key = auth.access_tokens().expect("provider").cache_key().to_owned();

	assert!(matches!(err, Error::Api { status, .. } if status == http::StatusCode::UNAUTHORIZED));
	assert_eq!(store.get(&cache_key).await?, None);

	Ok(())
}

#[tokio::test]
async fn admin_operations_need_a_service_account() {
	let server = common::provider().await;

	assert!(matches!(
		common::client(&server).revoke_refresh_tokens("user-123").await,
		Err(Error::Validation { field: "service_account", .. })
	));
}
