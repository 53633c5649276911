//! Password sign-in, sign-up, and token refresh.

// std
use std::time::Duration;
// crates.io
use firebase_edge_auth::{ApiErrorCode, AuthConfig, Error, FirebaseAuth, Result};
use serde_json::json;
use wiremock::{
	Mock, ResponseTemplate,
	matchers::{body_json, body_string_contains, method, path, query_param},
};
// self
use crate::common;

#[tokio::test]
async fn signs_in_with_password() -> Result<()> {
	let server = common::provider().await;

	Mock::given(method("POST"))
		.and(path("/identitytoolkit/v1/accounts:signInWithPassword"))
		.and(query_param("key", "web-api-key"))
		.and(body_json(json!({
			"email": "ada@example.com",
			"password": "correct horse",
			"returnSecureToken": true
		})))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "identitytoolkit#VerifyPasswordResponse",
			"localId": "user-123",
			"email": "ada@example.com",
			"displayName": "",
			"idToken": "id-token",
			"registered": true,
			"refreshToken": "refresh-token",
			"expiresIn": "3600"
		})))
		.expect(1)
		.mount(&server)
		.await;

	let response =
		common::client(&server).sign_in_with_password("ada@example.com", "correct horse").await?;

	assert_eq!(response.uid, "user-123");
	assert_eq!(response.id_token, "id-token");
	assert_eq!(response.expires_in, Duration::from_secs(3600));
	assert!(response.registered);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn surfaces_provider_error_codes() {
	let server = common::provider().await;

	Mock::given(method("POST"))
		.and(path("/identitytoolkit/v1/accounts:signInWithPassword"))
		.respond_with(ResponseTemplate::new(400).set_body_json(json!({
			"error": {
				"code": 400,
				"message": "INVALID_LOGIN_CREDENTIALS",
				"errors": [{ "message": "INVALID_LOGIN_CREDENTIALS", "domain": "global", "reason": "invalid" }]
			}
		})))
		.expect(1)
		.mount(&server)
		.await;

	let err = common::client(&server)
		.sign_in_with_password("ada@example.com", "wrong")
		.await
		.unwrap_err();

	assert!(matches!(err, Error::Api { code: ApiErrorCode::InvalidLoginCredentials, .. }));

	server.verify().await;
}

#[tokio::test]
async fn signs_up_and_reports_weak_passwords() -> Result<()> {
	let server = common::provider().await;

	Mock::given(method("POST"))
		.and(path("/identitytoolkit/v1/accounts:signUp"))
		.and(body_string_contains("\"password\":\"long enough\""))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "identitytoolkit#SignupNewUserResponse",
			"idToken": "id-token",
			"email": "grace@example.com",
			"refreshToken": "refresh-token",
			"expiresIn": "3600",
			"localId": "user-456"
		})))
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path("/identitytoolkit/v1/accounts:signUp"))
		.respond_with(ResponseTemplate::new(400).set_body_json(json!({
			"error": {
				"code": 400,
				"message": "WEAK_PASSWORD : Password should be at least 6 characters"
			}
		})))
		.mount(&server)
		.await;

	let auth = common::client(&server);
	let created = auth.sign_up("grace@example.com", "long enough").await?;

	assert_eq!(created.uid, "user-456");
	assert!(matches!(
		auth.sign_up("grace@example.com", "abc").await,
		Err(Error::Api { code: ApiErrorCode::WeakPassword, .. })
	));

	Ok(())
}

#[tokio::test]
async fn refreshes_id_tokens_with_a_form_body() -> Result<()> {
	let server = common::provider().await;

	Mock::given(method("POST"))
		.and(path("/securetoken/v1/token"))
		.and(query_param("key", "web-api-key"))
		.and(body_string_contains("grant_type=refresh_token"))
		.and(body_string_contains("refresh_token=refresh-token"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"expires_in": "3600",
			"token_type": "Bearer",
			"refresh_token": "rotated-refresh-token",
			"id_token": "new-id-token",
			"user_id": "user-123",
			"project_id": "123456789"
		})))
		.expect(1)
		.mount(&server)
		.await;

	let refreshed = common::client(&server).refresh_id_token("refresh-token").await?;

	assert_eq!(refreshed.id_token, "new-id-token");
	assert_eq!(refreshed.refresh_token, "rotated-refresh-token");
	assert_eq!(refreshed.user_id, "user-123");

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn public_operations_require_an_api_key() -> Result<()> {
	let server = common::provider().await;
	let mut config: AuthConfig = common::config(&server);

	config.api_key = None;

	let auth = FirebaseAuth::builder(config).build()?;

	assert!(matches!(
		auth.sign_in_with_password("ada@example.com", "pw").await,
		Err(Error::Validation { field: "api_key", .. })
	));

	Ok(())
}
