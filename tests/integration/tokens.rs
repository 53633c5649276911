//! ID-token and session-cookie verification through the client.

// crates.io
use firebase_edge_auth::{Error, Result, TokenKind};
use serde_json::json;
// self
use crate::common;

#[tokio::test]
async fn verifies_id_tokens_and_caches_keys() -> Result<()> {
	let server = common::provider().await;
	let auth = common::client(&server);
	let mut claims = common::claims(TokenKind::IdToken, "user-123");

	claims["admin"] = json!(true);

	let token = common::sign(&claims);
	let first = auth.verify_id_token(&token).await?;
	let second = auth.verify_id_token(&token).await?;

	assert_eq!(first.uid(), "user-123");
	assert_eq!(first.claim("admin"), Some(&json!(true)));
	assert_eq!(first, second);

	let key_fetches = server
		.received_requests()
		.await
		.unwrap_or_default()
		.into_iter()
		.filter(|request| request.url.path() == "/keys/id-token")
		.count();

	assert_eq!(key_fetches, 1, "keys should be fetched once and cached");

	let status = auth.key_status().await;

	assert_eq!(status[0].state, "ready");
	assert_eq!(status[0].kids, vec![common::KID.to_string()]);
	assert_eq!(status[1].state, "empty");

	Ok(())
}

#[tokio::test]
async fn rejects_forged_and_misdirected_tokens() {
	let server = common::provider().await;
	let auth = common::client(&server);
	let forged = common::sign_rogue(&common::claims(TokenKind::IdToken, "user-123"));
	let mut other_project = common::claims(TokenKind::IdToken, "user-123");

	other_project["aud"] = json!("someone-elses-project");
	other_project["iss"] = json!("https://securetoken.google.com/someone-elses-project");

	assert!(matches!(
		auth.verify_id_token(&forged).await,
		Err(Error::InvalidToken { kind: TokenKind::IdToken, .. })
	));
	assert!(matches!(
		auth.verify_id_token(&common::sign(&other_project)).await,
		Err(Error::InvalidToken { kind: TokenKind::IdToken, .. })
	));
}

#[tokio::test]
async fn reports_expired_tokens() {
	let server = common::provider().await;
	let auth = common::client(&server);
	let now = chrono::Utc::now().timestamp();
	let mut claims = common::claims(TokenKind::IdToken, "user-123");

	claims["iat"] = json!(now - 7200);
	claims["auth_time"] = json!(now - 7200);
	claims["exp"] = json!(now - 3600);

	assert!(matches!(
		auth.verify_id_token(&common::sign(&claims)).await,
		Err(Error::TokenExpired { kind: TokenKind::IdToken })
	));
}

#[tokio::test]
async fn session_cookies_and_id_tokens_are_not_interchangeable() -> Result<()> {
	let server = common::provider().await;
	let auth = common::client(&server);
	let cookie = common::sign(&common::claims(TokenKind::SessionCookie, "user-123"));
	let id_token = common::sign(&common::claims(TokenKind::IdToken, "user-123"));

	assert_eq!(auth.verify_session_cookie(&cookie).await?.uid(), "user-123");
	assert!(matches!(
		auth.verify_session_cookie(&id_token).await,
		Err(Error::InvalidToken { kind: TokenKind::SessionCookie, .. })
	));
	assert!(matches!(
		auth.verify_id_token(&cookie).await,
		Err(Error::InvalidToken { kind: TokenKind::IdToken, .. })
	));

	Ok(())
}

#[tokio::test]
async fn unknown_key_ids_are_rejected() {
	let server = common::provider().await;
	let auth = common::client(&server);
	let token = common::sign_with(
		&common::claims(TokenKind::IdToken, "user-123"),
		include_str!("../fixtures/signing_key.pem"),
		Some("retired-kid"),
	);
	let err = auth.verify_id_token(&token).await.unwrap_err();

	assert!(matches!(err, Error::InvalidToken { ref reason, .. } if reason.contains("retired-kid")));
}
