//! Shared fixtures: a mock provider and RS256 token minting.

// crates.io
use firebase_edge_auth::{AuthConfig, Endpoints, FirebaseAuth, ServiceAccountKey, TokenKind};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

pub const PROJECT: &str = "demo-project";
pub const KID: &str = "primary-kid";

const SIGNING_KEY: &str = include_str!("../fixtures/signing_key.pem");
const ROGUE_KEY: &str = include_str!("../fixtures/rogue_key.pem");
const SERVICE_ACCOUNT_KEY: &str = include_str!("../fixtures/service_account_key.pem");
const JWKS: &str = include_str!("../fixtures/jwks.json");
const X509: &str = include_str!("../fixtures/x509_keys.json");

/// Start a mock provider serving both key documents and a token endpoint.
pub async fn provider() -> MockServer {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/keys/id-token"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_string(JWKS)
				.insert_header("content-type", "application/json")
				.insert_header("cache-control", "public, max-age=3600"),
		)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/keys/session-cookie"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_string(X509)
				.insert_header("content-type", "application/json")
				.insert_header("cache-control", "public, max-age=3600"),
		)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path("/oauth2/token"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"access_token": "ya29.admin-token",
			"expires_in": 3599,
			"token_type": "Bearer"
		})))
		.mount(&server)
		.await;

	server
}

pub fn config(server: &MockServer) -> AuthConfig {
	AuthConfig::new(PROJECT)
		.with_api_key("web-api-key")
		.with_endpoints(Endpoints::with_base(server.uri()).expect("endpoints"))
		.with_require_https(false)
}

pub fn service_account() -> ServiceAccountKey {
	ServiceAccountKey::from_json(
		&json!({
			"type": "service_account",
			"project_id": PROJECT,
			"private_key_id": "sa-key-1",
			"private_key": SERVICE_ACCOUNT_KEY,
			"client_email": "firebase-adminsdk@demo-project.iam.gserviceaccount.com"
		})
		.to_string(),
	)
	.expect("service account")
}

/// Client without admin credentials.
pub fn client(server: &MockServer) -> FirebaseAuth {
	FirebaseAuth::builder(config(server)).build().expect("client")
}

/// Client with a service account for admin calls.
pub fn admin_client(server: &MockServer) -> FirebaseAuth {
	FirebaseAuth::builder(config(server))
		.service_account(service_account())
		.build()
		.expect("admin client")
}

pub fn claims(kind: TokenKind, uid: &str) -> Value {
	let now = chrono::Utc::now().timestamp();

	json!({
		"iss": kind.issuer(PROJECT),
		"aud": PROJECT,
		"sub": uid,
		"iat": now - 30,
		"exp": now + 3600,
		"auth_time": now - 60,
		"email": "ada@example.com",
		"email_verified": true,
		"firebase": {
			"sign_in_provider": "password",
			"identities": { "email": ["ada@example.com"] }
		}
	})
}

pub fn sign(claims: &Value) -> String {
	sign_with(claims, SIGNING_KEY, Some(KID))
}

pub fn sign_rogue(claims: &Value) -> String {
	sign_with(claims, ROGUE_KEY, Some(KID))
}

pub fn sign_with(claims: &Value, pem: &str, kid: Option<&str>) -> String {
	let mut header = Header::new(Algorithm::RS256);

	header.kid = kid.map(str::to_owned);

	jsonwebtoken::encode(
		&header,
		claims,
		&EncodingKey::from_rsa_pem(pem.as_bytes()).expect("encoding key"),
	)
	.expect("token")
}
