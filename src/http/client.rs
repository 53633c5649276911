//! HTTP client integration for provider REST calls and public-key retrieval.

// crates.io
use http::{
	HeaderMap, Request, Response, StatusCode,
	header::{CACHE_CONTROL, ETAG, LAST_MODIFIED},
};
use reqwest::{Client, RequestBuilder, redirect::Policy};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use url::Url;
// self
use crate::{_prelude::*, config::AuthConfig, error::ApiErrorCode};

/// HTTP exchange metadata captured for cache semantics evaluation.
#[derive(Clone, Debug)]
pub struct HttpExchange {
	/// HTTP request issued to the upstream key endpoint.
	pub request: Request<()>,
	/// Response metadata returned from the upstream.
	pub response: Response<()>,
}
impl HttpExchange {
	/// Construct a new header-only exchange instance.
	pub fn new(request: Request<()>, response: Response<()>) -> Self {
		Self { request, response }
	}

	/// Response headers helper.
	pub fn headers(&self) -> &HeaderMap {
		self.response.headers()
	}
}

/// Metadata returned from a key document fetch (200 or 304).
#[derive(Clone, Debug)]
pub struct KeyFetch {
	/// Captured HTTP exchange for diagnostics and cache evaluation.
	pub exchange: HttpExchange,
	/// Raw document when the origin returned content.
	pub body: Option<Vec<u8>>,
	/// Entity tag validator advertised by the origin.
	pub etag: Option<String>,
	/// Last-Modified timestamp advertised by the origin.
	pub last_modified: Option<DateTime<Utc>>,
}

/// Thin wrapper around [`reqwest::Client`] applying URL policy and provider error decoding.
#[derive(Clone, Debug)]
pub struct RestClient {
	client: Client,
	config: Arc<AuthConfig>,
}
impl RestClient {
	/// Wrap an existing client.
	pub fn new(client: Client, config: Arc<AuthConfig>) -> Self {
		Self { client, config }
	}

	/// Build the default client: no redirects, crate user agent, bounded connect time.
	pub fn default_client() -> Result<Client> {
		Client::builder()
			.redirect(Policy::none())
			.user_agent(format!("firebase-edge-auth/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()
			.map_err(Error::from)
	}

	/// Configuration the client enforces.
	pub fn config(&self) -> &AuthConfig {
		&self.config
	}

	/// POST a JSON body and decode a JSON response within `request_timeout`.
	pub async fn post_json<B, T>(
		&self,
		field: &'static str,
		url: Url,
		bearer: Option<&str>,
		body: &B,
	) -> Result<T>
	where
		B: Serialize + ?Sized,
		T: DeserializeOwned,
	{
		self.config.check_url(field, &url)?;

		let mut builder =
			self.client.post(url.clone()).json(body).timeout(self.config.request_timeout);

		if let Some(token) = bearer {
			builder = builder.bearer_auth(token);
		}

		send(builder, url).await
	}

	/// POST a form-encoded body and decode a JSON response.
	///
	/// `timeout` overrides `request_timeout`, e.g. with a retry attempt's budget.
	pub async fn post_form<B, T>(
		&self,
		field: &'static str,
		url: Url,
		body: &B,
		timeout: Option<Duration>,
	) -> Result<T>
	where
		B: Serialize + ?Sized,
		T: DeserializeOwned,
	{
		self.config.check_url(field, &url)?;

		let builder = self
			.client
			.post(url.clone())
			.form(body)
			.timeout(timeout.unwrap_or(self.config.request_timeout));

		send(builder, url).await
	}

	/// Execute a GET for a public-key document, honouring conditional headers on `request`.
	pub async fn fetch_keys(
		&self,
		url: &Url,
		request: &Request<()>,
		attempt_timeout: Duration,
	) -> Result<KeyFetch> {
		self.config.check_url("key_url", url)?;

		let mut builder = self.client.request(request.method().clone(), url.clone());

		for (name, value) in request.headers().iter() {
			builder = builder.header(name, value);
		}

		builder = builder.timeout(attempt_timeout);

		let start = Instant::now();
		let response = builder.send().await?;
		let elapsed = start.elapsed();
		let status = response.status();
		let mut response_builder = Response::builder().status(status);

		if let Some(existing) = response_builder.headers_mut() {
			existing.extend(
				response.headers().iter().map(|(name, value)| (name.clone(), value.clone())),
			);
		}

		let response_template = response_builder.body(()).map_err(Error::from)?;
		let etag = response_template
			.headers()
			.get(ETAG)
			.and_then(|value| value.to_str().ok())
			.map(|s| s.to_string());
		let last_modified = response_template
			.headers()
			.get(LAST_MODIFIED)
			.and_then(|value| value.to_str().ok())
			.and_then(|raw| httpdate::parse_http_date(raw).ok())
			.map(DateTime::<Utc>::from);

		if status == StatusCode::NOT_MODIFIED {
			let exchange = HttpExchange::new(request.clone(), response_template);

			return Ok(KeyFetch { exchange, body: None, etag, last_modified });
		}
		if !status.is_success() {
			let body = response.text().await.ok();

			return Err(Error::HttpStatus { status, url: url.clone(), body });
		}

		if let Some(declared) = response.content_length() {
			self.check_size(declared)?;
		}

		let bytes = response.bytes().await?;

		self.check_size(bytes.len() as u64)?;

		let exchange = HttpExchange::new(request.clone(), response_template);

		tracing::debug!(url = %url, status = %status, elapsed = ?elapsed, "key fetch complete");

		Ok(KeyFetch { exchange, body: Some(bytes.to_vec()), etag, last_modified })
	}

	fn check_size(&self, size: u64) -> Result<()> {
		let limit = self.config.max_response_bytes;

		if size > limit {
			return Err(Error::Validation {
				field: "max_response_bytes",
				reason: format!(
					"Response size {size} bytes exceeds the configured guard of {limit} bytes."
				),
			});
		}

		Ok(())
	}
}

/// Extract cache-control header as string for diagnostics.
pub fn cache_control_header(headers: &HeaderMap) -> Option<String> {
	headers.get(CACHE_CONTROL).and_then(|value| value.to_str().ok()).map(|s| s.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDocument {
	Google { error: GoogleError },
	OAuth { error: String, error_description: Option<String> },
}

#[derive(Debug, Deserialize)]
struct GoogleError {
	message: String,
}

async fn send<T>(builder: RequestBuilder, url: Url) -> Result<T>
where
	T: DeserializeOwned,
{
	let start = Instant::now();
	let response = builder.send().await?;
	let status = response.status();

	tracing::debug!(path = url.path(), status = %status, elapsed = ?start.elapsed(), "provider call complete");

	if status.is_success() {
		let bytes = response.bytes().await?;

		return serde_json::from_slice(&bytes).map_err(Error::from);
	}

	let body = response.text().await.ok();

	Err(decode_error(status, url, body))
}

fn decode_error(status: StatusCode, url: Url, body: Option<String>) -> Error {
	let document = body.as_deref().and_then(|raw| serde_json::from_str::<ErrorDocument>(raw).ok());

	match document {
		Some(ErrorDocument::Google { error }) => Error::Api {
			status,
			code: error.message.parse().unwrap_or_else(|_| ApiErrorCode::Other(error.message.clone())),
			message: error.message,
		},
		Some(ErrorDocument::OAuth { error, error_description }) => Error::Api {
			status,
			code: error.parse().unwrap_or_else(|_| ApiErrorCode::Other(error.clone())),
			message: error_description.unwrap_or(error),
		},
		None => Error::HttpStatus { status, url, body },
	}
}
