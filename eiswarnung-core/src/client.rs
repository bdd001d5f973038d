use std::{fmt, time::Duration};

use reqwest::{
    Client, Url,
    header::{ACCEPT, CONTENT_TYPE, USER_AGENT},
};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::{
    config::Config,
    error::EiswarnungError,
    models::{Envelope, Forecast, Ratelimit},
};

pub const DEFAULT_BASE_URL: &str = "https://api.eiswarnung.de/";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const CLIENT_USER_AGENT: &str = concat!("RustEiswarnung/", env!("CARGO_PKG_VERSION"));

/// Client for the Eiswarnung API, bound to one API key and location.
///
/// The HTTP session is either supplied by the caller via [`Eiswarnung::with_session`]
/// (and never closed here) or created lazily on the first request and released by
/// [`Eiswarnung::close`] or when the client is dropped.
pub struct Eiswarnung {
    api_key: String,
    latitude: f64,
    longitude: f64,
    request_timeout: Duration,
    base_url: String,
    session: Option<Client>,
    close_session: bool,
    ratelimit: Option<Ratelimit>,
}

impl Eiswarnung {
    pub fn new(api_key: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            api_key: api_key.into(),
            latitude,
            longitude,
            request_timeout: DEFAULT_TIMEOUT,
            base_url: DEFAULT_BASE_URL.to_string(),
            session: None,
            close_session: false,
            ratelimit: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Use a caller-owned HTTP client. It stays open after [`Eiswarnung::close`].
    pub fn with_session(mut self, session: Client) -> Self {
        self.close();
        self.session = Some(session);
        self.close_session = false;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Rate limit reported by the most recent response with code 200.
    ///
    /// Updated as a side effect of [`Eiswarnung::forecast`] and [`Eiswarnung::request`];
    /// error responses leave the previous value in place.
    pub fn ratelimit(&self) -> Option<&Ratelimit> {
        self.ratelimit.as_ref()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// `true` when the current session was created by this client.
    pub fn owns_session(&self) -> bool {
        self.session.is_some() && self.close_session
    }

    /// Fetch the ice warning forecast for the configured location.
    #[instrument(skip(self), fields(lat = self.latitude, lng = self.longitude))]
    pub async fn forecast(&mut self) -> Result<Forecast, EiswarnungError> {
        let params = [
            ("key", self.api_key.clone()),
            ("lat", self.latitude.to_string()),
            ("lng", self.longitude.to_string()),
        ];

        let envelope = self.request("/", &params).await?;
        let forecast = Forecast::from_response(&envelope)?;

        debug!(forecast_type = %forecast.forecast_type(), "forecast received");
        Ok(forecast)
    }

    /// Perform one GET request against `uri` (relative to the base URL) and
    /// classify the outcome.
    ///
    /// Envelopes with code 200 replace the stored rate limit before returning.
    #[instrument(skip(self, params))]
    pub async fn request<Q>(&mut self, uri: &str, params: &Q) -> Result<Envelope, EiswarnungError>
    where
        Q: Serialize + ?Sized,
    {
        let url = self.endpoint(uri)?;
        debug!(%url, "sending request");

        let request = self
            .session()
            .get(url)
            .query(params)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT);

        let exchange = async {
            let response = request.send().await?.error_for_status()?;
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((content_type, body))
        };

        // Dropping the exchange future on expiry aborts the in-flight request.
        let (content_type, body) = match tokio::time::timeout(self.request_timeout, exchange).await
        {
            Ok(Ok(parts)) => parts,
            Ok(Err(err)) if err.is_timeout() => return Err(EiswarnungError::ConnectionTimeout),
            Ok(Err(err)) => {
                // reqwest errors carry the full URL, API key included.
                let err = err.without_url();
                warn!(error = %err, "transport failure");
                return Err(EiswarnungError::Connection(err));
            }
            Err(_) => {
                warn!(timeout = ?self.request_timeout, "request timed out");
                return Err(EiswarnungError::ConnectionTimeout);
            }
        };

        if !is_json_content_type(&content_type) {
            warn!(%content_type, "unexpected content type");
            return Err(EiswarnungError::Generic {
                message: "Unexpected response from the Eiswarnung API".to_string(),
                content_type: Some(content_type),
                body: Some(body),
            });
        }

        let envelope: Envelope = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(err) => {
                return Err(EiswarnungError::Generic {
                    message: format!("Failed to parse Eiswarnung API response: {err}"),
                    content_type: Some(content_type),
                    body: Some(body),
                });
            }
        };

        debug!(code = envelope.code, "response received");

        if envelope.code == 200 {
            self.ratelimit = Some(Ratelimit::from_response(&envelope));
        }

        check_envelope(envelope)
    }

    /// Release the session if this client created it. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.close_session && self.session.take().is_some() {
            debug!("closed internal session");
        }
        self.close_session = false;
    }

    fn session(&mut self) -> Client {
        match &self.session {
            Some(session) => session.clone(),
            None => {
                let session = Client::new();
                self.session = Some(session.clone());
                self.close_session = true;
                session
            }
        }
    }

    fn endpoint(&self, uri: &str) -> Result<Url, EiswarnungError> {
        Url::parse(&self.base_url)
            .and_then(|base| base.join(uri))
            .map_err(|err| EiswarnungError::Generic {
                message: format!("Invalid request URL {}{uri}: {err}", self.base_url),
                content_type: None,
                body: None,
            })
    }
}

impl Drop for Eiswarnung {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Eiswarnung {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Eiswarnung")
            .field("api_key", &"<redacted>")
            .field("latitude", &self.latitude)
            .field("longitude", &self.longitude)
            .field("request_timeout", &self.request_timeout)
            .field("base_url", &self.base_url)
            .field("close_session", &self.close_session)
            .field("ratelimit", &self.ratelimit)
            .finish()
    }
}

/// Map error codes carried inside the envelope to errors.
fn check_envelope(envelope: Envelope) -> Result<Envelope, EiswarnungError> {
    match envelope.code {
        300 | 400 | 401 => {
            warn!(code = envelope.code, "request rejected");
            Err(EiswarnungError::Request {
                code: envelope.code,
                message: envelope.message_or_default(),
            })
        }
        402 => {
            warn!("rate limit exceeded");
            Err(EiswarnungError::Ratelimit {
                code: envelope.code,
                message: envelope.message_or_default(),
            })
        }
        _ => Ok(envelope),
    }
}

fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    essence == "application/json"
        || (essence.starts_with("application/") && essence.ends_with("+json"))
}

/// Construct a client from the stored configuration.
pub fn client_from_config(config: &Config) -> anyhow::Result<Eiswarnung> {
    let api_key = config.api_key().ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured.\n\
             Hint: run `eiswarnung configure` and enter your API key."
        )
    })?;
    let (latitude, longitude) = config.coordinates()?;

    Ok(Eiswarnung::new(api_key, latitude, longitude).with_timeout(config.request_timeout()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: serde_json::Value) -> Envelope {
        serde_json::from_value(value).expect("valid envelope")
    }

    #[test]
    fn json_content_types() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type("Application/JSON"));
        assert!(is_json_content_type("application/problem+json"));
        assert!(!is_json_content_type("text/plain"));
        assert!(!is_json_content_type("text/html; charset=utf-8"));
        assert!(!is_json_content_type("blabla/blabla"));
        assert!(!is_json_content_type(""));
    }

    #[test]
    fn endpoint_joins_relative_uri() {
        let client = Eiswarnung::new("KEY", 49.41, 8.68);

        assert_eq!(client.endpoint("/").unwrap().as_str(), "https://api.eiswarnung.de/");
        assert_eq!(client.endpoint("test").unwrap().as_str(), "https://api.eiswarnung.de/test");
    }

    #[test]
    fn invalid_base_url_is_generic_error() {
        let client = Eiswarnung::new("KEY", 49.41, 8.68).with_base_url("not a url");
        let err = client.endpoint("/").unwrap_err();
        assert!(matches!(err, EiswarnungError::Generic { .. }));
    }

    #[test]
    fn request_codes_are_rejected() {
        for code in [300, 400, 401] {
            let err = check_envelope(envelope(json!({ "code": code, "message": "Bad" }))).unwrap_err();
            assert!(matches!(err, EiswarnungError::Request { code: c, .. } if c == code));
        }
    }

    #[test]
    fn ratelimit_code_is_rejected() {
        let err = check_envelope(envelope(json!({ "code": 402, "message": "Quota exceeded" })))
            .unwrap_err();
        assert!(matches!(err, EiswarnungError::Ratelimit { code: 402, .. }));
    }

    #[test]
    fn missing_message_gets_placeholder() {
        let err = check_envelope(envelope(json!({ "code": 400 }))).unwrap_err();
        assert_eq!(err.to_string(), "Unknown error (error 400)");
    }

    #[test]
    fn other_codes_pass_through() {
        for code in [200, 201, 500] {
            let env = envelope(json!({ "code": code }));
            assert_eq!(check_envelope(env.clone()).unwrap(), env);
        }
    }

    #[test]
    fn close_without_request_is_noop() {
        let mut client = Eiswarnung::new("KEY", 49.41, 8.68);
        client.close();
        client.close();
        assert!(!client.has_session());
        assert!(client.ratelimit().is_none());
    }

    #[test]
    fn lazily_created_session_is_owned_and_released() {
        let mut client = Eiswarnung::new("KEY", 49.41, 8.68);
        let _ = client.session();
        assert!(client.owns_session());

        client.close();
        assert!(!client.has_session());
        client.close();
    }

    #[test]
    fn external_session_is_never_released() {
        let mut client = Eiswarnung::new("KEY", 49.41, 8.68).with_session(Client::new());
        assert!(!client.owns_session());

        client.close();
        client.close();
        assert!(client.has_session());
    }

    #[test]
    fn debug_output_hides_api_key() {
        let client = Eiswarnung::new("SECRET", 49.41, 8.68);
        let out = format!("{client:?}");
        assert!(!out.contains("SECRET"));
        assert!(out.contains("49.41"));
    }

    #[test]
    fn client_from_config_requires_api_key() {
        let cfg = Config::default();
        let err = client_from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("No API key configured"));
    }

    #[test]
    fn client_from_config_uses_location_and_timeout() {
        let mut cfg = Config::default();
        cfg.set_api_key("KEY".into());
        cfg.set_location(49.41, 8.68).unwrap();
        cfg.request_timeout_secs = Some(3);

        let client = client_from_config(&cfg).unwrap();
        assert_eq!(client.latitude(), 49.41);
        assert_eq!(client.longitude(), 8.68);
        assert_eq!(client.request_timeout(), Duration::from_secs(3));
    }
}
