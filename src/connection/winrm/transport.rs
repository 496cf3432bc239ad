//! HTTP transport for WinRM requests.
//!
//! One pooled `reqwest` client per connection. Every request carries HTTP
//! Basic credentials; when the username is in UPN form and a
//! [`SpnegoTokenProvider`] is configured, a Negotiate token is attached first
//! and Basic is used as the fallback on `401`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Proxy, RequestBuilder, StatusCode};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::soap::SoapAction;
use super::WinRmConfig;
use crate::error::{Error, Result};
use crate::options::keys;

const SOAP_CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";

// ============================================================================
// HTTPS strategies
// ============================================================================

/// Which server certificates are trusted over HTTPS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertificateTrustStrategy {
    /// Only certificates chaining to a trusted root.
    #[default]
    Strict,
    /// Also self-signed certificates.
    SelfSigned,
    /// Any certificate.
    AllowAll,
}

impl FromStr for CertificateTrustStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "STRICT" => Ok(Self::Strict),
            "SELFSIGNED" | "SELF_SIGNED" => Ok(Self::SelfSigned),
            "ALLOW_ALL" => Ok(Self::AllowAll),
            _ => Err(Error::invalid_option(
                keys::WINRM_HTTPS_CERTIFICATE_TRUST_STRATEGY,
                format!("unknown strategy '{}'", s),
            )),
        }
    }
}

/// How the server's hostname is checked against its certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostnameVerificationStrategy {
    /// Exact match, wildcards cover a single label.
    #[default]
    Strict,
    /// Wildcards as browsers accept them.
    BrowserCompatible,
    /// No hostname check.
    AllowAll,
}

impl FromStr for HostnameVerificationStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "STRICT" => Ok(Self::Strict),
            "BROWSER_COMPATIBLE" => Ok(Self::BrowserCompatible),
            "ALLOW_ALL" => Ok(Self::AllowAll),
            _ => Err(Error::invalid_option(
                keys::WINRM_HTTPS_HOSTNAME_VERIFICATION_STRATEGY,
                format!("unknown strategy '{}'", s),
            )),
        }
    }
}

// ============================================================================
// Kerberos
// ============================================================================

/// Credentials handed to a [`SpnegoTokenProvider`].
#[derive(Clone)]
pub struct KerberosCredentials {
    /// Principal with an uppercased realm, e.g. `admin@CORP.EXAMPLE.COM`
    pub principal: String,
    /// Password for the principal, if one was configured
    pub password: Option<String>,
}

impl fmt::Debug for KerberosCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KerberosCredentials")
            .field("principal", &self.principal)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .finish()
    }
}

impl KerberosCredentials {
    /// Credentials for a UPN-style username, or `None` if it has no realm.
    ///
    /// Realms are matched case-sensitively, so the part after `@` is
    /// uppercased.
    pub fn from_username(username: &str, password: Option<&str>) -> Option<Self> {
        let (user, realm) = username.split_once('@')?;
        if user.is_empty() || realm.is_empty() {
            return None;
        }
        Some(Self {
            principal: format!("{}@{}", user, realm.to_uppercase()),
            password: password.map(str::to_string),
        })
    }
}

/// Produces SPNEGO tokens for the `Negotiate` scheme.
///
/// Called once per outbound request with the credentials of the connection;
/// no identity is taken from the calling thread or process.
#[async_trait]
pub trait SpnegoTokenProvider: Send + Sync {
    /// Log in as `credentials` and return an initial token for `service_principal`.
    async fn initial_token(
        &self,
        credentials: &KerberosCredentials,
        service_principal: &str,
    ) -> Result<Vec<u8>>;
}

struct KerberosAuth {
    credentials: KerberosCredentials,
    service_principal: String,
    provider: Arc<dyn SpnegoTokenProvider>,
}

// ============================================================================
// Transport
// ============================================================================

/// Posts SOAP documents to a WinRM endpoint.
pub struct WinRmTransport {
    client: Client,
    endpoint: String,
    username: Option<String>,
    password: Option<String>,
    kerberos: Option<KerberosAuth>,
}

impl fmt::Debug for WinRmTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WinRmTransport")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("kerberos", &self.kerberos.as_ref().map(|k| &k.service_principal))
            .finish()
    }
}

impl WinRmTransport {
    /// Build the HTTP client for `config`.
    pub fn new(
        config: &WinRmConfig,
        spnego: Option<Arc<dyn SpnegoTokenProvider>>,
    ) -> Result<Self> {
        let mut builder = Client::builder().connect_timeout(config.connection_timeout);
        if let Some(timeout) = config.so_timeout {
            builder = builder.timeout(timeout);
        }

        if config.https {
            let accept_invalid = match config.certificate_trust {
                CertificateTrustStrategy::Strict => false,
                CertificateTrustStrategy::SelfSigned | CertificateTrustStrategy::AllowAll => true,
            };
            // rustls cannot skip the hostname check alone, so ALLOW_ALL
            // hostnames need a trust strategy that already accepts any certificate.
            if config.hostname_verification == HostnameVerificationStrategy::AllowAll
                && !accept_invalid
            {
                return Err(Error::invalid_option(
                    keys::WINRM_HTTPS_HOSTNAME_VERIFICATION_STRATEGY,
                    "ALLOW_ALL requires a certificate trust strategy other than STRICT",
                ));
            }
            builder = builder.danger_accept_invalid_certs(accept_invalid);
        }

        if let Some(jumpstation) = &config.jumpstation {
            let proxy = Proxy::all(jumpstation.as_str()).map_err(|e| {
                Error::invalid_option(keys::JUMPSTATION, format!("invalid proxy URL: {}", e))
            })?;
            debug!(jumpstation = %jumpstation, "Routing WinRM traffic through jump station");
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| {
            Error::protocol(format!("Failed to create HTTP client: {}", e)).with_source(e)
        })?;

        let kerberos = match (
            KerberosCredentials::from_username(&config.username, config.password.as_deref()),
            spnego,
        ) {
            (Some(credentials), Some(provider)) => Some(KerberosAuth {
                credentials,
                service_principal: config.service_principal_name(),
                provider,
            }),
            (Some(credentials), None) => {
                warn!(
                    principal = %credentials.principal,
                    "No SPNEGO token provider configured, using Basic authentication only"
                );
                None
            }
            (None, _) => None,
        };

        Ok(Self {
            client,
            endpoint: config.endpoint_url(),
            username: Some(config.username.clone()).filter(|u| !u.is_empty()),
            password: config.password.clone(),
            kerberos,
        })
    }

    /// URL requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, action: SoapAction, document: &str) -> RequestBuilder {
        self.client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .header("SOAPAction", action.uri())
            .body(document.to_string())
    }

    fn with_basic(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_deref()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, document: &str) -> Result<reqwest::Response> {
        request.send().await.map_err(|e| {
            Error::protocol(format!("HTTP request to {} failed: {}", self.endpoint, e))
                .with_request(document)
                .with_source(e)
        })
    }

    /// Post `document` and return the response document.
    ///
    /// Anything but a `200` carrying `application/soap+xml` is a protocol
    /// fault holding both documents.
    pub async fn post(&self, action: SoapAction, document: &str) -> Result<String> {
        trace!(action = %action, request = %document, "Sending WinRM request");

        let response = match &self.kerberos {
            Some(kerberos) => {
                let token = kerberos
                    .provider
                    .initial_token(&kerberos.credentials, &kerberos.service_principal)
                    .await?;
                let negotiate = self.request(action, document).header(
                    AUTHORIZATION,
                    format!("Negotiate {}", BASE64_STANDARD.encode(token)),
                );
                let response = self.send(negotiate, document).await?;
                if response.status() == StatusCode::UNAUTHORIZED {
                    debug!(
                        spn = %kerberos.service_principal,
                        "Negotiate rejected, retrying with Basic authentication"
                    );
                    self.send(self.with_basic(self.request(action, document)), document)
                        .await?
                } else {
                    response
                }
            }
            None => {
                self.send(self.with_basic(self.request(action, document)), document)
                    .await?
            }
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let body = response.text().await.map_err(|e| {
            Error::protocol(format!("Failed to read {} response: {}", action, e))
                .with_request(document)
                .with_source(e)
        })?;
        trace!(action = %action, status = %status, response = %body, "Received WinRM response");

        if status != StatusCode::OK {
            let error = Error::protocol(format!(
                "Unexpected HTTP response on {}: {}",
                action, status
            ))
            .with_request(document);
            return Err(if body.is_empty() {
                error
            } else {
                error.with_response(body)
            });
        }

        if !content_type.starts_with("application/soap+xml") {
            return Err(Error::protocol(format!(
                "Unexpected content type on {}: '{}'",
                action, content_type
            ))
            .with_request(document)
            .with_response(body));
        }

        Ok(body)
    }
}
