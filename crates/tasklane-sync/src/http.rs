//! # API Client
//!
//! Shared HTTPS/JSON plumbing for every REST call the sync core makes.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Authenticated Call                             │
//! │                                                                         │
//! │  get_valid_access_token() ──► send (Bearer) ──► status                  │
//! │                                                  │                      │
//! │                       ┌──────────────────────────┼──────────────┐       │
//! │                       ▼                          ▼              ▼       │
//! │                   2xx: decode               401: force_refresh  other:  │
//! │                   (DecodeFailure            + one retry          Http   │
//! │                    on bad body)                  │                      │
//! │                                                  ▼                      │
//! │                                     second 401 ──► Unauthorized         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every await point races the pass's [`CancellationToken`]; a cancelled
//! call returns [`NetError::Cancelled`] and sends nothing further.

use std::future::Future;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::auth::AccessTokenManager;
use crate::config::ApiSettings;
use crate::error::{NetError, NetResult, SyncError, SyncResult};

/// Appends path segments to `base`, percent-encoding each one.
pub fn endpoint_url(base: &Url, segments: &[&str]) -> Result<Url, url::ParseError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Runs `fut` unless `cancel` fires first.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> NetResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(NetError::Cancelled),
        out = fut => Ok(out),
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "message")]
    error: String,
}

/// Authenticated JSON client for the sync service.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    tokens: AccessTokenManager,
}

impl ApiClient {
    pub fn new(settings: &ApiSettings, tokens: AccessTokenManager) -> SyncResult<Self> {
        let base = Url::parse(&settings.base_url)?;
        if base.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(settings.base_url.clone()));
        }
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .connect_timeout(settings.connect_timeout())
            .build()
            .map_err(|e| SyncError::Internal(e.to_string()))?;
        Ok(ApiClient { http, base, tokens })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn tokens(&self) -> &AccessTokenManager {
        &self.tokens
    }

    pub fn endpoint(&self, segments: &[&str]) -> NetResult<Url> {
        Ok(endpoint_url(&self.base, segments)?)
    }

    /// `GET url`, decoded as `T`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        cancel: &CancellationToken,
    ) -> NetResult<T> {
        let response = self
            .execute(|| self.http.request(Method::GET, url.clone()), cancel)
            .await?;
        decode(response, cancel).await
    }

    /// `POST`/`PATCH`/`PUT` with a JSON body, decoded as `T`.
    pub async fn send_json<B, T>(
        &self,
        method: Method,
        url: Url,
        body: &B,
        cancel: &CancellationToken,
    ) -> NetResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .execute(
                || self.http.request(method.clone(), url.clone()).json(body),
                cancel,
            )
            .await?;
        decode(response, cancel).await
    }

    /// `DELETE url`. A 404 means the resource is already gone.
    pub async fn delete(&self, url: Url, cancel: &CancellationToken) -> NetResult<()> {
        let response = self
            .execute(|| self.http.request(Method::DELETE, url.clone()), cancel)
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(%url, "Delete target already absent");
            return Ok(());
        }
        if status.is_success() {
            return Ok(());
        }
        let body = cancellable(cancel, response.bytes()).await??;
        Err(http_error(status, &body))
    }

    /// Sends with a bearer token. A 401 triggers exactly one forced refresh
    /// and one retry of the same request.
    async fn execute<F>(&self, build: F, cancel: &CancellationToken) -> NetResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let token = cancellable(cancel, self.tokens.get_valid_access_token()).await??;
        let response = cancellable(cancel, build().bearer_auth(&token).send()).await??;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("Request rejected with 401, forcing token refresh");
        let token = cancellable(cancel, self.tokens.force_refresh(&token)).await??;
        let response = cancellable(cancel, build().bearer_auth(&token).send()).await??;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Request rejected again after token refresh");
            return Err(NetError::Unauthorized);
        }
        Ok(response)
    }
}

async fn decode<T: DeserializeOwned>(response: Response, cancel: &CancellationToken) -> NetResult<T> {
    let status = response.status();
    let body = cancellable(cancel, response.bytes()).await??;
    if !status.is_success() {
        return Err(http_error(status, &body));
    }
    serde_json::from_slice(&body).map_err(|e| NetError::DecodeFailure(e.to_string()))
}

fn http_error(status: StatusCode, body: &[u8]) -> NetError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| {
            let text = String::from_utf8_lossy(body);
            text.chars().take(200).collect()
        });
    NetError::Http {
        status: status.as_u16(),
        message,
    }
}
