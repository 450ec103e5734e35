//! # Resource Sync Client
//!
//! One generic client serves every REST collection. The resource kind picks
//! the path segment and the wire schema:
//!
//! ```text
//! ResourceSyncClient<FolderRecord>        →  /folders
//! ResourceSyncClient<ListRecord>          →  /lists
//! ResourceSyncClient<ItemRecord>          →  /items
//! ResourceSyncClient<NotificationRecord>  →  /notifications
//! ResourceSyncClient<ShareRecord>         →  /shares
//! ```
//!
//! A malformed body fails the whole call with `DecodeFailure`; nothing of a
//! half-decoded batch ever reaches the store.

use std::marker::PhantomData;

use reqwest::Method;
use tasklane_core::{Delta, Resource, ResourceKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::error::{NetResult, SyncResult};
use crate::http::{endpoint_url, ApiClient};

/// REST client for one resource collection.
#[derive(Debug, Clone)]
pub struct ResourceSyncClient<R: Resource> {
    api: ApiClient,
    collection: Url,
    _record: PhantomData<fn() -> R>,
}

impl<R: Resource> ResourceSyncClient<R> {
    pub fn new(api: ApiClient) -> SyncResult<Self> {
        let collection = api.endpoint(&[R::KIND.path_segment()])?;
        Ok(ResourceSyncClient {
            api,
            collection,
            _record: PhantomData,
        })
    }

    pub fn kind(&self) -> ResourceKind {
        R::KIND
    }

    /// `GET /{collection}?since=<cursor>`. Without a cursor the service
    /// returns the full current set.
    pub async fn fetch_delta(
        &self,
        since: Option<&str>,
        cancel: &CancellationToken,
    ) -> NetResult<Delta<R>> {
        let mut url = self.collection.clone();
        if let Some(since) = since {
            url.query_pairs_mut().append_pair("since", since);
        }
        debug!(kind = %R::KIND, since, "Fetching delta");

        let delta: Delta<R> = self.api.get_json(url, cancel).await?;
        info!(
            kind = %R::KIND,
            upserts = delta.upserts.len(),
            deletes = delta.deletes.len(),
            "Fetched delta"
        );
        Ok(delta)
    }

    /// `POST /{collection}`.
    pub async fn create(&self, payload: &R::Patch, cancel: &CancellationToken) -> NetResult<R> {
        self.api
            .send_json(Method::POST, self.collection.clone(), payload, cancel)
            .await
    }

    /// `PATCH /{collection}/{id}`.
    pub async fn update(
        &self,
        id: &str,
        payload: &R::Patch,
        cancel: &CancellationToken,
    ) -> NetResult<R> {
        let url = endpoint_url(&self.collection, &[id])?;
        self.api.send_json(Method::PATCH, url, payload, cancel).await
    }

    /// `DELETE /{collection}/{id}`.
    pub async fn delete(&self, id: &str, cancel: &CancellationToken) -> NetResult<()> {
        let url = endpoint_url(&self.collection, &[id])?;
        self.api.delete(url, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetError;
    use crate::test_support::{api_client, config_for, expired_pair, token_manager, RejectingRefresher};
    use mockito::Matcher;
    use std::sync::Arc;
    use tasklane_core::wire::{FolderPatch, FolderRecord, ItemRecord, ListRecord, ShareRecord};
    use tasklane_core::{Completion, Rgba};

    #[tokio::test]
    async fn test_fetch_delta_sends_since_and_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/lists")
            .match_query(Matcher::UrlEncoded("since".into(), "2024-05-01T00:00:00Z".into()))
            .match_header("authorization", "Bearer a1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "since": "2024-05-01T00:00:00Z",
                    "now": "2024-05-02T00:00:00Z",
                    "upserts": [{"id": "t9", "name": "Buy milk", "completed": 2}],
                    "deletes": [{"id": "t3", "deletedAt": "2024-05-01T10:00:00Z"}]
                }"#,
            )
            .create_async()
            .await;

        let (api, _) = api_client(&server.url(), "a1");
        let client = ResourceSyncClient::<ListRecord>::new(api).unwrap();
        let delta = client
            .fetch_delta(Some("2024-05-01T00:00:00Z"), &CancellationToken::new())
            .await
            .unwrap();
        mock.assert_async().await;

        assert_eq!(delta.now.as_deref(), Some("2024-05-02T00:00:00Z"));
        assert_eq!(delta.upserts[0].completed, Completion::Checked);
        assert_eq!(delta.deletes[0].id, "t3");
    }

    #[tokio::test]
    async fn test_fetch_without_cursor_omits_since() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/folders")
            .match_query(Matcher::Missing)
            .with_status(200)
            .with_body(r##"{"upserts": [{"id": "f1", "name": "Inbox", "color": "#FF0000"}]}"##)
            .create_async()
            .await;

        let (api, _) = api_client(&server.url(), "a1");
        let delta = ResourceSyncClient::<FolderRecord>::new(api)
            .unwrap()
            .fetch_delta(None, &CancellationToken::new())
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(delta.upserts[0].color, Rgba::new(0xFF, 0, 0, 0xFF));
        assert!(delta.now.is_none());
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/items")
            .with_status(200)
            .with_body(r#"{"upserts": [{"id": "i1", "listId": "t1", "name": "ok"}, {"id": 7}]}"#)
            .create_async()
            .await;

        let (api, _) = api_client(&server.url(), "a1");
        let err = ResourceSyncClient::<ItemRecord>::new(api)
            .unwrap()
            .fetch_delta(None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::DecodeFailure(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unauthorized_retries_once_with_fresh_token() {
        let mut server = mockito::Server::new_async().await;
        let rejected = server
            .mock("GET", "/shares")
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("GET", "/shares")
            .match_header("authorization", "Bearer fresh-1")
            .with_status(200)
            .with_body(r#"{"upserts": [{"kind": "member", "id": "s1", "listId": "t1", "userId": "u1"}]}"#)
            .expect(1)
            .create_async()
            .await;

        let (api, refresher) = api_client(&server.url(), "stale");
        let delta = ResourceSyncClient::<ShareRecord>::new(api)
            .unwrap()
            .fetch_delta(None, &CancellationToken::new())
            .await
            .unwrap();

        rejected.assert_async().await;
        accepted.assert_async().await;
        assert_eq!(refresher.calls(), 1);
        assert_eq!(delta.upserts.len(), 1);
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/lists")
            .with_status(401)
            .expect(2)
            .create_async()
            .await;

        let (api, refresher) = api_client(&server.url(), "a1");
        let err = ResourceSyncClient::<ListRecord>::new(api)
            .unwrap()
            .fetch_delta(None, &CancellationToken::new())
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, NetError::Unauthorized));
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_session_sends_nothing() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/folders")
            .expect(0)
            .create_async()
            .await;

        let tokens = token_manager(expired_pair("old"), Arc::new(RejectingRefresher));
        let api = ApiClient::new(&config_for(&server.url()).api, tokens).unwrap();
        let err = ResourceSyncClient::<FolderRecord>::new(api)
            .unwrap()
            .fetch_delta(None, &CancellationToken::new())
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(
            err,
            NetError::Auth(crate::error::AuthError::SessionExpired)
        ));
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let mut server = mockito::Server::new_async().await;
        let created = server
            .mock("POST", "/folders")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "name": "Work",
                "clientId": "corr-1"
            })))
            .with_status(201)
            .with_body(r##"{"id": "f9", "name": "Work", "color": "#00FF00CC", "clientId": "corr-1"}"##)
            .create_async()
            .await;
        let patched = server
            .mock("PATCH", "/folders/f9")
            .match_body(Matcher::Json(serde_json::json!({"order": 3})))
            .with_status(200)
            .with_body(r#"{"id": "f9", "name": "Work", "order": 3}"#)
            .create_async()
            .await;
        let deleted = server
            .mock("DELETE", "/folders/f9")
            .with_status(204)
            .create_async()
            .await;
        let already_gone = server
            .mock("DELETE", "/folders/f8")
            .with_status(404)
            .create_async()
            .await;

        let (api, _) = api_client(&server.url(), "a1");
        let client = ResourceSyncClient::<FolderRecord>::new(api).unwrap();
        let cancel = CancellationToken::new();

        let patch = FolderPatch {
            name: Some("Work".into()),
            client_id: Some("corr-1".into()),
            ..Default::default()
        };
        let folder = client.create(&patch, &cancel).await.unwrap();
        assert_eq!(folder.client_id.as_deref(), Some("corr-1"));
        assert_eq!(folder.color.alpha(), 0xCC);

        let reorder = FolderPatch {
            order: Some(3),
            ..Default::default()
        };
        assert_eq!(client.update("f9", &reorder, &cancel).await.unwrap().order, 3);
        client.delete("f9", &cancel).await.unwrap();
        client.delete("f8", &cancel).await.unwrap();

        created.assert_async().await;
        patched.assert_async().await;
        deleted.assert_async().await;
        already_gone.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/notifications")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let (api, _) = api_client(&server.url(), "a1");
        let err = ResourceSyncClient::<tasklane_core::wire::NotificationRecord>::new(api)
            .unwrap()
            .fetch_delta(None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::Http { status: 502, .. }));
        assert!(err.is_retryable());
    }
}
