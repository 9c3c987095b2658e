//! Document REST client implementation of the remote store.
//!
//! Speaks to a document database exposed over HTTP at
//! `{base}/collections/{collection}/docs[/{doc_id}]` with JSON bodies and
//! equality/range query parameters. Change subscriptions are implemented by
//! polling the owner's collection and diffing against the previous snapshot;
//! plain REST carries no write-acknowledgement metadata, so polled events are
//! never marked as pending writes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

use crate::util::{compact_text, is_http_url, normalize_text_option};

use super::{
    CategoryDoc, CategoryQuery, ChangeBatch, ChangeEvent, ChangeKind, ChangeSubscription,
    FetchSource, NoteDoc, NoteQuery, RemoteCategory, RemoteError, RemoteNote, RemoteResult,
    RemoteStore,
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound companion for a prefix range filter: lower bound is the prefix
/// itself, upper bound is the prefix followed by this high sentinel.
const PREFIX_SENTINEL: char = '\u{f8ff}';

/// Configuration for [`HttpRemote`].
#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    /// Remote API base URL (e.g. `https://api.example.com`)
    pub base_url: String,
    /// Bearer token for authenticated requests
    pub api_key: Option<String>,
    /// Interval between change-subscription polls
    pub poll_interval: Duration,
}

impl HttpRemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// HTTP implementation of [`RemoteStore`].
#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    poll_interval: Duration,
    note_cache: Arc<Mutex<HashMap<String, Vec<RemoteNote>>>>,
    category_cache: Arc<Mutex<HashMap<String, Vec<RemoteCategory>>>>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct NoteRow {
    id: String,
    doc: NoteDoc,
}

#[derive(Debug, Deserialize)]
struct CategoryRow {
    id: String,
    doc: CategoryDoc,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl HttpRemote {
    pub fn new(config: HttpRemoteConfig) -> RemoteResult<Self> {
        let base_url = normalize_endpoint(config.base_url)?;
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|error| RemoteError::Api(error.to_string()))?;

        Ok(Self {
            base_url,
            api_key: config.api_key,
            client,
            poll_interval: config.poll_interval,
            note_cache: Arc::new(Mutex::new(HashMap::new())),
            category_cache: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn docs_url(&self, collection: &str) -> String {
        format!("{}/collections/{collection}/docs", self.base_url)
    }

    fn doc_url(&self, collection: &str, doc_id: &str) -> String {
        format!(
            "{}/collections/{collection}/docs/{}",
            self.base_url,
            urlencoding::encode(doc_id)
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn check_status(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Api(parse_api_error(status, &body)))
    }

    async fn put_doc<D: serde::Serialize>(
        &self,
        collection: &str,
        doc_id: Option<&str>,
        doc: &D,
    ) -> RemoteResult<String> {
        let request = match doc_id {
            Some(id) => self.client.put(self.doc_url(collection, id)).json(doc),
            None => self.client.post(self.docs_url(collection)).json(doc),
        };

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = Self::check_status(response).await?;

        if let Some(id) = doc_id {
            return Ok(id.to_string());
        }
        let payload = response
            .json::<PutResponse>()
            .await
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
        Ok(payload.id)
    }

    async fn get_doc<D: serde::de::DeserializeOwned>(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> RemoteResult<Option<D>> {
        let response = self
            .authorize(self.client.get(self.doc_url(collection, doc_id)))
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check_status(response).await?;
        let doc = response
            .json::<D>()
            .await
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
        Ok(Some(doc))
    }

    async fn delete_doc(&self, collection: &str, doc_id: &str) -> RemoteResult<()> {
        let response = self
            .authorize(self.client.delete(self.doc_url(collection, doc_id)))
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check_status(response).await?;
        Ok(())
    }

    async fn query_notes_server(&self, query: &NoteQuery) -> RemoteResult<Vec<RemoteNote>> {
        let mut params = vec![format!(
            "owner_id={}",
            urlencoding::encode(&query.owner_id)
        )];
        if let Some(title) = &query.title {
            params.push(format!("title={}", urlencoding::encode(title)));
        }
        if let Some(content) = &query.content {
            params.push(format!("content={}", urlencoding::encode(content)));
        }
        if let Some(prefix) = &query.content_prefix {
            let upper = format!("{prefix}{PREFIX_SENTINEL}");
            params.push(format!("content_gte={}", urlencoding::encode(prefix)));
            params.push(format!("content_lt={}", urlencoding::encode(&upper)));
        }

        let url = format!("{}?{}", self.docs_url("notes"), params.join("&"));
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = Self::check_status(response).await?;

        let rows = response
            .json::<Vec<NoteRow>>()
            .await
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
        let results: Vec<RemoteNote> = rows
            .into_iter()
            .map(|row| RemoteNote {
                doc_id: row.id,
                doc: row.doc,
            })
            .collect();

        if query.title.is_none() && query.content.is_none() && query.content_prefix.is_none() {
            self.note_cache
                .lock()
                .expect("note cache lock")
                .insert(query.owner_id.clone(), results.clone());
        }
        Ok(results)
    }

    fn cached_notes(&self, owner_id: &str) -> RemoteResult<Vec<RemoteNote>> {
        self.note_cache
            .lock()
            .expect("note cache lock")
            .get(owner_id)
            .cloned()
            .ok_or_else(|| RemoteError::Connectivity("no cached snapshot for owner".to_string()))
    }

    async fn query_categories_server(
        &self,
        query: &CategoryQuery,
    ) -> RemoteResult<Vec<RemoteCategory>> {
        let mut params = vec![format!(
            "owner_id={}",
            urlencoding::encode(&query.owner_id)
        )];
        if let Some(name) = &query.name {
            params.push(format!("name={}", urlencoding::encode(name)));
        }

        let url = format!("{}?{}", self.docs_url("categories"), params.join("&"));
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = Self::check_status(response).await?;

        let rows = response
            .json::<Vec<CategoryRow>>()
            .await
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
        let results: Vec<RemoteCategory> = rows
            .into_iter()
            .map(|row| RemoteCategory {
                doc_id: row.id,
                doc: row.doc,
            })
            .collect();

        if query.name.is_none() {
            self.category_cache
                .lock()
                .expect("category cache lock")
                .insert(query.owner_id.clone(), results.clone());
        }
        Ok(results)
    }

    fn cached_categories(&self, owner_id: &str) -> RemoteResult<Vec<RemoteCategory>> {
        self.category_cache
            .lock()
            .expect("category cache lock")
            .get(owner_id)
            .cloned()
            .ok_or_else(|| RemoteError::Connectivity("no cached snapshot for owner".to_string()))
    }
}

impl RemoteStore for HttpRemote {
    async fn put_note(&self, doc_id: Option<&str>, doc: &NoteDoc) -> RemoteResult<String> {
        self.put_doc("notes", doc_id, doc).await
    }

    async fn get_note(&self, doc_id: &str) -> RemoteResult<Option<NoteDoc>> {
        self.get_doc("notes", doc_id).await
    }

    async fn query_notes(
        &self,
        query: &NoteQuery,
        source: FetchSource,
    ) -> RemoteResult<Vec<RemoteNote>> {
        match source {
            FetchSource::Server => self.query_notes_server(query).await,
            FetchSource::Cache => self.cached_notes(&query.owner_id),
            FetchSource::Mixed => match self.query_notes_server(query).await {
                Ok(results) => Ok(results),
                Err(RemoteError::Connectivity(_)) => self.cached_notes(&query.owner_id),
                Err(error) => Err(error),
            },
        }
    }

    async fn delete_note(&self, doc_id: &str) -> RemoteResult<()> {
        self.delete_doc("notes", doc_id).await
    }

    async fn subscribe_notes(&self, owner_id: &str) -> RemoteResult<ChangeSubscription> {
        let (sender, subscription) = ChangeSubscription::channel();
        let handle = subscription.handle();
        let remote = self.clone();
        let owner = owner_id.to_string();

        tokio::spawn(async move {
            let mut previous: HashMap<String, i64> = HashMap::new();
            let mut primed = false;

            loop {
                if handle.is_cancelled() {
                    break;
                }

                match remote
                    .query_notes_server(&NoteQuery::for_owner(owner.clone()))
                    .await
                {
                    Ok(snapshot) => {
                        let mut events = Vec::new();
                        let mut current: HashMap<String, i64> = HashMap::new();

                        for note in &snapshot {
                            let modified = note.doc.modified_ms();
                            current.insert(note.doc_id.clone(), modified);
                            let kind = match previous.get(&note.doc_id) {
                                None => ChangeKind::Added,
                                Some(&seen) if seen != modified => ChangeKind::Modified,
                                Some(_) => continue,
                            };
                            events.push(ChangeEvent {
                                kind,
                                doc_id: note.doc_id.clone(),
                                doc: Some(note.doc.clone()),
                                pending_write: false,
                            });
                        }
                        for doc_id in previous.keys() {
                            if !current.contains_key(doc_id) {
                                events.push(ChangeEvent {
                                    kind: ChangeKind::Removed,
                                    doc_id: doc_id.clone(),
                                    doc: None,
                                    pending_write: false,
                                });
                            }
                        }

                        previous = current;
                        // The first poll only primes the snapshot; the
                        // backlog it would replay is stale by definition.
                        if primed
                            && !events.is_empty()
                            && sender.send(ChangeBatch { events }).is_err()
                        {
                            break;
                        }
                        primed = true;
                    }
                    Err(error) => {
                        tracing::warn!("Change poll failed: {error}");
                    }
                }

                tokio::time::sleep(remote.poll_interval).await;
            }
        });

        Ok(subscription)
    }

    async fn put_category(&self, doc_id: Option<&str>, doc: &CategoryDoc) -> RemoteResult<String> {
        self.put_doc("categories", doc_id, doc).await
    }

    async fn get_category(&self, doc_id: &str) -> RemoteResult<Option<CategoryDoc>> {
        self.get_doc("categories", doc_id).await
    }

    async fn query_categories(
        &self,
        query: &CategoryQuery,
        source: FetchSource,
    ) -> RemoteResult<Vec<RemoteCategory>> {
        match source {
            FetchSource::Server => self.query_categories_server(query).await,
            FetchSource::Cache => self.cached_categories(&query.owner_id),
            FetchSource::Mixed => match self.query_categories_server(query).await {
                Ok(results) => Ok(results),
                Err(RemoteError::Connectivity(_)) => self.cached_categories(&query.owner_id),
                Err(error) => Err(error),
            },
        }
    }

    async fn delete_category(&self, doc_id: &str) -> RemoteResult<()> {
        self.delete_doc("categories", doc_id).await
    }
}

fn map_transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_connect() || error.is_timeout() {
        RemoteError::Connectivity(error.to_string())
    } else {
        RemoteError::Api(error.to_string())
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> RemoteResult<String> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidPayload("endpoint must not be empty".to_string())
    })?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidPayload(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}
