// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Autodesk Platform Services client: authentication, OSS buckets and
//! objects, and the Model Derivative API.

use async_trait::async_trait;
use bim_viewer_core::services::{ObjectPage, LIST_PAGE_SIZE};
use bim_viewer_core::{
    AuthService, JobHandle, Manifest, ModelIdentifier, ObjectStore, Scope, ServiceError,
    StoredObject, TranslationService, ViewerToken,
};
use bytes::Bytes;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const AUTH: &str = "authentication";
const OSS: &str = "object store";
const DERIVATIVE: &str = "translation";

/// Refresh cached tokens this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Size of one signed S3 upload part.
pub const UPLOAD_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Most part URLs OSS hands out per request.
const MAX_PARTS_PER_REQUEST: usize = 25;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBucket<'a> {
    bucket_key: &'a str,
    policy_key: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectDetails {
    object_key: String,
    object_id: String,
}

impl From<ObjectDetails> for StoredObject {
    fn from(details: ObjectDetails) -> Self {
        StoredObject {
            key: details.object_key,
            id: details.object_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ObjectListing {
    #[serde(default)]
    items: Vec<ObjectDetails>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedUpload {
    upload_key: String,
    urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    result: String,
    urn: String,
}

/// APS REST client.
pub struct ApsClient {
    base_url: Url,
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
    chunk_size: usize,
    internal_token: Mutex<Option<CachedToken>>,
}

impl ApsClient {
    /// Create a new client for the given endpoint root and credentials.
    pub fn new(base_url: Url, client_id: &str, client_secret: &str) -> Self {
        Self {
            base_url,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            http: reqwest::Client::new(),
            chunk_size: UPLOAD_CHUNK_SIZE,
            internal_token: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// `segments` appended to the endpoint root, each percent-encoded.
    fn endpoint(&self, service: &'static str, segments: &[&str]) -> Result<Url, ServiceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ServiceError::Request {
                service,
                message: format!("{} cannot be a base URL", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Two-legged client credentials token.
    async fn request_token(&self, scopes: &[Scope]) -> Result<TokenResponse, ServiceError> {
        let request = self
            .http
            .post(self.endpoint(AUTH, &["authentication", "v2", "token"])?)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", Scope::join(scopes).as_str()),
            ]);
        let token: TokenResponse = decode(AUTH, send(AUTH, request).await?).await?;
        tracing::debug!(scopes = %Scope::join(scopes), expires_in = token.expires_in, "Issued APS token");
        Ok(token)
    }

    /// Token for storage and translation calls, cached until shortly before
    /// it expires.
    async fn internal_token(&self) -> Result<String, ServiceError> {
        let mut cached = self.internal_token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }
        let fresh = self.request_token(Scope::INTERNAL).await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(CachedToken {
            access_token: fresh.access_token,
            expires_at: Instant::now() + Duration::from_secs(fresh.expires_in),
        });
        Ok(access_token)
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ServiceError> {
        Ok(request.bearer_auth(self.internal_token().await?))
    }

    fn object_url(&self, bucket: &str, name: &str) -> Result<Url, ServiceError> {
        self.endpoint(OSS, &["oss", "v2", "buckets", bucket, "objects", name, "signeds3upload"])
    }

    async fn signed_urls(
        &self,
        bucket: &str,
        name: &str,
        first_part: usize,
        parts: usize,
        upload_key: Option<&str>,
    ) -> Result<SignedUpload, ServiceError> {
        let mut query = vec![
            ("parts", parts.to_string()),
            ("firstPart", first_part.to_string()),
        ];
        if let Some(key) = upload_key {
            query.push(("uploadKey", key.to_string()));
        }
        let request = self
            .authorized(self.http.get(self.object_url(bucket, name)?).query(&query))
            .await?;
        decode(OSS, send(OSS, request).await?).await
    }
}

/// Send a request and turn non-success statuses into errors.
async fn send(service: &'static str, request: RequestBuilder) -> Result<Response, ServiceError> {
    let response = request.send().await.map_err(|e| ServiceError::Request {
        service,
        message: e.to_string(),
    })?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(ServiceError::Status {
            service,
            status,
            body,
        });
    }
    Ok(response)
}

async fn decode<T: serde::de::DeserializeOwned>(
    service: &'static str,
    response: Response,
) -> Result<T, ServiceError> {
    response.json().await.map_err(|e| ServiceError::Decode {
        service,
        message: e.to_string(),
    })
}

/// Cursor carried in the `startAt` parameter of a listing's `next` link.
fn start_at_from_next(next: &str) -> Option<String> {
    let url = Url::parse(next).ok()?;
    let cursor = url
        .query_pairs()
        .find(|(key, _)| key == "startAt")
        .map(|(_, value)| value.into_owned());
    cursor
}

/// Number of upload parts for a payload; an empty file is still one part.
fn part_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size).max(1)
}

/// Model Derivative job request: SVF2 with 2D and 3D views.
fn job_payload(urn: &ModelIdentifier, root_file: Option<&str>) -> serde_json::Value {
    let mut input = serde_json::json!({ "urn": urn.as_str() });
    if let Some(root) = root_file {
        input["compressedUrn"] = serde_json::Value::Bool(true);
        input["rootFilename"] = serde_json::Value::String(root.to_string());
    }
    serde_json::json!({
        "input": input,
        "output": {
            "formats": [{ "type": "svf2", "views": ["2d", "3d"] }]
        }
    })
}

#[async_trait]
impl AuthService for ApsClient {
    async fn issue_token(&self, scopes: &[Scope]) -> Result<ViewerToken, ServiceError> {
        let token = self.request_token(scopes).await?;
        Ok(ViewerToken {
            access_token: token.access_token,
            expires_in: token.expires_in,
        })
    }
}

#[async_trait]
impl ObjectStore for ApsClient {
    async fn ensure_container(&self, container: &str) -> Result<(), ServiceError> {
        let details = self
            .authorized(
                self.http
                    .get(self.endpoint(OSS, &["oss", "v2", "buckets", container, "details"])?),
            )
            .await?;
        match send(OSS, details).await {
            Ok(_) => return Ok(()),
            Err(err) if err.status() == Some(StatusCode::NOT_FOUND.as_u16()) => {}
            Err(err) => return Err(err),
        }

        tracing::info!(bucket = %container, "Creating bucket");
        let create = self
            .authorized(
                self.http
                    .post(self.endpoint(OSS, &["oss", "v2", "buckets"])?)
                    .header("x-ads-region", "US")
                    .json(&CreateBucket {
                        bucket_key: container,
                        policy_key: "persistent",
                    }),
            )
            .await?;
        match send(OSS, create).await {
            Ok(_) => Ok(()),
            // Created concurrently by someone else.
            Err(err) if err.status() == Some(StatusCode::CONFLICT.as_u16()) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn list_page(
        &self,
        container: &str,
        start_at: Option<&str>,
    ) -> Result<ObjectPage, ServiceError> {
        let mut query = vec![("limit", LIST_PAGE_SIZE.to_string())];
        if let Some(cursor) = start_at {
            query.push(("startAt", cursor.to_string()));
        }
        let request = self
            .authorized(
                self.http
                    .get(self.endpoint(OSS, &["oss", "v2", "buckets", container, "objects"])?)
                    .query(&query),
            )
            .await?;
        let listing: ObjectListing = decode(OSS, send(OSS, request).await?).await?;
        Ok(ObjectPage {
            items: listing.items.into_iter().map(StoredObject::from).collect(),
            next: listing.next.as_deref().and_then(start_at_from_next),
        })
    }

    async fn put_object(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
    ) -> Result<StoredObject, ServiceError> {
        let parts = part_count(data.len(), self.chunk_size);
        tracing::debug!(bucket = %container, object = %name, size = data.len(), parts, "Uploading object");

        let mut upload_key: Option<String> = None;
        let mut part = 0;
        while part < parts {
            let batch = (parts - part).min(MAX_PARTS_PER_REQUEST);
            let signed = self
                .signed_urls(container, name, part + 1, batch, upload_key.as_deref())
                .await?;
            if signed.urls.len() < batch {
                return Err(ServiceError::Decode {
                    service: OSS,
                    message: format!("expected {batch} upload URLs, got {}", signed.urls.len()),
                });
            }
            for url in signed.urls.iter().take(batch) {
                let start = part * self.chunk_size;
                let end = (start + self.chunk_size).min(data.len());
                send(OSS, self.http.put(url).body(data.slice(start..end))).await?;
                part += 1;
            }
            upload_key = Some(signed.upload_key);
        }

        let Some(upload_key) = upload_key else {
            return Err(ServiceError::Decode {
                service: OSS,
                message: "no upload key issued".into(),
            });
        };
        let complete = self
            .authorized(
                self.http
                    .post(self.object_url(container, name)?)
                    .json(&serde_json::json!({ "uploadKey": upload_key })),
            )
            .await?;
        let details: ObjectDetails = decode(OSS, send(OSS, complete).await?).await?;
        Ok(details.into())
    }
}

#[async_trait]
impl TranslationService for ApsClient {
    async fn start_job(
        &self,
        source: &ModelIdentifier,
        root_file: Option<&str>,
    ) -> Result<JobHandle, ServiceError> {
        let request = self
            .authorized(
                self.http
                    .post(self.endpoint(DERIVATIVE, &["modelderivative", "v2", "designdata", "job"])?)
                    .json(&job_payload(source, root_file)),
            )
            .await?;
        let job: JobResponse = decode(DERIVATIVE, send(DERIVATIVE, request).await?).await?;
        let urn = ModelIdentifier::new(job.urn).map_err(|e| ServiceError::Decode {
            service: DERIVATIVE,
            message: e.to_string(),
        })?;
        Ok(JobHandle {
            urn,
            result: job.result,
        })
    }

    async fn get_manifest(&self, id: &ModelIdentifier) -> Result<Option<Manifest>, ServiceError> {
        let request = self
            .authorized(self.http.get(self.endpoint(
                DERIVATIVE,
                &["modelderivative", "v2", "designdata", id.as_str(), "manifest"],
            )?))
            .await?;
        match send(DERIVATIVE, request).await {
            Ok(response) => decode(DERIVATIVE, response).await.map(Some),
            Err(err) if err.status() == Some(StatusCode::NOT_FOUND.as_u16()) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode as HttpStatus, Uri};
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, OnceLock};

    type Log<T> = std::sync::Mutex<Vec<T>>;

    #[derive(Default)]
    struct FakeAps {
        root: OnceLock<String>,
        tokens: AtomicUsize,
        bucket_created: std::sync::Mutex<bool>,
        signed_paths: Log<String>,
        signed_queries: Log<HashMap<String, String>>,
        parts: Log<(usize, Bytes)>,
        completions: Log<Value>,
        listings: Log<HashMap<String, String>>,
        jobs: Log<Value>,
    }

    async fn token(State(aps): State<Arc<FakeAps>>) -> Json<Value> {
        aps.tokens.fetch_add(1, Ordering::SeqCst);
        Json(json!({ "access_token": "tok", "token_type": "Bearer", "expires_in": 3599 }))
    }

    async fn details(State(aps): State<Arc<FakeAps>>, headers: HeaderMap) -> HttpStatus {
        assert_eq!(headers["authorization"], "Bearer tok");
        if *aps.bucket_created.lock().unwrap() {
            HttpStatus::OK
        } else {
            HttpStatus::NOT_FOUND
        }
    }

    async fn create(
        State(aps): State<Arc<FakeAps>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> HttpStatus {
        assert_eq!(headers["x-ads-region"], "US");
        assert_eq!(body["policyKey"], "persistent");
        *aps.bucket_created.lock().unwrap() = true;
        HttpStatus::OK
    }

    /// Two pages: "a.rvt" then, from `startAt=b.rvt`, "b.rvt".
    async fn objects(
        State(aps): State<Arc<FakeAps>>,
        Path(bucket): Path<String>,
        Query(query): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        let start_at = query.get("startAt").cloned();
        aps.listings.lock().unwrap().push(query);
        let object = |key: &str| json!({ "objectKey": key, "objectId": format!("urn:adsk.objects:os.object:{bucket}/{key}") });
        match start_at.as_deref() {
            None => Json(json!({
                "items": [object("a.rvt")],
                "next": format!("{}/oss/v2/buckets/{bucket}/objects?startAt=b.rvt&limit=64", aps.root.get().unwrap()),
            })),
            Some(_) => Json(json!({ "items": [object("b.rvt")] })),
        }
    }

    async fn signed(
        State(aps): State<Arc<FakeAps>>,
        uri: Uri,
        Query(query): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        let first: usize = query["firstPart"].parse().unwrap();
        let parts: usize = query["parts"].parse().unwrap();
        aps.signed_paths.lock().unwrap().push(uri.path().to_string());
        aps.signed_queries.lock().unwrap().push(query);
        let root = aps.root.get().unwrap();
        let urls: Vec<String> = (first..first + parts).map(|part| format!("{root}/s3/{part}")).collect();
        Json(json!({ "uploadKey": "upload-1", "urls": urls }))
    }

    async fn put_part(State(aps): State<Arc<FakeAps>>, Path(part): Path<usize>, body: Bytes) -> HttpStatus {
        aps.parts.lock().unwrap().push((part, body));
        HttpStatus::OK
    }

    async fn complete(
        State(aps): State<Arc<FakeAps>>,
        Path((bucket, key)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        aps.completions.lock().unwrap().push(body);
        Json(json!({ "objectKey": key, "objectId": format!("urn:adsk.objects:os.object:{bucket}/{key}") }))
    }

    async fn job(State(aps): State<Arc<FakeAps>>, Json(body): Json<Value>) -> Json<Value> {
        let urn = body["input"]["urn"].clone();
        aps.jobs.lock().unwrap().push(body);
        Json(json!({ "result": "created", "urn": urn }))
    }

    async fn manifest(Path(urn): Path<String>) -> Result<Json<Value>, HttpStatus> {
        if urn == "missing" {
            return Err(HttpStatus::NOT_FOUND);
        }
        Ok(Json(json!({ "urn": urn, "status": "inprogress", "progress": "25% complete" })))
    }

    async fn fake_aps() -> (String, Arc<FakeAps>) {
        let aps = Arc::new(FakeAps::default());
        let app = Router::new()
            .route("/authentication/v2/token", post(token))
            .route("/oss/v2/buckets/:bucket/details", get(details))
            .route("/oss/v2/buckets", post(create))
            .route("/oss/v2/buckets/:bucket/objects", get(objects))
            .route(
                "/oss/v2/buckets/:bucket/objects/:key/signeds3upload",
                get(signed).post(complete),
            )
            .route("/s3/:part", put(put_part))
            .route("/modelderivative/v2/designdata/job", post(job))
            .route("/modelderivative/v2/designdata/:urn/manifest", get(manifest))
            .with_state(Arc::clone(&aps));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let root = format!("http://{}", listener.local_addr().unwrap());
        aps.root.set(root.clone()).unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (root, aps)
    }

    fn client(root: &str) -> ApsClient {
        ApsClient::new(Url::parse(root).unwrap(), "id", "secret")
    }

    #[tokio::test]
    async fn test_bucket_created_once_with_cached_token() {
        let (root, aps) = fake_aps().await;
        let client = client(&root);

        client.ensure_container("models").await.unwrap();
        client.ensure_container("models").await.unwrap();

        assert!(*aps.bucket_created.lock().unwrap());
        assert_eq!(aps.tokens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_manifest_not_found_is_none() {
        let (root, _aps) = fake_aps().await;
        let client = client(&root);

        let missing = ModelIdentifier::new("missing").unwrap();
        assert!(client.get_manifest(&missing).await.unwrap().is_none());

        let urn = ModelIdentifier::new("dXJuOjE").unwrap();
        let manifest = client.get_manifest(&urn).await.unwrap().unwrap();
        assert_eq!(manifest.progress.as_deref(), Some("25% complete"));
    }

    #[tokio::test]
    async fn test_viewer_token_is_fresh_per_call() {
        let (root, aps) = fake_aps().await;
        let client = client(&root);

        client.issue_token(Scope::VIEWER).await.unwrap();
        let token = client.issue_token(Scope::VIEWER).await.unwrap();
        assert_eq!(token.expires_in, 3599);
        assert_eq!(aps.tokens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_put_object_in_signed_batches() {
        let (root, aps) = fake_aps().await;
        let client = client(&root).with_chunk_size(4);
        // 27 parts, the last one two bytes short.
        let data = Bytes::from((0..106u8).collect::<Vec<u8>>());

        let object = client
            .put_object("models", "My House v2.rvt", data.clone())
            .await
            .unwrap();
        assert_eq!(object.key, "My House v2.rvt");
        assert_eq!(object.id, "urn:adsk.objects:os.object:models/My House v2.rvt");

        let paths = aps.signed_paths.lock().unwrap().clone();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0], "/oss/v2/buckets/models/objects/My%20House%20v2.rvt/signeds3upload");

        let queries = aps.signed_queries.lock().unwrap().clone();
        assert_eq!(queries[0]["firstPart"], "1");
        assert_eq!(queries[0]["parts"], "25");
        assert!(!queries[0].contains_key("uploadKey"));
        assert_eq!(queries[1]["firstPart"], "26");
        assert_eq!(queries[1]["parts"], "2");
        assert_eq!(queries[1]["uploadKey"], "upload-1");

        let parts = aps.parts.lock().unwrap().clone();
        assert_eq!(parts.iter().map(|(n, _)| *n).collect::<Vec<_>>(), (1..=27).collect::<Vec<_>>());
        assert_eq!(parts[26].1.len(), 2);
        let uploaded: Vec<u8> = parts.iter().flat_map(|(_, chunk)| chunk.to_vec()).collect();
        assert_eq!(uploaded, data.to_vec());

        assert_eq!(*aps.completions.lock().unwrap(), vec![json!({ "uploadKey": "upload-1" })]);
    }

    #[tokio::test]
    async fn test_empty_object_is_one_part() {
        let (root, aps) = fake_aps().await;
        let client = client(&root);

        client.put_object("models", "empty.rvt", Bytes::new()).await.unwrap();

        assert_eq!(aps.signed_queries.lock().unwrap()[0]["parts"], "1");
        assert_eq!(aps.parts.lock().unwrap().len(), 1);
        assert_eq!(aps.completions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_page_follows_next_cursor() {
        let (root, aps) = fake_aps().await;
        let client = client(&root);

        let first = client.list_page("models", None).await.unwrap();
        assert_eq!(first.items[0].key, "a.rvt");
        assert_eq!(first.next.as_deref(), Some("b.rvt"));

        let second = client.list_page("models", first.next.as_deref()).await.unwrap();
        assert_eq!(second.items[0].key, "b.rvt");
        assert_eq!(second.next, None);

        let listings = aps.listings.lock().unwrap().clone();
        assert_eq!(listings[0]["limit"], LIST_PAGE_SIZE.to_string());
        assert!(!listings[0].contains_key("startAt"));
        assert_eq!(listings[1]["startAt"], "b.rvt");
    }

    #[tokio::test]
    async fn test_start_job_posts_svf2_request() {
        let (root, aps) = fake_aps().await;
        let client = client(&root);
        let urn = ModelIdentifier::new("dXJuOjE").unwrap();

        let job = client.start_job(&urn, Some("main.rvt")).await.unwrap();
        assert_eq!(job.urn, urn);
        assert_eq!(job.result, "created");

        let jobs = aps.jobs.lock().unwrap().clone();
        assert_eq!(jobs, vec![job_payload(&urn, Some("main.rvt"))]);
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = client("http://localhost:9000/aps/");
        assert_eq!(
            client.endpoint(OSS, &["oss", "v2", "buckets", "b/c"]).unwrap().as_str(),
            "http://localhost:9000/aps/oss/v2/buckets/b%2Fc"
        );
    }

    #[test]
    fn test_job_payload() {
        let urn = ModelIdentifier::new("dXJuOjE").unwrap();
        let plain = job_payload(&urn, None);
        assert_eq!(plain["input"], json!({ "urn": "dXJuOjE" }));
        assert_eq!(plain["output"]["formats"][0]["type"], "svf2");

        let archive = job_payload(&urn, Some("main.rvt"));
        assert_eq!(archive["input"]["compressedUrn"], true);
        assert_eq!(archive["input"]["rootFilename"], "main.rvt");
    }

    #[test]
    fn test_start_at_from_next() {
        assert_eq!(
            start_at_from_next(
                "https://developer.api.autodesk.com/oss/v2/buckets/b/objects?startAt=house.rvt&limit=64"
            )
            .as_deref(),
            Some("house.rvt")
        );
        assert_eq!(start_at_from_next("https://example.com/objects?limit=64"), None);
    }

    #[test]
    fn test_part_count() {
        assert_eq!(part_count(0, UPLOAD_CHUNK_SIZE), 1);
        assert_eq!(part_count(UPLOAD_CHUNK_SIZE, UPLOAD_CHUNK_SIZE), 1);
        assert_eq!(part_count(UPLOAD_CHUNK_SIZE + 1, UPLOAD_CHUNK_SIZE), 2);
    }
}
