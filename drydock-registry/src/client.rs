//! Container-registry v2 (OCI) client.
//!
//! Implements the [`ArtifactStore`] contract against a standard
//! registry v2 HTTP API: tag listing with `Link` pagination,
//! manifest/blob push and pull, digest-addressed deletion, and the
//! bearer-token authentication sub-protocol.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LINK, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

use drydock_manifest::{Manifest, Version};

use crate::auth::{BearerChallenge, Credentials, TokenCache, TokenResponse};
use crate::error::{StorageError, StorageResult};
use crate::store::{ArtifactStore, PulledArtifact};

/// Media type of the OCI image manifest envelope.
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Media type of the migration manifest stored as the config blob.
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.drydock.manifest.v1+json";

/// Media type of the artifact archive stored as the single layer.
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.drydock.artifact.v1.tar+gzip";

/// Response header carrying a manifest's content digest.
const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size requested when listing tags.
const TAG_PAGE_SIZE: u32 = 100;

/// A content descriptor in an OCI manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OciDescriptor {
    #[serde(rename = "mediaType")]
    media_type: String,
    digest: String,
    size: u64,
}

/// The OCI image manifest envelope wrapping one artifact.
#[derive(Debug, Serialize, Deserialize)]
struct OciManifest {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    #[serde(rename = "mediaType")]
    media_type: String,
    config: OciDescriptor,
    layers: Vec<OciDescriptor>,
}

/// Body of `GET /v2/{repo}/tags/list`.
#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Compute the registry digest of a blob (`sha256:...`).
pub fn content_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Builder for [`RegistryClient`].
#[derive(Debug, Clone)]
pub struct RegistryClientBuilder {
    base: String,
    repository: String,
    credentials: Option<Credentials>,
    credential_store: HashMap<String, Credentials>,
    timeout: Duration,
}

impl RegistryClientBuilder {
    /// Start a builder for the given registry base URL and repository.
    pub fn new(base: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            repository: repository.into(),
            credentials: None,
            credential_store: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set explicit credentials. These take precedence over the
    /// credential store.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Add a stored credential for a registry hostname, consulted when
    /// no explicit credentials were supplied.
    pub fn stored_credential(
        mut self,
        host: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        self.credential_store.insert(host.into(), credentials);
        self
    }

    /// Set the fixed request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the client.
    pub fn build(self) -> StorageResult<RegistryClient> {
        let base = Url::parse(self.base.trim_end_matches('/'))
            .map_err(|e| StorageError::InvalidReference(format!("{}: {e}", self.base)))?;
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(StorageError::from_reqwest)?;
        Ok(RegistryClient {
            http,
            base,
            repository: self.repository,
            credentials: self.credentials,
            credential_store: self.credential_store,
            tokens: TokenCache::new(),
        })
    }
}

/// Client for a single repository in a registry v2 API.
pub struct RegistryClient {
    http: reqwest::Client,
    base: Url,
    repository: String,
    credentials: Option<Credentials>,
    credential_store: HashMap<String, Credentials>,
    tokens: TokenCache,
}

impl RegistryClient {
    /// Start building a client.
    pub fn builder(
        base: impl Into<String>,
        repository: impl Into<String>,
    ) -> RegistryClientBuilder {
        RegistryClientBuilder::new(base, repository)
    }

    /// The repository this client addresses.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/{}/{path}", self.base.as_str().trim_end_matches('/'), self.repository)
    }

    /// Resolve credentials: explicit first, then the credential store
    /// keyed by registry hostname, then anonymous.
    fn resolve_credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref().or_else(|| {
            self.base
                .host_str()
                .and_then(|host| self.credential_store.get(host))
        })
    }

    /// Exchange credentials for a bearer token at the challenge realm,
    /// consulting the cache first.
    async fn token_for(&self, challenge: &BearerChallenge) -> StorageResult<String> {
        if let Some(token) = self.tokens.get(challenge) {
            return Ok(token);
        }

        debug!(realm = %challenge.realm, "exchanging credentials for bearer token");
        let mut request = self.http.get(challenge.token_url());
        if let Some(creds) = self.resolve_credentials() {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request.send().await.map_err(StorageError::from_reqwest)?;
        if !response.status().is_success() {
            return Err(StorageError::auth(format!(
                "token endpoint returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let body: TokenResponse = response.json().await.map_err(StorageError::from_reqwest)?;
        let token = body
            .token()
            .ok_or_else(|| StorageError::auth("token endpoint returned no token"))?
            .to_string();
        self.tokens.insert(challenge, &token, body.expires_in());
        Ok(token)
    }

    /// Send a request, handling a single 401 bearer challenge by
    /// exchanging credentials and retrying once. A second 401 is a
    /// terminal authentication failure.
    async fn send(&self, request: reqwest::RequestBuilder) -> StorageResult<Response> {
        let retry = request.try_clone();
        let response = request.send().await.map_err(StorageError::from_reqwest)?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(BearerChallenge::parse)
            .ok_or_else(|| StorageError::auth("401 without a bearer challenge"))?;

        let token = self.token_for(&challenge).await?;
        let retry = retry
            .ok_or_else(|| StorageError::auth("cannot retry non-clonable request"))?
            .bearer_auth(token);

        let response = retry.send().await.map_err(StorageError::from_reqwest)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(StorageError::auth(
                "authentication failed after token exchange",
            ));
        }
        Ok(response)
    }

    /// Surface a non-success response as a registry error carrying the
    /// status and body.
    async fn registry_error(&self, response: Response) -> StorageError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        StorageError::Registry { status, body }
    }

    /// Upload a blob via the two-step upload flow, returning its digest.
    async fn upload_blob(&self, bytes: &[u8]) -> StorageResult<String> {
        let digest = content_digest(bytes);

        let initiate = self
            .send(self.http.request(Method::POST, self.url("blobs/uploads/")))
            .await?;
        if initiate.status() != StatusCode::ACCEPTED {
            return Err(self.registry_error(initiate).await);
        }

        let location = initiate
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                StorageError::InvalidReference("blob upload returned no location".into())
            })?;
        let upload_url = self
            .base
            .join(location)
            .map_err(|e| StorageError::InvalidReference(e.to_string()))?;

        let sep = if upload_url.query().is_some() { '&' } else { '?' };
        let put_url = format!("{upload_url}{sep}digest={digest}");

        let response = self
            .send(
                self.http
                    .put(put_url)
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(bytes.to_vec()),
            )
            .await?;
        if response.status() != StatusCode::CREATED && !response.status().is_success() {
            return Err(self.registry_error(response).await);
        }

        Ok(digest)
    }

    /// Fetch a blob by digest and verify its content.
    async fn fetch_blob(&self, digest: &str) -> StorageResult<Vec<u8>> {
        let response = self
            .send(self.http.get(self.url(&format!("blobs/{digest}"))))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::not_found(format!("blob {digest}")));
        }
        if !response.status().is_success() {
            return Err(self.registry_error(response).await);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(StorageError::from_reqwest)?
            .to_vec();
        let actual = content_digest(&bytes);
        if actual != digest {
            return Err(StorageError::DigestMismatch {
                reference: digest.to_string(),
                expected: digest.to_string(),
                actual,
            });
        }
        Ok(bytes)
    }

    /// Fetch the OCI envelope for a tag. `None` when the tag is absent.
    async fn fetch_oci_manifest(&self, tag: &str) -> StorageResult<Option<OciManifest>> {
        let response = self
            .send(
                self.http
                    .get(self.url(&format!("manifests/{tag}")))
                    .header(ACCEPT, OCI_MANIFEST_MEDIA_TYPE),
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.registry_error(response).await);
        }
        let manifest: OciManifest =
            response.json().await.map_err(StorageError::from_reqwest)?;
        Ok(Some(manifest))
    }

    /// Resolve a tag to its content digest via a manifest probe.
    /// `None` when the tag does not exist.
    async fn resolve_digest(&self, tag: &str) -> StorageResult<Option<String>> {
        let response = self
            .send(
                self.http
                    .head(self.url(&format!("manifests/{tag}")))
                    .header(ACCEPT, OCI_MANIFEST_MEDIA_TYPE),
            )
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let digest = response
                    .headers()
                    .get(DOCKER_CONTENT_DIGEST)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
                    .ok_or_else(|| {
                        StorageError::InvalidReference(format!(
                            "registry returned no content digest for tag {tag}"
                        ))
                    })?;
                Ok(Some(digest))
            }
            _ => Err(self.registry_error(response).await),
        }
    }
}

/// Extract the `rel="next"` URI from a `Link` response header.
pub(crate) fn parse_next_link(header: &str) -> Option<&str> {
    for part in header.split(',') {
        let part = part.trim();
        let Some(rest) = part.strip_prefix('<') else {
            continue;
        };
        let Some((uri, params)) = rest.split_once('>') else {
            continue;
        };
        if params.contains("rel=\"next\"") || params.contains("rel=next") {
            return Some(uri);
        }
    }
    None
}

#[async_trait]
impl ArtifactStore for RegistryClient {
    async fn push(
        &self,
        version: &Version,
        artifact: &[u8],
        manifest: &Manifest,
    ) -> StorageResult<String> {
        let tag = version.tag();
        info!(%version, repository = %self.repository, "pushing artifact");

        let config_bytes = serde_json::to_vec(manifest)?;
        let config_digest = self.upload_blob(&config_bytes).await?;
        let layer_digest = self.upload_blob(artifact).await?;

        let oci = OciManifest {
            schema_version: 2,
            media_type: OCI_MANIFEST_MEDIA_TYPE.to_string(),
            config: OciDescriptor {
                media_type: CONFIG_MEDIA_TYPE.to_string(),
                digest: config_digest,
                size: config_bytes.len() as u64,
            },
            layers: vec![OciDescriptor {
                media_type: LAYER_MEDIA_TYPE.to_string(),
                digest: layer_digest,
                size: artifact.len() as u64,
            }],
        };

        let response = self
            .send(
                self.http
                    .put(self.url(&format!("manifests/{tag}")))
                    .header(CONTENT_TYPE, OCI_MANIFEST_MEDIA_TYPE)
                    .body(serde_json::to_vec(&oci)?),
            )
            .await?;
        if !response.status().is_success() {
            return Err(self.registry_error(response).await);
        }

        let location = format!(
            "{}/{}:{tag}",
            self.base.host_str().unwrap_or_default(),
            self.repository
        );
        debug!(%location, "artifact pushed");
        Ok(location)
    }

    async fn pull(&self, version: &Version) -> StorageResult<PulledArtifact> {
        let tag = version.tag();
        debug!(%version, repository = %self.repository, "pulling artifact");

        let oci = self
            .fetch_oci_manifest(&tag)
            .await?
            .ok_or_else(|| StorageError::not_found(format!("version {version}")))?;

        let manifest_bytes = self.fetch_blob(&oci.config.digest).await?;
        let manifest: Manifest = serde_json::from_slice(&manifest_bytes)?;

        let layer = oci.layers.first().ok_or_else(|| {
            StorageError::InvalidReference(format!("manifest for {tag} has no layers"))
        })?;
        let artifact = self.fetch_blob(&layer.digest).await?;

        Ok(PulledArtifact { artifact, manifest })
    }

    async fn exists(&self, version: &Version) -> StorageResult<bool> {
        Ok(self.resolve_digest(&version.tag()).await?.is_some())
    }

    async fn list(&self) -> StorageResult<Vec<Version>> {
        let mut tags: Vec<String> = Vec::new();
        let mut next = format!("{}?n={TAG_PAGE_SIZE}", self.url("tags/list"));

        loop {
            let response = self.send(self.http.get(&next)).await?;
            if response.status() == StatusCode::NOT_FOUND {
                // Repository does not exist yet.
                return Ok(Vec::new());
            }
            if !response.status().is_success() {
                return Err(self.registry_error(response).await);
            }

            let link = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_next_link)
                .map(String::from);

            let body: TagList = response.json().await.map_err(StorageError::from_reqwest)?;
            tags.extend(body.tags.unwrap_or_default());

            match link {
                Some(uri) => {
                    next = self
                        .base
                        .join(&uri)
                        .map_err(|e| StorageError::InvalidReference(e.to_string()))?
                        .to_string();
                }
                None => break,
            }
        }

        let mut versions: Vec<Version> = tags
            .iter()
            .filter_map(|tag| Version::parse_tag(tag).ok())
            .collect();
        versions.sort();
        debug!(count = versions.len(), "listed versions");
        Ok(versions)
    }

    async fn delete(&self, version: &Version) -> StorageResult<()> {
        let tag = version.tag();

        // Registries require digest-addressed deletion, so resolve the
        // tag first.
        let Some(digest) = self.resolve_digest(&tag).await? else {
            debug!(%version, "tag already absent, nothing to delete");
            return Ok(());
        };

        let response = self
            .send(self.http.delete(self.url(&format!("manifests/{digest}"))))
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => {}
            StatusCode::METHOD_NOT_ALLOWED => {
                return Err(StorageError::Unsupported(format!(
                    "registry does not allow manifest deletion (tag {tag})"
                )));
            }
            StatusCode::FORBIDDEN => {
                return Err(StorageError::Forbidden(format!(
                    "not permitted to delete {tag}"
                )));
            }
            status if status.is_success() => {}
            _ => return Err(self.registry_error(response).await),
        }

        // Deletion is complete only once the tag stops resolving.
        if self.resolve_digest(&tag).await?.is_some() {
            warn!(%version, "tag still resolvable after delete");
            return Err(StorageError::DeleteVerification(format!(
                "tag {tag} still resolves after deletion"
            )));
        }

        info!(%version, "artifact deleted");
        Ok(())
    }

    async fn get_manifest(&self, version: &Version) -> StorageResult<Manifest> {
        let tag = version.tag();
        let oci = self
            .fetch_oci_manifest(&tag)
            .await?
            .ok_or_else(|| StorageError::not_found(format!("version {version}")))?;
        let manifest_bytes = self.fetch_blob(&oci.config.digest).await?;
        Ok(serde_json::from_slice(&manifest_bytes)?)
    }
}
