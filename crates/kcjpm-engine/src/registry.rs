//! Registry dependency acquisition over an injected HTTP transport.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use kcjpm_config::manifest::DependencySpec;

use crate::cache::CacheSlot;
use crate::error::EngineError;
use crate::fetch::{DependencyFetcher, FetchContext, FetchMode, Fetched};

/// A plain HTTP response; non-2xx statuses are returned, not raised.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// A transport-level failure (DNS, connect, timeout).
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HttpError {
    pub message: String,
}

/// The transport capability: the engine never opens sockets directly.
pub trait HttpClient: std::fmt::Debug + Send + Sync {
    /// Perform a GET request.
    ///
    /// # Errors
    /// Returns an error only for transport failures; HTTP error statuses are
    /// reported through [`HttpResponse::status`].
    fn get(&self, url: &str) -> Result<HttpResponse, HttpError>;
}

/// The default `ureq`-backed client.
#[derive(Debug)]
pub struct UreqClient {
    agent: ureq::Agent,
}

impl Default for UreqClient {
    fn default() -> Self {
        let agent = ureq::Agent::new_with_config(
            ureq::config::Config::builder()
                .timeout_connect(Some(std::time::Duration::from_secs(30)))
                .timeout_global(Some(std::time::Duration::from_secs(600)))
                .http_status_as_error(false)
                .build(),
        );
        Self { agent }
    }
}

impl HttpClient for UreqClient {
    fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        let response = self.agent.get(url).call().map_err(|e| HttpError {
            message: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let mut body = Vec::new();
        std::io::Read::read_to_end(&mut response.into_body().as_reader(), &mut body).map_err(
            |e| HttpError {
                message: e.to_string(),
            },
        )?;
        Ok(HttpResponse { status, body })
    }
}

/// The package metadata document served by a registry at
/// `<registry>/api/v1/packages/<name>/<version>`.
#[derive(Debug, Deserialize)]
struct PackageMetadata {
    name: String,
    version: String,
    archive_url: String,
    #[serde(default)]
    checksum: Option<String>,
}

/// Fetches registry dependencies into `cache/registry/<name>/<version>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryFetcher;

impl DependencyFetcher for RegistryFetcher {
    fn supports(&self, spec: &DependencySpec) -> bool {
        matches!(spec, DependencySpec::Registry { .. })
    }

    fn fetch(
        &self,
        name: &str,
        spec: &DependencySpec,
        _parent_root: &Path,
        ctx: &FetchContext<'_>,
    ) -> Result<Fetched, EngineError> {
        let DependencySpec::Registry {
            version, registry, ..
        } = spec
        else {
            return Err(EngineError::DependencyNotFound {
                name: name.to_owned(),
                location: "<not a registry dependency>".to_owned(),
            });
        };

        let slot = CacheSlot::new(ctx.cache_root.join("registry").join(name).join(version));

        if ctx.mode == FetchMode::Install {
            // Fast path: a completed slot is reusable without touching the
            // network or the lock.
            if slot.is_complete() {
                return Ok(Fetched {
                    location: slot.dir().to_path_buf(),
                    resolved_commit: None,
                    checksum: slot.completion_note(),
                    registry_url: Some(registry.clone()),
                });
            }
        }

        let metadata = fetch_metadata(name, version, registry, ctx)?;

        if ctx.mode == FetchMode::Validate {
            return Ok(Fetched {
                location: slot.dir().to_path_buf(),
                resolved_commit: None,
                checksum: None,
                registry_url: Some(registry.clone()),
            });
        }

        let _lock = slot.lock()?;
        if slot.is_complete() {
            // Another process populated the slot while we fetched metadata.
            return Ok(Fetched {
                location: slot.dir().to_path_buf(),
                resolved_commit: None,
                checksum: slot.completion_note(),
                registry_url: Some(registry.clone()),
            });
        }

        let checksum = download_and_extract(name, registry, &metadata, &slot, ctx)?;
        Ok(Fetched {
            location: slot.dir().to_path_buf(),
            resolved_commit: None,
            checksum: Some(checksum),
            registry_url: Some(registry.clone()),
        })
    }
}

fn fetch_metadata(
    name: &str,
    version: &str,
    registry: &str,
    ctx: &FetchContext<'_>,
) -> Result<PackageMetadata, EngineError> {
    let metadata_url = format!(
        "{}/api/v1/packages/{name}/{version}",
        registry.trim_end_matches('/')
    );

    let response = ctx
        .http
        .get(&metadata_url)
        .map_err(|e| registry_unreachable(registry, &e.to_string()))?;

    match response.status {
        404 => {
            return Err(EngineError::DependencyNotFound {
                name: name.to_owned(),
                location: metadata_url,
            })
        }
        200..=299 => {}
        status => {
            return Err(registry_unreachable(
                registry,
                &format!("registry returned HTTP {status}"),
            ))
        }
    }

    let metadata: PackageMetadata = serde_json::from_slice(&response.body)
        .map_err(|e| registry_unreachable(registry, &format!("invalid package metadata: {e}")))?;
    if metadata.name != name || metadata.version != version {
        return Err(registry_unreachable(
            registry,
            &format!(
                "metadata mismatch: asked for {name}@{version}, got {}@{}",
                metadata.name, metadata.version
            ),
        ));
    }
    Ok(metadata)
}

fn download_and_extract(
    name: &str,
    registry: &str,
    metadata: &PackageMetadata,
    slot: &CacheSlot,
    ctx: &FetchContext<'_>,
) -> Result<String, EngineError> {
    let response = ctx
        .http
        .get(&metadata.archive_url)
        .map_err(|e| registry_unreachable(registry, &e.to_string()))?;
    if !(200..=299).contains(&response.status) {
        return Err(registry_unreachable(
            registry,
            &format!(
                "archive download returned HTTP {} for {}",
                response.status, metadata.archive_url
            ),
        ));
    }

    let actual = kcjpm_util::hash::sha256_hex(&response.body);
    if let Some(advertised) = &metadata.checksum {
        let expected = advertised.strip_prefix("sha256:").unwrap_or(advertised);
        if expected != actual {
            return Err(EngineError::ChecksumMismatch {
                name: name.to_owned(),
                expected: expected.to_owned(),
                actual,
            });
        }
    }

    let staging = slot.staging_dir();
    ctx.fs.remove_dir_all(&staging)?;
    ctx.fs.create_dirs(&staging)?;

    let decoder = flate2::read::GzDecoder::new(response.body.as_slice());
    tar::Archive::new(decoder)
        .unpack(&staging)
        .map_err(|source| EngineError::Io {
            path: staging.display().to_string(),
            source,
        })?;

    let content_root = archive_content_root(&staging)?;
    slot.commit_from(&content_root, &actual)?;
    ctx.fs.remove_dir_all(&staging)?;

    Ok(actual)
}

/// Archives may nest their content one directory deep
/// (`<name>-<version>/...`); find the directory holding the manifest.
fn archive_content_root(staging: &Path) -> Result<PathBuf, EngineError> {
    let has_manifest =
        |dir: &Path| dir.join("kcjpm.toml").is_file() || dir.join("cjpm.toml").is_file();
    if has_manifest(staging) {
        return Ok(staging.to_path_buf());
    }

    let entries = std::fs::read_dir(staging)
        .map_err(|source| EngineError::Io {
            path: staging.display().to_string(),
            source,
        })?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .collect::<Vec<_>>();

    match entries.as_slice() {
        [single] if single.is_dir() => Ok(single.clone()),
        _ => Ok(staging.to_path_buf()),
    }
}

fn registry_unreachable(url: &str, message: &str) -> EngineError {
    EngineError::RegistryUnreachable {
        url: url.to_owned(),
        message: message.to_owned(),
    }
}
