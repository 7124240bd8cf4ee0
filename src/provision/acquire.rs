//! Upstream artifact resolution.
//!
//! Maps (variant, version) to a concrete download URL by asking the
//! distribution's own metadata service. Every base URL is configurable
//! so tests can point the resolver at a local mock server. Resolution
//! never downloads the artifact itself; the fetch happens on the remote
//! host.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::ServerVariant;

/// Default upstream endpoints.
const MOJANG_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";
const PAPER_API_URL: &str = "https://api.papermc.io/v2";
const PURPUR_API_URL: &str = "https://api.purpurmc.org/v2";
const FABRIC_META_URL: &str = "https://meta.fabricmc.net/v2";
const FORGE_PROMOTIONS_URL: &str =
    "https://files.minecraftforge.net/net/minecraftforge/forge/promotions_slim.json";
const FORGE_MAVEN_URL: &str = "https://maven.minecraftforge.net";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_DELAY_MS: u64 = 250;

/// Configuration for the artifact resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Mojang launcher version manifest
    pub mojang_manifest_url: String,
    /// Paper builds API base
    pub paper_api_url: String,
    /// Purpur download API base
    pub purpur_api_url: String,
    /// Fabric loader meta service base
    pub fabric_meta_url: String,
    /// Forge promotions document
    pub forge_promotions_url: String,
    /// Forge maven repository base
    pub forge_maven_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Retries on transient upstream failures
    pub max_retries: u32,
    /// Delay between retries
    pub retry_delay: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            mojang_manifest_url: MOJANG_MANIFEST_URL.to_string(),
            paper_api_url: PAPER_API_URL.to_string(),
            purpur_api_url: PURPUR_API_URL.to_string(),
            fabric_meta_url: FABRIC_META_URL.to_string(),
            forge_promotions_url: FORGE_PROMOTIONS_URL.to_string(),
            forge_maven_url: FORGE_MAVEN_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            user_agent: format!("craftops/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ResolverConfig {
    /// Points every base URL at one server. Test helper for mock servers.
    pub fn with_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            mojang_manifest_url: format!("{base}/mc/game/version_manifest_v2.json"),
            paper_api_url: format!("{base}/paper-api"),
            purpur_api_url: format!("{base}/purpur-api"),
            fabric_meta_url: format!("{base}/fabric-meta"),
            forge_promotions_url: format!("{base}/forge/promotions_slim.json"),
            forge_maven_url: format!("{base}/forge-maven"),
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// A resolved download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    /// Where the remote host downloads from
    pub url: String,
    /// True when the download is an installer to run, not a server jar
    pub installer: bool,
}

/// Resolves (variant, version) pairs to download URLs.
pub struct ArtifactResolver {
    client: Client,
    config: ResolverConfig,
}

impl ArtifactResolver {
    /// Creates a resolver against the real upstream services.
    pub fn new() -> Result<Self> {
        Self::with_config(ResolverConfig::default())
    }

    /// Creates a resolver with custom endpoints.
    pub fn with_config(config: ResolverConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Resolves the download for a variant and version.
    pub async fn resolve(
        &self,
        variant: ServerVariant,
        version: &str,
    ) -> Result<ResolvedArtifact> {
        let artifact = match variant {
            ServerVariant::Vanilla => ResolvedArtifact {
                url: self.resolve_vanilla(version).await?,
                installer: false,
            },
            ServerVariant::Paper => ResolvedArtifact {
                url: self.resolve_paper(version).await?,
                installer: false,
            },
            ServerVariant::Purpur => ResolvedArtifact {
                url: format!(
                    "{}/purpur/{version}/latest/download",
                    self.config.purpur_api_url
                ),
                installer: false,
            },
            ServerVariant::Fabric => ResolvedArtifact {
                url: self.resolve_fabric(version).await?,
                installer: false,
            },
            ServerVariant::Forge => ResolvedArtifact {
                url: self.resolve_forge(version).await?,
                installer: true,
            },
        };

        // The URL ends up inside a quoted shell command on the remote
        // host; anything that does not parse as http(s) stops here.
        let parsed = url::Url::parse(&artifact.url).map_err(|e| {
            Error::DownloadFailed(format!("resolved URL '{}' is invalid: {e}", artifact.url))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::DownloadFailed(format!(
                "resolved URL '{}' has unsupported scheme '{}'",
                artifact.url,
                parsed.scheme()
            )));
        }

        info!(%variant, version, url = %artifact.url, "Resolved server artifact");
        Ok(artifact)
    }

    /// Two-step manifest lookup: the version index, then the version
    /// document carrying the server jar URL.
    async fn resolve_vanilla(&self, version: &str) -> Result<String> {
        let manifest: VersionManifest = self.get_json(&self.config.mojang_manifest_url).await?;
        let entry = manifest
            .versions
            .into_iter()
            .find(|v| v.id == version)
            .ok_or_else(|| {
                Error::DownloadFailed(format!("unknown vanilla version '{version}'"))
            })?;

        let document: VersionDocument = self.get_json(&entry.url).await?;
        document
            .downloads
            .server
            .map(|d| d.url)
            .ok_or_else(|| {
                Error::DownloadFailed(format!(
                    "vanilla version '{version}' offers no server download"
                ))
            })
    }

    /// Builds-API lookup for the latest build of a version. The build
    /// number is not pinned anywhere; it is logged here so a provisioning
    /// run can be traced to the exact artifact.
    async fn resolve_paper(&self, version: &str) -> Result<String> {
        let url = format!(
            "{}/projects/paper/versions/{version}/builds",
            self.config.paper_api_url
        );
        let builds: PaperBuilds = self.get_json(&url).await?;
        let latest = pick_latest_build(builds.builds).ok_or_else(|| {
            Error::DownloadFailed(format!("no paper builds for version '{version}'"))
        })?;

        info!(version, build = latest.build, "Using latest paper build");
        Ok(format!(
            "{}/projects/paper/versions/{version}/builds/{}/downloads/{}",
            self.config.paper_api_url, latest.build, latest.downloads.application.name
        ))
    }

    /// Launcher-jar URL from the loader meta service, using the newest
    /// stable loader and installer.
    async fn resolve_fabric(&self, version: &str) -> Result<String> {
        let loaders_url = format!("{}/versions/loader/{version}", self.config.fabric_meta_url);
        let loaders: Vec<FabricLoaderEntry> = self.get_json(&loaders_url).await?;
        let loader = pick_stable_component(loaders.into_iter().map(|e| e.loader).collect())
            .ok_or_else(|| {
                Error::DownloadFailed(format!("no fabric loader for version '{version}'"))
            })?;

        let installers_url = format!("{}/versions/installer", self.config.fabric_meta_url);
        let installers: Vec<FabricComponent> = self.get_json(&installers_url).await?;
        let installer = pick_stable_component(installers).ok_or_else(|| {
            Error::DownloadFailed("no fabric installer available".to_string())
        })?;

        Ok(format!(
            "{}/versions/loader/{version}/{}/{}/server/jar",
            self.config.fabric_meta_url, loader.version, installer.version
        ))
    }

    /// Promotions lookup for the recommended (falling back to latest)
    /// installer of a game version.
    async fn resolve_forge(&self, version: &str) -> Result<String> {
        let promotions: ForgePromotions =
            self.get_json(&self.config.forge_promotions_url).await?;
        let forge_version = pick_forge_version(&promotions.promos, version).ok_or_else(|| {
            Error::DownloadFailed(format!("no forge promotion for version '{version}'"))
        })?;

        Ok(format!(
            "{}/net/minecraftforge/forge/{version}-{forge_version}/forge-{version}-{forge_version}-installer.jar",
            self.config.forge_maven_url
        ))
    }

    /// GET with typed deserialization. 404 is the upstream's way of
    /// saying the version does not exist; 5xx and transport errors are
    /// retried a bounded number of times.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay * attempt).await;
            }
            debug!(url, attempt, "Fetching upstream metadata");

            let outcome = self.client.get(url).send().await;
            match outcome {
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    return Err(Error::DownloadFailed(format!(
                        "upstream returned 404 for {url}"
                    )));
                }
                Ok(response) if response.status().is_server_error() => {
                    warn!(url, status = %response.status(), "Upstream server error");
                    if attempt >= self.config.max_retries {
                        return Err(Error::DownloadFailed(format!(
                            "upstream returned {} for {url}",
                            response.status()
                        )));
                    }
                }
                Ok(response) => {
                    let response = response.error_for_status()?;
                    return Ok(response.json::<T>().await?);
                }
                Err(e) => {
                    warn!(url, error = %e, "Upstream request failed");
                    if attempt >= self.config.max_retries {
                        return Err(e.into());
                    }
                }
            }
            attempt += 1;
        }
    }
}

/// The highest-numbered build wins.
fn pick_latest_build(builds: Vec<PaperBuild>) -> Option<PaperBuild> {
    builds.into_iter().max_by_key(|b| b.build)
}

/// Newest stable component, or the newest at all when nothing is marked
/// stable. The meta service lists newest first.
fn pick_stable_component(components: Vec<FabricComponent>) -> Option<FabricComponent> {
    components
        .iter()
        .find(|c| c.stable)
        .cloned()
        .or_else(|| components.into_iter().next())
}

/// `<version>-recommended` wins over `<version>-latest`.
fn pick_forge_version(promos: &HashMap<String, String>, version: &str) -> Option<String> {
    promos
        .get(&format!("{version}-recommended"))
        .or_else(|| promos.get(&format!("{version}-latest")))
        .cloned()
}

// ============================================================================
// Upstream response documents
// ============================================================================

#[derive(Debug, Deserialize)]
struct VersionManifest {
    versions: Vec<ManifestVersion>,
}

#[derive(Debug, Deserialize)]
struct ManifestVersion {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct VersionDocument {
    downloads: VersionDownloads,
}

#[derive(Debug, Deserialize)]
struct VersionDownloads {
    server: Option<DownloadEntry>,
}

#[derive(Debug, Deserialize)]
struct DownloadEntry {
    url: String,
}

#[derive(Debug, Deserialize)]
struct PaperBuilds {
    builds: Vec<PaperBuild>,
}

#[derive(Debug, Deserialize)]
struct PaperBuild {
    build: u32,
    downloads: PaperDownloads,
}

#[derive(Debug, Deserialize)]
struct PaperDownloads {
    application: PaperApplication,
}

#[derive(Debug, Deserialize)]
struct PaperApplication {
    name: String,
}

#[derive(Debug, Deserialize)]
struct FabricLoaderEntry {
    loader: FabricComponent,
}

#[derive(Debug, Clone, Deserialize)]
struct FabricComponent {
    version: String,
    #[serde(default)]
    stable: bool,
}

#[derive(Debug, Deserialize)]
struct ForgePromotions {
    promos: HashMap<String, String>,
}
