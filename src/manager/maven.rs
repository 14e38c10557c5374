//! Artifact-repository backend.
//!
//! Lists versions from `maven-metadata.xml` and builds artifact URLs from
//! the `{group, artifact, version, packaging, classifier}` coordinates in
//! the package's `extra` map. Coordinates may carry platform variables
//! (`embedded-postgres-binaries-{os}-{arch}`). Existence is confirmed
//! with a HEAD probe before the resolution is returned; a missing
//! artifact reports the closest published version.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::core::package::{Package, Resolution};
use crate::core::platform::Platform;
use crate::core::template::{self, TemplateContext};
use crate::core::version::{Version, closest_version, looks_prerelease};
use crate::manager::{Manager, ResolveError, build_resolution, template_context};

#[derive(Debug, Deserialize)]
#[serde(rename = "metadata")]
struct Metadata {
    versioning: Versioning,
}

#[derive(Debug, Deserialize)]
struct Versioning {
    #[serde(default)]
    versions: Versions,
}

#[derive(Debug, Default, Deserialize)]
struct Versions {
    #[serde(rename = "version", default)]
    versions: Vec<String>,
}

#[derive(Debug)]
pub struct MavenManager {
    client: Client,
}

impl MavenManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn coordinates(
        pkg: &Package,
        ctx: &TemplateContext,
    ) -> Result<(String, String, String), ResolveError> {
        let repository = pkg
            .extra
            .get("repository")
            .map(|r| r.trim_end_matches('/').to_string())
            .ok_or_else(|| ResolveError::NoSource(pkg.name.clone()))?;
        let group = pkg
            .extra
            .get("group")
            .ok_or_else(|| ResolveError::NoSource(pkg.name.clone()))?
            .replace('.', "/");
        let artifact = template::render(
            pkg.extra
                .get("artifact")
                .ok_or_else(|| ResolveError::NoSource(pkg.name.clone()))?,
            ctx,
        )?;
        Ok((repository, group, artifact))
    }

    async fn fetch_versions(
        &self,
        pkg: &Package,
        platform: &Platform,
    ) -> Result<Vec<Version>, ResolveError> {
        // The artifact id can be platform-templated, so metadata lookups
        // are per platform.
        let ctx = template_context(pkg, &Version::exact(""), platform);
        let (repository, group, artifact) = Self::coordinates(pkg, &ctx)?;
        let url = format!("{repository}/{group}/{artifact}/maven-metadata.xml");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status { status, url });
        }
        let body = response.text().await?;

        let metadata: Metadata =
            quick_xml::de::from_str(&body).map_err(|e| ResolveError::Metadata {
                url,
                message: e.to_string(),
            })?;

        let mut versions: Vec<Version> = metadata
            .versioning
            .versions
            .versions
            .into_iter()
            .map(|v| {
                let prerelease = v.ends_with("-SNAPSHOT") || looks_prerelease(&v);
                Version {
                    version: v.clone(),
                    tag: v,
                    prerelease,
                }
            })
            .collect();

        // Metadata lists ascending; newest-first is the backend contract.
        versions.sort_by(|a, b| match (a.semver(), b.semver()) {
            (Some(va), Some(vb)) => vb.cmp(&va),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.version.cmp(&a.version),
        });
        Ok(versions)
    }
}

#[async_trait]
impl Manager for MavenManager {
    fn name(&self) -> &'static str {
        "maven"
    }

    async fn discover_versions(
        &self,
        pkg: &Package,
        platform: &Platform,
        limit: usize,
    ) -> Result<Vec<Version>, ResolveError> {
        let versions = self.fetch_versions(pkg, platform).await?;
        Ok(versions.into_iter().take(limit).collect())
    }

    async fn resolve(
        &self,
        pkg: &Package,
        version: &Version,
        platform: &Platform,
    ) -> Result<Resolution, ResolveError> {
        let mut ctx = template_context(pkg, version, platform);
        let (repository, group, artifact) = Self::coordinates(pkg, &ctx)?;

        let packaging = match pkg.extra.get("packaging") {
            Some(p) => template::render(p, &ctx)?,
            None => "jar".to_string(),
        };
        let classifier = pkg
            .extra
            .get("classifier")
            .map(|c| template::render(c, &ctx))
            .transpose()?
            .filter(|c| !c.is_empty());

        let file = match &classifier {
            Some(c) => format!("{artifact}-{}-{c}.{packaging}", version.version),
            None => format!("{artifact}-{}.{packaging}", version.version),
        };
        let url = format!("{repository}/{group}/{artifact}/{}/{file}", version.version);
        ctx.set("asset", file.clone());

        // HEAD probe: fail now with a suggestion instead of mid-download.
        let probe = self
            .client
            .head(&url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await?;
        if !probe.status().is_success() {
            let closest = self
                .fetch_versions(pkg, platform)
                .await
                .ok()
                .and_then(|available| {
                    closest_version(&version.version, &available).map(|v| v.version.clone())
                });
            return Err(ResolveError::ArtifactMissing { url, closest });
        }

        build_resolution(pkg, version, platform, &ctx, url, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    const METADATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>io.zonky.test.postgres</groupId>
  <artifactId>embedded-postgres-binaries-linux-amd64</artifactId>
  <versioning>
    <latest>16.1.0</latest>
    <release>16.1.0</release>
    <versions>
      <version>15.1.0</version>
      <version>16.0.0</version>
      <version>16.1.0</version>
      <version>17.0.0-SNAPSHOT</version>
    </versions>
    <lastUpdated>20240101000000</lastUpdated>
  </versioning>
</metadata>"#;

    fn postgres(server_url: &str) -> Package {
        let mut pkg = Package::named("postgres");
        pkg.extra
            .insert("repository".to_string(), server_url.to_string());
        pkg.extra
            .insert("group".to_string(), "io.zonky.test.postgres".to_string());
        pkg.extra.insert(
            "artifact".to_string(),
            "embedded-postgres-binaries-{os}-{arch}".to_string(),
        );
        pkg.extra.insert("packaging".to_string(), "jar".to_string());
        pkg
    }

    const META_PATH: &str =
        "/io/zonky/test/postgres/embedded-postgres-binaries-linux-amd64/maven-metadata.xml";

    #[tokio::test]
    async fn test_discover_versions_sorted_descending() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", META_PATH)
            .with_status(200)
            .with_body(METADATA)
            .create_async()
            .await;

        let manager = MavenManager::new(Client::new());
        let platform: Platform = "linux-amd64".parse().unwrap();
        let versions = manager
            .discover_versions(&postgres(&server.url()), &platform, 10)
            .await
            .unwrap();

        let listed: Vec<&str> = versions.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(
            listed,
            vec!["17.0.0-SNAPSHOT", "16.1.0", "16.0.0", "15.1.0"]
        );
        assert!(versions[0].prerelease);
        assert!(!versions[1].prerelease);
    }

    #[tokio::test]
    async fn test_resolve_probes_and_builds_url() {
        let mut server = Server::new_async().await;
        let artifact_path =
            "/io/zonky/test/postgres/embedded-postgres-binaries-linux-amd64/16.1.0/embedded-postgres-binaries-linux-amd64-16.1.0.jar";
        let _head = server
            .mock("HEAD", artifact_path)
            .with_status(200)
            .create_async()
            .await;

        let manager = MavenManager::new(Client::new());
        let platform: Platform = "linux-amd64".parse().unwrap();
        let resolution = manager
            .resolve(&postgres(&server.url()), &Version::exact("16.1.0"), &platform)
            .await
            .unwrap();

        assert_eq!(
            resolution.download_url,
            format!("{}{artifact_path}", server.url())
        );
        assert!(resolution.is_archive);
        assert_eq!(
            resolution.asset_name,
            "embedded-postgres-binaries-linux-amd64-16.1.0.jar"
        );
    }

    #[tokio::test]
    async fn test_missing_artifact_suggests_closest() {
        let mut server = Server::new_async().await;
        let _head = server
            .mock(
                "HEAD",
                "/io/zonky/test/postgres/embedded-postgres-binaries-linux-amd64/16.1.3/embedded-postgres-binaries-linux-amd64-16.1.3.jar",
            )
            .with_status(404)
            .create_async()
            .await;
        let _meta = server
            .mock("GET", META_PATH)
            .with_status(200)
            .with_body(METADATA)
            .create_async()
            .await;

        let manager = MavenManager::new(Client::new());
        let platform: Platform = "linux-amd64".parse().unwrap();
        match manager
            .resolve(&postgres(&server.url()), &Version::exact("16.1.3"), &platform)
            .await
        {
            Err(ResolveError::ArtifactMissing { closest, .. }) => {
                assert_eq!(closest.as_deref(), Some("16.1.0"));
            }
            other => panic!("expected ArtifactMissing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_classifier_in_file_name() {
        let mut server = Server::new_async().await;
        let artifact_path = "/com/example/tool/2.0.0/tool-2.0.0-cli.zip";
        let _head = server
            .mock("HEAD", artifact_path)
            .with_status(200)
            .create_async()
            .await;

        let mut pkg = Package::named("tool");
        pkg.extra
            .insert("repository".to_string(), server.url());
        pkg.extra.insert("group".to_string(), "com.example".to_string());
        pkg.extra.insert("artifact".to_string(), "tool".to_string());
        pkg.extra
            .insert("packaging".to_string(), "zip".to_string());
        pkg.extra
            .insert("classifier".to_string(), "cli".to_string());

        let manager = MavenManager::new(Client::new());
        let platform: Platform = "linux-amd64".parse().unwrap();
        let resolution = manager
            .resolve(&pkg, &Version::exact("2.0.0"), &platform)
            .await
            .unwrap();
        assert!(resolution.download_url.ends_with("tool-2.0.0-cli.zip"));
    }

    #[test]
    fn test_metadata_parse_failure() {
        let err = quick_xml::de::from_str::<Metadata>("<not-metadata/>");
        assert!(err.is_err());
    }
}
