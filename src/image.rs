//! Image Resolver
//!
//! Images are resolved in two independently guarded phases:
//!
//! 1. **Metadata** (`prop=imageinfo`) by short title on the owning wiki. A
//!    missing page, an invalid title or a lookup that fails outright leaves
//!    the image flagged missing with empty metadata; it never fails the run.
//! 2. **Bytes**, only for media types worth bundling. The original is
//!    downloaded unless it is larger than the wiki's maximum dimension (or is
//!    a video, which needs a still), in which case a resized thumbnail URL is
//!    derived from the in-context thumbnail. Every attempt streams into a
//!    fresh file; when the server declared a length, the file and directory
//!    are synced and the on-disk size compared. Any failure deletes the
//!    partial file and restarts the phase, up to the configured budget, after
//!    which the image is recorded without a file name.

use crate::api::{ApiClient, ApiQuery, first_page};
use crate::error::{Error, Result};
use crate::guard::ConcurrencyGuard;
use crate::http::HttpClient;
use crate::manifest::WikiConfig;
use crate::progress::ProgressReporter;
use crate::types::{DEFAULT_IMAGESIZE, ImageInfo, ImageRef, ResolvedImage};
use crate::utils::{create_media_file, dotted_extension, fsync_path};
use serde_json::Value;
use std::path::Path;

const IIPROP: &str = "url|size|mediatype|mime|sha1|extmetadata";

/// Where to download an image from, and what to call it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadPlan {
    /// Original or resized thumbnail URL
    pub url: String,
    /// Name the media file is derived from
    pub proposed_name: String,
}

/// Two-phase image resolver
#[derive(Debug)]
pub struct ImageResolver {
    api: ApiClient,
    http: HttpClient,
    metadata_guard: ConcurrencyGuard,
    bytes_guard: ConcurrencyGuard,
    retries: u32,
    legible_names: bool,
}

impl ImageResolver {
    /// Create a resolver
    ///
    /// Each phase admits `limit` requests at a time. A failed byte download is
    /// retried `retries` times. With `legible_names` set, media files are named
    /// after the cleaned image title instead of randomly.
    pub fn new(api: ApiClient, limit: usize, retries: u32, legible_names: bool) -> Self {
        let http = api.http().clone();
        Self {
            api,
            http,
            metadata_guard: ConcurrencyGuard::new("image-metadata", limit),
            bytes_guard: ConcurrencyGuard::new("image-bytes", limit),
            retries,
            legible_names,
        }
    }

    /// Run both phases for one image
    ///
    /// Media types that are not downloaded are reported as skipped.
    pub async fn resolve(
        &self,
        wikis: &[WikiConfig],
        reference: ImageRef,
        dir: &Path,
        progress: Option<&ProgressReporter>,
    ) -> ResolvedImage {
        let mut image = self.fetch_metadata(wikis, reference, progress).await;
        if image.info.is_downloadable() {
            image.filename = self.fetch(&image, dir, progress).await;
        } else if let Some(progress) = progress {
            progress.report(format!("{} [skipping]", image.reference.short));
        }
        image
    }

    /// Metadata phase
    pub async fn fetch_metadata(
        &self,
        wikis: &[WikiConfig],
        reference: ImageRef,
        progress: Option<&ProgressReporter>,
    ) -> ResolvedImage {
        let _slot = self.metadata_guard.acquire().await;
        if let Some(progress) = progress {
            progress.report(format!("{} [metadata]", reference.short));
        }

        match self.query_metadata(wikis, &reference).await {
            Ok(response) => interpret_metadata(reference, &response),
            Err(e) => {
                tracing::warn!(
                    image = %reference.short,
                    wiki = reference.wiki,
                    error = %e,
                    "Image metadata lookup failed, treating image as missing"
                );
                ResolvedImage::missing(reference)
            }
        }
    }

    async fn query_metadata(&self, wikis: &[WikiConfig], reference: &ImageRef) -> Result<Value> {
        let config = wikis.get(reference.wiki).ok_or_else(|| {
            Error::config("wikis", format!("wiki index {} out of range", reference.wiki))
        })?;
        let query = ApiQuery::new("query")
            .param("prop", "imageinfo")
            .param("iiprop", IIPROP)
            .param("titles", reference.short.clone());
        self.api.request(&config.baseurl, &query).await
    }

    /// Byte phase; returns the file name inside `dir`, or `None` on failure
    pub async fn fetch(
        &self,
        image: &ResolvedImage,
        dir: &Path,
        progress: Option<&ProgressReporter>,
    ) -> Option<String> {
        let _slot = self.bytes_guard.acquire().await;
        if let Some(progress) = progress {
            progress.report(image.reference.short.clone());
        }

        let plan = plan_download(image);
        let attempts = self.retries.saturating_add(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.download(&plan, dir).await {
                Ok(name) => {
                    tracing::debug!(url = %plan.url, file = %name, attempt, "Image downloaded");
                    return Some(name);
                }
                Err(e) => {
                    if attempt < attempts {
                        tracing::warn!(url = %plan.url, attempt, error = %e, "Image download failed, retrying");
                    }
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error {
            tracing::error!(url = %plan.url, image = %image.reference.short, error = %e, "Giving up on image");
        }
        None
    }

    async fn download(&self, plan: &DownloadPlan, dir: &Path) -> Result<String> {
        let stream = self.http.get_stream(&plan.url).await?;
        let expected = stream.content_length();

        let (name, file) = {
            let dir = dir.to_path_buf();
            let proposed = plan.proposed_name.clone();
            let legible = self.legible_names;
            tokio::task::spawn_blocking(move || create_media_file(&dir, &proposed, legible))
                .await
                .map_err(|e| Error::Other(format!("media file task failed: {e}")))??
        };
        let path = dir.join(&name);

        let written = async {
            let mut file = tokio::fs::File::from_std(file);
            stream.write_to(&mut file).await?;
            drop(file);

            if let Some(expected) = expected {
                fsync_path(&path).await?;
                fsync_path(dir).await?;
                let actual = tokio::fs::metadata(&path).await?.len();
                if actual != expected {
                    return Err(Error::TruncatedDownload {
                        url: plan.url.clone(),
                        expected,
                        actual,
                    });
                }
            }
            Ok(())
        }
        .await;

        match written {
            Ok(()) => Ok(name),
            Err(e) => {
                if let Err(unlink) = tokio::fs::remove_file(&path).await {
                    tracing::debug!(path = %path.display(), error = %unlink, "Could not remove partial download");
                }
                Err(e)
            }
        }
    }
}

/// Turn an `imageinfo` response into a resolved image
pub fn interpret_metadata(reference: ImageRef, response: &Value) -> ResolvedImage {
    let Some(page) = first_page(response) else {
        tracing::warn!(image = %reference.short, "Image metadata response has no page");
        return ResolvedImage::missing(reference);
    };

    let imagerepository = page
        .get("imagerepository")
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    let pageid = page.get("pageid").and_then(Value::as_u64);

    let info = if page.get("missing").is_some() && imagerepository.is_none() {
        tracing::warn!(image = %reference.short, "Image not found");
        None
    } else if page.get("invalid").is_some() {
        tracing::warn!(image = %reference.short, "Invalid image title");
        None
    } else {
        page.get("imageinfo")
            .and_then(|list| list.get(0))
            .and_then(|info| serde_json::from_value::<ImageInfo>(info.clone()).ok())
    };

    ResolvedImage {
        missing: info.is_none(),
        info: info.unwrap_or_default(),
        reference,
        imagerepository,
        pageid,
        filename: None,
    }
}

/// Choose the download URL and proposed file name for an image
///
/// Without a direct URL from the metadata phase, the resource URL is turned
/// into a `Special:Redirect/file/` link. Raster images wider than the maximum
/// dimension, and videos, use the in-context thumbnail resized to that
/// dimension; if the thumbnail's format differs from the original's, its
/// extension is appended to the proposed name.
pub fn plan_download(image: &ResolvedImage) -> DownloadPlan {
    let reference = &image.reference;
    let info = &image.info;
    let max_res = if reference.imagesize == 0 {
        DEFAULT_IMAGESIZE
    } else {
        reference.imagesize
    };

    let mut url = info
        .url
        .clone()
        .unwrap_or_else(|| reference.resource.replacen("/File:", "/Special:Redirect/file/", 1));
    let mut proposed_name = reference.short.clone();

    let too_big = info.width.is_some_and(|w| w > u64::from(max_res));
    if !info.is_vector() && (too_big || info.is_video()) {
        if let Some(thumb) = resize_thumbnail(&reference.src, max_res) {
            url = thumb;
            let original_ext = dotted_extension(&reference.short);
            if original_ext.is_empty() || !reference.src.ends_with(original_ext) {
                proposed_name.push_str(dotted_extension(&reference.src));
            }
        }
    }

    DownloadPlan { url, proposed_name }
}

/// Rewrite a `.../<n>px-<name>` thumbnail URL to width `max_res`
pub fn resize_thumbnail(src: &str, max_res: u32) -> Option<String> {
    let (head, tail) = src.rsplit_once('/')?;
    let digits = tail.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = &tail[digits..];
    let name = rest.strip_prefix("px-").filter(|n| !n.is_empty())?;
    Some(format!("{head}/{max_res}px-{name}"))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reference(short: &str, src: &str) -> ImageRef {
        ImageRef {
            wiki: 0,
            short: short.to_string(),
            resource: format!("https://en.wikipedia.org/wiki/{short}"),
            src: src.to_string(),
            imagesize: 1200,
        }
    }

    fn resolved(reference: ImageRef, info: ImageInfo) -> ResolvedImage {
        ResolvedImage {
            reference,
            imagerepository: Some("local".into()),
            pageid: Some(1),
            missing: false,
            info,
            filename: None,
        }
    }

    fn resolver(retries: u32, legible: bool) -> ImageResolver {
        let retry = RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        };
        ImageResolver::new(
            ApiClient::new(HttpClient::new("test", retry).unwrap()),
            5,
            retries,
            legible,
        )
    }

    #[test]
    fn resize_thumbnail_only_matches_sized_names() {
        assert_eq!(
            resize_thumbnail("https://u/thumb/a/ab/A.jpg/220px-A.jpg", 1200).as_deref(),
            Some("https://u/thumb/a/ab/A.jpg/1200px-A.jpg")
        );
        assert_eq!(resize_thumbnail("https://u/a/ab/A.jpg", 1200), None);
        assert_eq!(resize_thumbnail("https://u/thumb/px-A.jpg", 1200), None);
        assert_eq!(resize_thumbnail("https://u/thumb/220px-", 1200), None);
    }

    #[test]
    fn small_bitmap_downloads_original() {
        let image = resolved(
            reference("File:A.jpg", "https://u/thumb/a/ab/A.jpg/220px-A.jpg"),
            ImageInfo {
                url: Some("https://u/a/ab/A.jpg".into()),
                width: Some(800),
                mediatype: Some("BITMAP".into()),
                ..ImageInfo::default()
            },
        );
        let plan = plan_download(&image);
        assert_eq!(plan.url, "https://u/a/ab/A.jpg");
        assert_eq!(plan.proposed_name, "File:A.jpg");
    }

    #[test]
    fn large_bitmap_uses_resized_thumbnail() {
        let image = resolved(
            reference("File:A.jpg", "https://u/thumb/a/ab/A.jpg/220px-A.jpg"),
            ImageInfo {
                url: Some("https://u/a/ab/A.jpg".into()),
                width: Some(5000),
                mediatype: Some("BITMAP".into()),
                ..ImageInfo::default()
            },
        );
        let plan = plan_download(&image);
        assert_eq!(plan.url, "https://u/thumb/a/ab/A.jpg/1200px-A.jpg");
        assert_eq!(plan.proposed_name, "File:A.jpg");
    }

    #[test]
    fn video_still_gets_thumbnail_extension() {
        let image = resolved(
            reference("File:Clip.ogv", "https://u/thumb/c/cd/Clip.ogv/220px--Clip.ogv.jpg"),
            ImageInfo {
                url: Some("https://u/c/cd/Clip.ogv".into()),
                width: Some(640),
                mediatype: Some("VIDEO".into()),
                ..ImageInfo::default()
            },
        );
        let plan = plan_download(&image);
        assert_eq!(plan.url, "https://u/thumb/c/cd/Clip.ogv/1200px--Clip.ogv.jpg");
        assert_eq!(plan.proposed_name, "File:Clip.ogv.jpg");
    }

    #[test]
    fn vector_never_uses_thumbnail_and_resource_fallback() {
        let image = resolved(
            reference("File:Map.svg", "https://u/thumb/m/mm/Map.svg/220px-Map.svg.png"),
            ImageInfo {
                width: Some(90000),
                mediatype: Some("DRAWING".into()),
                ..ImageInfo::default()
            },
        );
        let plan = plan_download(&image);
        assert_eq!(
            plan.url,
            "https://en.wikipedia.org/wiki/Special:Redirect/file/Map.svg"
        );
    }

    #[test]
    fn metadata_interpretation() {
        let ok = interpret_metadata(
            reference("File:A.jpg", ""),
            &json!({"query": {"pages": {"5": {
                "pageid": 5, "imagerepository": "shared",
                "imageinfo": [{"url": "https://u/A.jpg", "width": 10, "height": 20, "mediatype": "BITMAP"}]
            }}}}),
        );
        assert!(!ok.missing);
        assert_eq!(ok.imagerepository.as_deref(), Some("shared"));
        assert_eq!(ok.info.height, Some(20));

        let missing = interpret_metadata(
            reference("File:Gone.jpg", ""),
            &json!({"query": {"pages": {"-1": {"missing": "", "imagerepository": ""}}}}),
        );
        assert!(missing.missing);
        assert_eq!(missing.info, ImageInfo::default());

        // Missing locally but served from a shared repository
        let shared = interpret_metadata(
            reference("File:Shared.jpg", ""),
            &json!({"query": {"pages": {"-1": {
                "missing": "", "imagerepository": "shared",
                "imageinfo": [{"url": "https://c/Shared.jpg"}]
            }}}}),
        );
        assert!(!shared.missing);

        let invalid = interpret_metadata(
            reference("File:<>", ""),
            &json!({"query": {"pages": {"-1": {"invalid": "", "title": "File:<>"}}}}),
        );
        assert!(invalid.missing);
    }

    #[tokio::test]
    async fn metadata_transport_failure_is_contained() {
        let wikis = vec![WikiConfig::new("http://127.0.0.1:9/w")];
        let image = resolver(0, false)
            .fetch_metadata(&wikis, reference("File:A.jpg", ""), None)
            .await;
        assert!(image.missing);
        assert_eq!(image.filename, None);
    }

    #[tokio::test]
    async fn resolve_downloads_bitmap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api.php"))
            .and(query_param("titles", "File:A.png"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"query": {"pages": {"1": {
                "pageid": 1, "imagerepository": "local",
                "imageinfo": [{"url": format!("{}/media/A.png", server.uri()), "width": 10, "mediatype": "BITMAP"}]
            }}}})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media/A.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 300]))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let wikis = vec![WikiConfig::new(server.uri())];
        let image = resolver(5, true)
            .resolve(&wikis, reference("File:A.png", ""), dir.path(), None)
            .await;

        assert_eq!(image.filename.as_deref(), Some("File:A.png"));
        assert_eq!(std::fs::read(dir.path().join("File:A.png")).unwrap().len(), 300);
    }

    #[tokio::test]
    async fn unsupported_media_type_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"query": {"pages": {"1": {
                "imagerepository": "local",
                "imageinfo": [{"url": format!("{}/media/A.ogg", server.uri()), "mediatype": "AUDIO"}]
            }}}})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media/A.ogg"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let wikis = vec![WikiConfig::new(server.uri())];
        let image = resolver(5, false)
            .resolve(&wikis, reference("File:A.ogg", ""), dir.path(), None)
            .await;
        assert!(!image.missing);
        assert_eq!(image.filename, None);
    }

    #[tokio::test]
    async fn failed_download_retries_then_gives_up_cleanly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/B.png"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let image = resolved(
            reference("File:B.png", ""),
            ImageInfo {
                url: Some(format!("{}/media/B.png", server.uri())),
                mediatype: Some("BITMAP".into()),
                ..ImageInfo::default()
            },
        );
        let filename = resolver(2, false).fetch(&image, dir.path(), None).await;
        assert_eq!(filename, None);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
