//! Mock wiki: action API, rendering service and media host on one server
//!
//! The action API answers at `/api.php`, the rendering service at
//! `/rest/<wikiid>/<title>`, and image originals at `/media/<name>`.

use serde_json::{Value, json};
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use wiki_bundler::{Article, Manifest, Node, WikiConfig};

/// Site id reported by the mock wiki's siteinfo
pub const WIKI_ID: &str = "testwiki";

/// Body served for every image original
pub const IMAGE_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nnot really a png";

/// Rendered attribution page returned by the rendering service
pub const ATTRIBUTION_HTML: &str = "<html><body><p>Attribution</p></body></html>";

/// A running mock wiki
pub struct MockWiki {
    /// Underlying mock server; expectations are verified when it drops
    pub server: MockServer,
}

impl MockWiki {
    /// Start a wiki answering siteinfo, file repositories, contributors,
    /// legacy parses, revisions and attribution renders
    pub async fn start() -> Self {
        let wiki = Self {
            server: MockServer::start().await,
        };
        wiki.mount_site().await;
        wiki
    }

    /// API base URL (script path)
    pub fn baseurl(&self) -> String {
        self.server.uri()
    }

    /// Rendering service base URL
    pub fn render_service(&self) -> String {
        format!("{}/rest/", self.server.uri())
    }

    /// A one-wiki manifest listing `titles` as top-level articles
    pub fn manifest(&self, titles: &[&str]) -> Manifest {
        let mut manifest = Manifest {
            title: "Test book".to_string(),
            ..Manifest::default()
        };
        manifest.wikis.push(WikiConfig::new(self.baseurl()));
        for title in titles {
            manifest.items.push(Node::Article(Article::new(*title)));
        }
        manifest
    }

    /// Rendered HTML for `title` at `revid`, embedding `images` as figures
    pub fn article_html(&self, title: &str, revid: u64, images: &[&str]) -> String {
        let uri = self.server.uri();
        let figures: String = images
            .iter()
            .map(|name| {
                format!(
                    r#"<figure typeof="mw:Image"><img resource="./File:{name}" src="{uri}/thumb/{name}/220px-{name}" width="220"/></figure>"#
                )
            })
            .collect();
        format!(
            r#"<!DOCTYPE html><html about="{uri}/wiki/Special:Redirect/revision/{revid}"><head><base href="{uri}/wiki/"/><link rel="dc:isVersionOf" href="{uri}/wiki/{title}"/></head><body><p>{title}</p>{figures}</body></html>"#
        )
    }

    /// Serve `title` from the rendering service
    pub async fn mount_article(&self, title: &str, revid: u64, images: &[&str]) {
        Mock::given(method("GET"))
            .and(path(format!("/rest/{WIKI_ID}/{title}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string(self.article_html(title, revid, images)),
            )
            .expect(1)
            .mount(&self.server)
            .await;
    }

    /// Serve metadata and bytes for image `name`, each expected exactly once
    pub async fn mount_image(&self, name: &str) {
        let url = format!("{}/media/{name}", self.server.uri());
        self.mount_image_metadata(name, &url).await;
        Mock::given(method("GET"))
            .and(path(format!("/media/{name}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(IMAGE_BYTES),
            )
            .expect(1)
            .mount(&self.server)
            .await;
    }

    /// Serve metadata for image `name` whose original lives at `url`
    pub async fn mount_image_metadata(&self, name: &str, url: &str) {
        Mock::given(method("GET"))
            .and(path("/api.php"))
            .and(query_param("prop", "imageinfo"))
            .and(query_param("titles", format!("File:{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(imageinfo_body(name, url)))
            .expect(1)
            .mount(&self.server)
            .await;
    }

    async fn mount_site(&self) {
        let uri = self.server.uri();
        Mock::given(method("GET"))
            .and(path("/api.php"))
            .and(query_param("meta", "siteinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"query": {
                "general": {"wikiid": WIKI_ID, "lang": "en", "sitename": "Test Wiki"},
                "interwikimap": [{"prefix": "test", "url": format!("{uri}/wiki/$1")}],
                "rightsinfo": {
                    "url": "https://creativecommons.org/licenses/by-sa/4.0/",
                    "text": "CC BY-SA 4.0"
                }
            }})))
            .mount(&self.server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api.php"))
            .and(query_param("meta", "filerepoinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"query": {
                "repos": [{"name": "local", "displayname": "Test Wiki", "local": ""}]
            }})))
            .mount(&self.server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api.php"))
            .and(query_param("prop", "contributors"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"query": {"pages": {
                "1": {
                    "pageid": 1,
                    "ns": 0,
                    "title": "Page",
                    "contributors": [{"userid": 7, "name": "Ann"}, {"userid": 8, "name": "Bob"}],
                    "anoncontributors": 2
                }
            }}})))
            .mount(&self.server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api.php"))
            .and(query_param("action", "parse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"parse": {
                "title": "Page",
                "revid": 1,
                "text": {"*": "<p>legacy</p>"}
            }})))
            .mount(&self.server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api.php"))
            .and(query_param("prop", "revisions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"query": {"pages": {
                "1": {
                    "pageid": 1,
                    "ns": 0,
                    "title": "Page",
                    "revisions": [{"revid": 1, "parentid": 0, "*": "'''Page''' wikitext"}]
                }
            }}})))
            .mount(&self.server)
            .await;

        Mock::given(method("POST"))
            .and(path(format!("/rest/{WIKI_ID}/MediaWiki:Coll-attribution-page")))
            .and(body_string_contains("Coll-attribution-page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ATTRIBUTION_HTML))
            .mount(&self.server)
            .await;
    }
}

/// `prop=imageinfo` response for a small local bitmap
pub fn imageinfo_body(name: &str, url: &str) -> Value {
    json!({"query": {"pages": {"5": {
        "pageid": 5,
        "ns": 6,
        "title": format!("File:{name}"),
        "imagerepository": "local",
        "imageinfo": [{
            "url": url,
            "descriptionurl": format!("{url}/description"),
            "width": 100,
            "height": 80,
            "size": IMAGE_BYTES.len(),
            "mime": "image/png",
            "mediatype": "BITMAP",
            "sha1": "0123456789abcdef",
            "extmetadata": {
                "LicenseShortName": {"value": "CC0"},
                "Artist": {"value": "<a href=\"https://example.org/User:Ann\">Ann</a>"}
            }
        }]
    }}}})
}
