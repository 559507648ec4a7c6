//! Template acquisition: local directory, remote proxy, or caller-supplied
//! bytes.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::ACCEPT;
use tracing::{debug, info, instrument};
use url::Url;

use docmerge_shared::{DOCX_MEDIA_TYPE, DocMergeError, DocumentKind, Result, TemplateConfig};

/// User-Agent string for template requests.
const USER_AGENT: &str = concat!("docmerge/", env!("CARGO_PKG_VERSION"));

/// Query parameter naming the requested document kind.
pub const KIND_QUERY_PARAM: &str = "zeugnisart";

/// Where a template comes from.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    /// `<dir>/template_<kind>.docx`.
    Local { dir: PathBuf },
    /// A proxy that serves the template for `?zeugnisart=<kind>`.
    Remote {
        endpoint: Url,
        token: Option<String>,
        timeout_secs: u64,
    },
    /// Bytes the caller already holds (e.g. an explicit `--template` file).
    Uploaded { bytes: Vec<u8> },
}

impl TemplateSource {
    /// Build the configured source. `remote` selects the proxy endpoint,
    /// which must then be configured.
    pub fn from_config(config: &TemplateConfig, remote: bool) -> Result<Self> {
        if !remote {
            return Ok(Self::Local {
                dir: PathBuf::from(&config.dir),
            });
        }

        let raw = config.remote_url.as_deref().ok_or_else(|| {
            DocMergeError::config("remote template requested but [template].remote_url is unset")
        })?;
        let endpoint = Url::parse(raw).map_err(|e| {
            DocMergeError::config(format!("invalid [template].remote_url {raw}: {e}"))
        })?;
        let token = config
            .token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.trim().is_empty());

        Ok(Self::Remote {
            endpoint,
            token,
            timeout_secs: config.timeout_secs,
        })
    }

    /// Short description for logs and progress output.
    pub fn describe(&self, kind: DocumentKind) -> String {
        match self {
            Self::Local { dir } => dir.join(kind.template_file_name()).display().to_string(),
            Self::Remote { endpoint, .. } => format!("{endpoint} ({kind})"),
            Self::Uploaded { bytes } => format!("uploaded template ({} bytes)", bytes.len()),
        }
    }
}

/// Fetch the template bytes for a document kind.
#[instrument(skip_all, fields(kind = %kind))]
pub async fn load_template(source: &TemplateSource, kind: DocumentKind) -> Result<Vec<u8>> {
    let bytes = match source {
        TemplateSource::Local { dir } => read_local(dir.join(kind.template_file_name())).await?,
        TemplateSource::Remote {
            endpoint,
            token,
            timeout_secs,
        } => fetch_remote(endpoint, token.as_deref(), *timeout_secs, kind).await?,
        TemplateSource::Uploaded { bytes } => bytes.clone(),
    };

    if bytes.is_empty() {
        return Err(DocMergeError::template_not_found(format!(
            "{} is empty",
            source.describe(kind)
        )));
    }

    info!(size = bytes.len(), "template loaded");
    Ok(bytes)
}

async fn read_local(path: PathBuf) -> Result<Vec<u8>> {
    debug!(path = %path.display(), "reading local template");
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
            DocMergeError::template_not_found(format!("{} does not exist", path.display())),
        ),
        Err(e) => Err(DocMergeError::io(path, e)),
    }
}

fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DocMergeError::Network(format!("failed to build HTTP client: {e}")))
}

async fn fetch_remote(
    endpoint: &Url,
    token: Option<&str>,
    timeout_secs: u64,
    kind: DocumentKind,
) -> Result<Vec<u8>> {
    let mut url = endpoint.clone();
    url.query_pairs_mut()
        .append_pair(KIND_QUERY_PARAM, kind.as_str());

    debug!(%url, authenticated = token.is_some(), "fetching remote template");

    let client = build_client(timeout_secs)?;
    let mut request = client.get(url.clone()).header(ACCEPT, DOCX_MEDIA_TYPE);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| DocMergeError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DocMergeError::template_not_found(format!(
            "{url}: HTTP {status}: {body}"
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| DocMergeError::Network(format!("{url}: failed to read body: {e}")))?;

    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn remote(server: &MockServer, token: Option<&str>) -> TemplateSource {
        TemplateSource::Remote {
            endpoint: Url::parse(&format!("{}/api/get-template", server.uri())).unwrap(),
            token: token.map(String::from),
            timeout_secs: 5,
        }
    }

    #[test]
    fn from_config_local_by_default() {
        let source = TemplateSource::from_config(&TemplateConfig::default(), false).unwrap();
        match source {
            TemplateSource::Local { dir } => assert_eq!(dir, PathBuf::from("templates")),
            other => panic!("expected local source, got {other:?}"),
        }
    }

    #[test]
    fn from_config_remote_requires_url() {
        let err = TemplateSource::from_config(&TemplateConfig::default(), true).unwrap_err();
        assert!(matches!(err, DocMergeError::Config { .. }));
    }

    #[tokio::test]
    async fn remote_fetch_sends_kind_and_accept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/get-template"))
            .and(query_param(KIND_QUERY_PARAM, "Abschlusszeugnis"))
            .and(header("accept", DOCX_MEDIA_TYPE))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04docx".to_vec()))
            .mount(&server)
            .await;

        let bytes = load_template(&remote(&server, Some("s3cret")), DocumentKind::Abschlusszeugnis)
            .await
            .unwrap();
        assert_eq!(bytes, b"PK\x03\x04docx");
    }

    #[tokio::test]
    async fn remote_error_body_is_carried_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(404).set_body_string("GitHub API Fehler: Not Found"),
            )
            .mount(&server)
            .await;

        let err = load_template(&remote(&server, None), DocumentKind::Jahreszeugnis)
            .await
            .unwrap_err();
        match err {
            DocMergeError::TemplateNotFound { message } => {
                assert!(message.contains("404"));
                assert!(message.ends_with("GitHub API Fehler: Not Found"));
            }
            other => panic!("expected TemplateNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn remote_empty_body_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let err = load_template(&remote(&server, None), DocumentKind::Zwischenzeugnis)
            .await
            .unwrap_err();
        assert!(matches!(err, DocMergeError::TemplateNotFound { .. }));
    }

    #[tokio::test]
    async fn local_missing_file_is_not_found() {
        let dir = std::env::temp_dir().join("docmerge-template-test-missing");
        let source = TemplateSource::Local { dir };
        let err = load_template(&source, DocumentKind::Jahreszeugnis)
            .await
            .unwrap_err();
        match err {
            DocMergeError::TemplateNotFound { message } => {
                assert!(message.contains("template_jahr.docx"))
            }
            other => panic!("expected TemplateNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_file_is_read() {
        let dir = std::env::temp_dir()
            .join(format!("docmerge-template-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("template_zwischen.docx"), b"bytes").unwrap();

        let source = TemplateSource::Local { dir: dir.clone() };
        let bytes = load_template(&source, DocumentKind::Zwischenzeugnis)
            .await
            .unwrap();
        assert_eq!(bytes, b"bytes");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn uploaded_bytes_pass_through() {
        let source = TemplateSource::Uploaded {
            bytes: b"PK".to_vec(),
        };
        assert_eq!(
            load_template(&source, DocumentKind::default()).await.unwrap(),
            b"PK"
        );
        let empty = TemplateSource::Uploaded { bytes: Vec::new() };
        assert!(load_template(&empty, DocumentKind::default()).await.is_err());
    }
}
