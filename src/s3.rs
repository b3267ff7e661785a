use std::fs::File;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Url;
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;

use crate::bucket::ObjectStore;
use crate::error::SleuthError;

static COMMON_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<CommonPrefixes>\s*<Prefix>(.*?)</Prefix>").expect("valid regex")
});
static CONTENTS_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<Contents>.*?<Key>(.*?)</Key>.*?</Contents>").expect("valid regex")
});
static TRUNCATED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<IsTruncated>\s*true\s*</IsTruncated>").expect("valid regex"));
static NEXT_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<NextContinuationToken>(.*?)</NextContinuationToken>").expect("valid regex")
});
static ERROR_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Code>(.*?)</Code>").expect("valid regex"));
static CHAR_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x[0-9A-Fa-f]+|[0-9]+);").expect("valid regex"));

/// One `ListObjectsV2` response page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub common_prefixes: Vec<String>,
    pub keys: Vec<String>,
    pub next_token: Option<String>,
}

/// S3-compatible REST bucket, addressed by its base URL
/// (`https://bucket.s3.amazonaws.com` or `https://host/bucket`).
#[derive(Clone)]
pub struct HttpBucket {
    client: Client,
    base: Url,
}

impl HttpBucket {
    /// `token_env` names an environment variable holding a bearer token.
    pub fn new(url: &str, token_env: Option<&str>) -> Result<Self, SleuthError> {
        let base = Url::parse(url.trim())
            .map_err(|err| SleuthError::InvalidConfig(format!("bucket url {url}: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(SleuthError::InvalidConfig(format!(
                "bucket url is not a base url: {url}"
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("houndsleuth/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SleuthError::BucketHttp(err.to_string()))?,
        );
        if let Some(name) = token_env {
            let token = std::env::var(name).unwrap_or_default();
            if token.trim().is_empty() {
                return Err(SleuthError::Credentials(format!(
                    "environment variable {name} is not set"
                )));
            }
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|_| SleuthError::Credentials(format!("{name} is not a valid token")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| SleuthError::BucketHttp(err.to_string()))?;

        Ok(Self { client, base })
    }

    pub fn object_url(&self, key: &str) -> Result<Url, SleuthError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SleuthError::InvalidConfig(format!("bucket url {}", self.base)))?
            .pop_if_empty()
            .extend(key.split('/'));
        Ok(url)
    }

    fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
    ) -> Result<ListPage, SleuthError> {
        let mut query = vec![("list-type", "2"), ("prefix", prefix)];
        if let Some(delimiter) = delimiter {
            query.push(("delimiter", delimiter));
        }
        if let Some(token) = continuation {
            query.push(("continuation-token", token));
        }

        let response = self
            .client
            .get(self.base.clone())
            .query(&query)
            .send()
            .map_err(|err| SleuthError::BucketHttp(err.to_string()))?;
        let body = check_status(response)?
            .text()
            .map_err(|err| SleuthError::BucketHttp(err.to_string()))?;
        Ok(parse_list_response(&body))
    }

    fn list_all(&self, prefix: &str, delimiter: Option<&str>) -> Result<ListPage, SleuthError> {
        let mut all = ListPage::default();
        let mut continuation: Option<String> = None;
        loop {
            let page = self.list_page(prefix, delimiter, continuation.as_deref())?;
            all.common_prefixes.extend(page.common_prefixes);
            all.keys.extend(page.keys);
            match page.next_token {
                Some(token) if continuation.as_deref() != Some(token.as_str()) => {
                    continuation = Some(token);
                }
                _ => break,
            }
        }
        Ok(all)
    }
}

impl ObjectStore for HttpBucket {
    fn list_folders(&self, prefix: &str) -> Result<Vec<String>, SleuthError> {
        let page = self.list_all(prefix, Some("/"))?;
        Ok(page
            .common_prefixes
            .into_iter()
            .map(|folder| folder.trim_end_matches('/').to_string())
            .filter(|folder| !folder.is_empty())
            .collect())
    }

    fn object_exists(&self, key: &str) -> Result<bool, SleuthError> {
        let response = self
            .client
            .head(self.object_url(key)?)
            .send()
            .map_err(|err| SleuthError::BucketHttp(err.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(response)?;
        Ok(true)
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<String>, SleuthError> {
        Ok(self.list_all(prefix, None)?.keys)
    }

    fn download(&self, key: &str, destination: &Path) -> Result<(), SleuthError> {
        let response = self
            .client
            .get(self.object_url(key)?)
            .send()
            .map_err(|err| SleuthError::BucketHttp(err.to_string()))?;
        let mut response = check_status(response)?;
        let mut file =
            File::create(destination).map_err(|err| SleuthError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| SleuthError::BucketHttp(format!("read {key}: {err}")))?;
        Ok(())
    }
}

fn check_status(response: Response) -> Result<Response, SleuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let code = status.as_u16();
    let body = response.text().unwrap_or_default();
    let message = ERROR_CODE_RE
        .captures(&body)
        .map(|caps| unescape_xml(&caps[1]))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("bucket request failed")
                .to_string()
        });
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(SleuthError::Credentials(format!("status {code}: {message}")));
    }
    Err(SleuthError::BucketStatus {
        status: code,
        message,
    })
}

pub fn parse_list_response(xml: &str) -> ListPage {
    let common_prefixes = COMMON_PREFIX_RE
        .captures_iter(xml)
        .map(|caps| unescape_xml(&caps[1]))
        .collect();
    let keys = CONTENTS_KEY_RE
        .captures_iter(xml)
        .map(|caps| unescape_xml(&caps[1]))
        .collect();
    let next_token = if TRUNCATED_RE.is_match(xml) {
        NEXT_TOKEN_RE
            .captures(xml)
            .map(|caps| unescape_xml(&caps[1]))
            .filter(|token| !token.is_empty())
    } else {
        None
    };
    ListPage {
        common_prefixes,
        keys,
        next_token,
    }
}

pub fn unescape_xml(value: &str) -> String {
    let value = CHAR_REF_RE.replace_all(value, |caps: &regex::Captures<'_>| {
        let reference = &caps[1];
        let code = match reference.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => reference.parse::<u32>().ok(),
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
