use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Source of report bodies. Transport errors are `Err`; HTTP error statuses are not.
pub trait HttpGet {
    fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// Synchronous client over `reqwest::blocking` with an explicit timeout.
pub struct BlockingHttp {
    client: reqwest::blocking::Client,
}

impl BlockingHttp {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpGet for BlockingHttp {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        log::debug!("GET {}", url);
        let response = self.client.get(url).send()?;
        let status = response.status().as_u16();
        let body = response.bytes()?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

/// Serves reports from a local directory laid out like the remote API.
///
/// The path after `root_url` is resolved under `dir`; a missing file is a 404.
pub struct DirectoryReports {
    root_url: String,
    dir: PathBuf,
}

impl DirectoryReports {
    pub fn new<P: AsRef<Path>>(root_url: &str, dir: P) -> Self {
        Self {
            root_url: root_url.trim_end_matches('/').to_string(),
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl HttpGet for DirectoryReports {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        let relative = url
            .strip_prefix(&self.root_url)
            .unwrap_or(url)
            .trim_start_matches('/');
        let path = self.dir.join(relative);

        if !path.is_file() {
            log::debug!("No local report at {}", path.display());
            return Ok(HttpResponse { status: 404, body: Vec::new() });
        }
        Ok(HttpResponse {
            status: 200,
            body: fs::read(path)?,
        })
    }
}
