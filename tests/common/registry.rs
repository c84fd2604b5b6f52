use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tiny_http::{Header, Request, Response, Server};

use super::blobs::Blob;

pub const REPOSITORY: &str = "docker-local";

pub const IMAGE: &str = "team/app";

pub const TAG: &str = "1.0";

pub const CLIENT_VERSION: &str = "3.99";

pub const TOKEN: &str = "eyToken";

/// Request received by the registry.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub url: String,
    pub authorization: Option<String>,
    pub user_agent: Option<String>,
    pub accept: Option<String>,
}

struct Route {
    status: u16,
    content_type: Option<&'static str>,
    body: Vec<u8>,

    /// Number of requests that get a `503` before the real response.
    failures: usize,
}

/// Fake Artifactory server, with the Docker API and plain file paths.
#[derive(Default)]
pub struct Registry {
    routes: HashMap<String, Route>,
}

/// Handle to a running [`Registry`].
pub struct RunningRegistry {
    pub port: u16,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Response for `path` (including the leading `/`).
    pub fn route(
        mut self,
        path: impl Into<String>,
        content_type: Option<&'static str>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        self.routes.insert(
            path.into(),
            Route {
                status: 200,
                content_type,
                body: body.into(),
                failures: 0,
            },
        );
        self
    }

    /// Respond to `path` with an error.
    pub fn status(mut self, path: impl Into<String>, status: u16) -> Self {
        self.routes.insert(
            path.into(),
            Route {
                status,
                content_type: None,
                body: b"error".to_vec(),
                failures: 0,
            },
        );
        self
    }

    /// The first `failures` requests to `path` get a `503` response.
    pub fn flaky(mut self, path: &str, failures: usize) -> Self {
        if let Some(route) = self.routes.get_mut(path) {
            route.failures = failures;
        }
        self
    }

    /// Manifest for `tag` in the Docker API.
    pub fn manifest(self, tag: &str, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        self.route(manifest_path(tag), Some(content_type), body)
    }

    /// Blobs in the Docker API.
    pub fn blobs<'a>(mut self, blobs: impl IntoIterator<Item = &'a Blob>) -> Self {
        for blob in blobs {
            self = self.route(
                blob_path(&blob.digest),
                Some(blob.media_type),
                blob.data.to_vec(),
            );
        }
        self
    }

    pub fn start(self) -> RunningRegistry {
        let server = Server::http("127.0.0.1:0").expect("start registry server");
        let port = server.server_addr().to_ip().unwrap().port();

        let requests = Arc::new(Mutex::new(Vec::new()));

        let mut routes = self.routes;
        let log = requests.clone();
        std::thread::spawn(move || {
            let timeout = Duration::from_secs(30);
            while let Ok(Some(request)) = server.recv_timeout(timeout) {
                log.lock().unwrap().push(record(&request));
                handle(&mut routes, request);
            }
        });

        RunningRegistry { port, requests }
    }
}

impl RunningRegistry {
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    /// URL of the image manifest in the Artifactory storage.
    pub fn manifest_url(&self) -> String {
        self.url(&format!("{}manifest.json", storage_prefix()))
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn manifest_path(tag: &str) -> String {
    format!("/v2/{REPOSITORY}/{IMAGE}/manifests/{tag}")
}

pub fn blob_path(hex: &str) -> String {
    format!("/v2/{REPOSITORY}/{IMAGE}/blobs/sha256:{hex}")
}

/// Path of the image directory in the Artifactory storage.
pub fn storage_prefix() -> String {
    format!("/artifactory/{REPOSITORY}/{IMAGE}/{TAG}/")
}

fn header(request: &Request, name: &'static str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.to_string())
}

fn record(request: &Request) -> Recorded {
    Recorded {
        url: request.url().to_owned(),
        authorization: header(request, "authorization"),
        user_agent: header(request, "user-agent"),
        accept: header(request, "accept"),
    }
}

fn handle(routes: &mut HashMap<String, Route>, request: Request) {
    let response = match routes.get_mut(request.url()) {
        Some(route) if route.failures > 0 => {
            route.failures -= 1;
            Response::from_data(b"busy".to_vec()).with_status_code(503)
        }

        Some(route) => {
            let mut response =
                Response::from_data(route.body.clone()).with_status_code(route.status);

            if let Some(content_type) = route.content_type {
                response = response
                    .with_header(Header::from_bytes("Content-Type", content_type).unwrap());
            }

            response
        }

        None => Response::from_data(b"Not Found".to_vec()).with_status_code(404),
    };

    let _ = request.respond(response);
}
