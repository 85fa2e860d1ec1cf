use std::path::{Path, PathBuf};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode, header};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::models::ApiMessage;
use super::{Error, Result};

/// Engine API version every request is pinned to.
const API_VERSION: &str = "v1.41";

/// Default location of the Docker daemon socket.
pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Minimal HTTP/1.1 client for the Docker daemon's unix socket.
///
/// Opens one connection per request; the daemon closes hijacked exec streams anyway.
#[derive(Debug, Clone)]
pub struct UnixClient {
    socket_path: PathBuf,
}

/// Status and fully collected body of a daemon response.
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl UnixClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Builds a client from a `DOCKER_HOST` value, falling back to [`DEFAULT_SOCKET`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedHost`] for non-unix hosts such as `tcp://`.
    pub fn from_docker_host(docker_host: Option<&str>) -> Result<Self> {
        match docker_host {
            None | Some("") => Ok(Self::new(DEFAULT_SOCKET)),
            Some(host) => host
                .strip_prefix("unix://")
                .map(Self::new)
                .ok_or_else(|| Error::UnsupportedHost(host.to_owned())),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sends a request and decodes a JSON answer, mapping non-2xx statuses to
    /// [`Error::Api`].
    pub async fn json<B, R>(&self, method: Method, path: &str, body: Option<&B>) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.send(method, path, body).await?;
        serde_json::from_slice(&response.body).map_err(|source| Error::Decode {
            path: path.to_owned(),
            source,
        })
    }

    /// Sends a request and returns the raw body of a successful answer.
    pub async fn send<B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<RawResponse>
    where
        B: Serialize + ?Sized,
    {
        let response = self.open(method, path, encode(path, body)?).await?;
        let status = response.status();
        let body = collect(response).await?;
        if !status.is_success() {
            return Err(Error::Api {
                path: path.to_owned(),
                status,
                message: api_message(&body),
            });
        }

        Ok(RawResponse { status, body })
    }

    /// Sends a request and hands back the body of a successful answer unread, for
    /// callers that consume it frame by frame.
    pub async fn stream<B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<Incoming>
    where
        B: Serialize + ?Sized,
    {
        let response = self.open(method, path, encode(path, body)?).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                path: path.to_owned(),
                status,
                message: api_message(&collect(response).await?),
            });
        }

        Ok(response.into_body())
    }

    async fn open(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Response<Incoming>> {
        log::trace!("{} {} via {}", method, path, self.socket_path.display());
        let stream = tokio::net::UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| Error::SocketConnect {
                path: self.socket_path.clone(),
                source,
            })?;

        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(Error::Http)?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                log::debug!("docker connection closed with error: {err}");
            }
        });

        let mut builder = Request::builder()
            .method(method)
            .uri(format!("/{API_VERSION}{path}"))
            .header(header::HOST, "docker");
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Full::new(Bytes::from(json))
            }
            None => Full::new(Bytes::new()),
        };
        let request = builder.body(body).map_err(|source| Error::Request {
            path: path.to_owned(),
            source,
        })?;

        sender.send_request(request).await.map_err(Error::Http)
    }
}

fn encode<B: Serialize + ?Sized>(path: &str, body: Option<&B>) -> Result<Option<Vec<u8>>> {
    body.map(serde_json::to_vec)
        .transpose()
        .map_err(|source| Error::Decode {
            path: path.to_owned(),
            source,
        })
}

async fn collect(response: Response<Incoming>) -> Result<Bytes> {
    Ok(response
        .into_body()
        .collect()
        .await
        .map_err(Error::Http)?
        .to_bytes())
}

/// Extracts the daemon's `{"message": ...}` error text, falling back to the raw body.
fn api_message(body: &[u8]) -> String {
    serde_json::from_slice::<ApiMessage>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_socket() {
        let client = UnixClient::from_docker_host(None).unwrap();
        assert_eq!(client.socket_path(), Path::new(DEFAULT_SOCKET));
    }

    #[test]
    fn test_unix_docker_host() {
        let client = UnixClient::from_docker_host(Some("unix:///run/user/1000/docker.sock")).unwrap();
        assert_eq!(client.socket_path(), Path::new("/run/user/1000/docker.sock"));
    }

    #[test]
    fn test_tcp_docker_host_rejected() {
        let err = UnixClient::from_docker_host(Some("tcp://10.0.0.2:2375")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedHost(_)));
    }

    #[test]
    fn test_api_message() {
        assert_eq!(
            api_message(br#"{"message":"No such container: web"}"#),
            "No such container: web"
        );
        assert_eq!(api_message(b"page not found\n"), "page not found");
    }

    #[tokio::test]
    async fn test_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let client = UnixClient::new(dir.path().join("docker.sock"));
        let err = client
            .send::<()>(Method::GET, "/_ping", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SocketConnect { .. }));
    }
}
