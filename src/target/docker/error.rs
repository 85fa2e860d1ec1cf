use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid container reference: {0}")]
    InvalidContainerRef(String),
    #[error("invalid docker host `{0}`: only unix:// sockets are supported")]
    UnsupportedHost(String),
    #[error("failed to connect to socket `{path}`: {source}")]
    SocketConnect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build request for `{path}`: {source}")]
    Request {
        path: String,
        #[source]
        source: hyper::http::Error,
    },
    #[error("http exchange with docker daemon failed: {0}")]
    Http(#[source] hyper::Error),
    #[error("docker daemon answered `{path}` with {status}: {message}")]
    Api {
        path: String,
        status: hyper::StatusCode,
        message: String,
    },
    #[error("failed to decode response of `{path}`: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to demultiplex output of exec `{exec_id}`: {source}")]
    Stream {
        exec_id: String,
        #[source]
        source: super::stream::StreamError,
    },
    #[error("exec `{0}` finished without reporting an exit code")]
    MissingExitCode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
