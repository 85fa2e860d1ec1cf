#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read line {line} of mountinfo: {source}")]
    ReadLine {
        line: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse line {line} of mountinfo: {source}")]
    Parse {
        line: usize,
        #[source]
        source: super::parser::ParseError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
