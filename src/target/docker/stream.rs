//! Decoder for the Engine API's multiplexed raw stream.
//!
//! Without a TTY, `POST /exec/{id}/start` returns stdout and stderr interleaved in
//! frames of the form `[stream, 0, 0, 0, len(u32 BE)] payload`.

const HEADER_LEN: usize = 8;

/// Errors that may occur while demultiplexing an exec stream.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("truncated frame header at offset {offset}")]
    TruncatedHeader { offset: usize },
    #[error("frame at offset {offset} announces {expected} bytes, only {available} available")]
    TruncatedPayload {
        offset: usize,
        expected: usize,
        available: usize,
    },
    #[error("unknown stream type {stream} at offset {offset}")]
    UnknownStream { stream: u8, offset: usize },
}

/// Output of one exec, split by stream.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Demultiplexed {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Splits a raw exec stream into stdout and stderr.
///
/// Stream type `0` (stdin) is written to stdout, as the daemon does.
///
/// # Errors
///
/// Returns a [`StreamError`] if a frame is cut short or carries an unknown stream type.
pub fn demultiplex(raw: &[u8]) -> Result<Demultiplexed, StreamError> {
    split_frames(raw, false)
}

/// Like [`demultiplex`], for a stream that was cut off mid-transfer: a trailing
/// incomplete frame is dropped instead of rejected.
///
/// # Errors
///
/// Returns [`StreamError::UnknownStream`] for a frame with an unknown stream type.
pub fn demultiplex_complete(raw: &[u8]) -> Result<Demultiplexed, StreamError> {
    split_frames(raw, true)
}

fn split_frames(raw: &[u8], allow_truncated: bool) -> Result<Demultiplexed, StreamError> {
    let mut out = Demultiplexed::default();
    let mut offset = 0;

    while offset < raw.len() {
        let Some(header) = raw.get(offset..offset + HEADER_LEN) else {
            if allow_truncated {
                break;
            }
            return Err(StreamError::TruncatedHeader { offset });
        };
        let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let start = offset + HEADER_LEN;
        let Some(payload) = raw.get(start..start + len) else {
            if allow_truncated {
                break;
            }
            return Err(StreamError::TruncatedPayload {
                offset,
                expected: len,
                available: raw.len() - start,
            });
        };

        match header[0] {
            0 | 1 => out.stdout.extend_from_slice(payload),
            2 => out.stderr.extend_from_slice(payload),
            stream => return Err(StreamError::UnknownStream { stream, offset }),
        }
        offset = start + len;
    }

    Ok(out)
}
