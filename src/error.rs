/// Turns a `Result` into an `Option`, logging the error instead of propagating it.
///
/// Used for side inputs whose absence only lowers the quality of a report, such as
/// the image layer history.
pub trait ResultOkLogExt<T, E> {
    /// Logs the error at `warn` with a short context.
    fn ok_warn(self, context: &str) -> Option<T>;
}

impl<T, E> ResultOkLogExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error,
{
    fn ok_warn(self, context: &str) -> Option<T> {
        match self {
            Ok(ok) => Some(ok),
            Err(err) => {
                log::warn!("{context}: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_warn_passes_value_through() {
        let res: Result<u32, std::io::Error> = Ok(7);
        assert_eq!(res.ok_warn("layer history"), Some(7));
    }

    #[test]
    fn test_ok_warn_swallows_error() {
        let res: Result<u32, std::io::Error> = Err(std::io::Error::other("boom"));
        assert_eq!(res.ok_warn("layer history"), None);
    }
}
