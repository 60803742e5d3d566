//! URL helpers.

use url::Url;

use crate::ProviderError;

/// Extract a usable filename from the final path segment of a URL.
///
/// Rejects URLs with an empty path and "filenames" that are only dots.
pub fn filename_from_url(input: &str) -> Result<String, ProviderError> {
    let url = Url::parse(input)
        .map_err(|e| ProviderError::MatchFailed(format!("invalid URL: {e}")))?;
    let path = url.path().trim_matches('/');
    if path.is_empty() {
        return Err(ProviderError::MatchFailed("cannot extract filename".into()));
    }
    let filename = path.rsplit('/').next().unwrap_or_default();
    if filename.is_empty() || filename.replace('.', "").is_empty() {
        return Err(ProviderError::MatchFailed("cannot extract filename".into()));
    }
    Ok(filename.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_last_segment() {
        assert_eq!(
            filename_from_url("https://host/videos/a.mp4").unwrap(),
            "a.mp4"
        );
        assert_eq!(
            filename_from_url("https://host/a.mp4?key=value").unwrap(),
            "a.mp4"
        );
    }

    #[test]
    fn trims_trailing_slash() {
        assert_eq!(filename_from_url("https://host/a.mp4/").unwrap(), "a.mp4");
    }

    #[test]
    fn rejects_empty_path() {
        assert!(filename_from_url("https://host/").is_err());
        assert!(filename_from_url("https://host").is_err());
    }

    #[test]
    fn rejects_dot_only_names() {
        assert!(filename_from_url("https://host/..").is_err());
    }

    #[test]
    fn rejects_invalid_url() {
        assert!(filename_from_url("not a url").is_err());
    }
}
