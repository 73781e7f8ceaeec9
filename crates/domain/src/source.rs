use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::DomainError;

static VIDEO_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(https?://)?(www\.)?(youtube\.com|youtu\.be)/.+").expect("valid video url pattern")
});

/// A link to a hosted video whose audio track a download collaborator can
/// resolve into bytes. The engine only validates the shape.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct VideoUrl(String);

impl VideoUrl {
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        let trimmed = value.trim();
        if VIDEO_URL.is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(DomainError::validation(format!(
                "`{value}` is not a recognized video URL"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<VideoUrl> for String {
    fn from(url: VideoUrl) -> Self {
        url.0
    }
}

impl TryFrom<String> for VideoUrl {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        VideoUrl::parse(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_video_hosting_shapes() {
        for url in [
            "https://www.youtube.com/watch?v=abc",
            "http://youtube.com/watch?v=abc",
            "youtu.be/abc",
            " https://youtu.be/abc ",
        ] {
            assert!(VideoUrl::parse(url).is_ok(), "{url}");
        }
    }

    #[test]
    fn rejects_other_urls() {
        for url in [
            "https://vimeo.com/123",
            "https://www.youtube.com/",
            "ftp://youtube.com/watch",
            "",
        ] {
            assert!(VideoUrl::parse(url).is_err(), "{url}");
        }
    }
}
