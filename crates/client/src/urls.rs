use snafu::{OptionExt, ResultExt};
use url::Url;

use crate::error::{ClientResult, InvalidUrlSnafu, UnsupportedSchemeSnafu, UrlCannotBeBaseSnafu};

/// Trims, strips trailing slashes and defaults to `http://` when no scheme is given.
pub fn normalize_api_base(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }

    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

/// Joins encoded path segments onto the base, keeping any base path prefix.
pub fn endpoint(base: &str, segments: &[&str]) -> ClientResult<Url> {
    let normalized = normalize_api_base(base);
    let mut url = Url::parse(&normalized).context(InvalidUrlSnafu {
        stage: "parse-api-base",
        raw: normalized.clone(),
    })?;

    {
        let mut path = url.path_segments_mut().ok().context(UrlCannotBeBaseSnafu {
            stage: "extend-endpoint-path",
            raw: normalized.clone(),
        })?;
        path.pop_if_empty().extend(segments);
    }

    Ok(url)
}

/// Builds the push-stream url: `http` maps to `ws`, `https` to `wss`.
pub fn build_websocket_url(base: &str, segments: &[&str]) -> ClientResult<Url> {
    let mut url = endpoint(base, segments)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return UnsupportedSchemeSnafu {
                stage: "map-websocket-scheme",
                scheme: other.to_string(),
            }
            .fail();
        }
    };

    if url.set_scheme(scheme).is_err() {
        return UnsupportedSchemeSnafu {
            stage: "set-websocket-scheme",
            scheme: scheme.to_string(),
        }
        .fail();
    }
    Ok(url)
}
