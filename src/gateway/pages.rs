//! User-visible HTML error pages.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// 502 shown while a workspace machine is being provisioned or restarted.
/// The page reloads itself; repeated reloads are the retry loop.
pub fn starting_workspace() -> Response {
    const BODY: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta http-equiv="refresh" content="3">
  <title>Starting workspace</title>
  <style>
    body { font-family: system-ui, sans-serif; display: grid; place-items: center; min-height: 100vh; margin: 0; color: #333; }
    p { color: #777; }
  </style>
</head>
<body>
  <main>
    <h1>Starting your workspace&hellip;</h1>
    <p>This can take a few seconds. The page reloads automatically.</p>
  </main>
</body>
</html>
"#;
    (
        StatusCode::BAD_GATEWAY,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        BODY,
    )
        .into_response()
}

/// 404 for hosts that carry `--` somewhere but do not name a workspace.
pub fn invalid_subdomain() -> Response {
    const BODY: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Not a workspace</title>
</head>
<body>
  <h1>Not a valid workspace subdomain</h1>
  <p>Workspace addresses look like <code>user--repo.&lt;domain&gt;</code>.</p>
</body>
</html>
"#;
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        BODY,
    )
        .into_response()
}

/// Plain 502 for subdomains that look like a workspace but cannot be parsed.
pub fn malformed_subdomain() -> Response {
    (
        StatusCode::BAD_GATEWAY,
        "could not parse workspace subdomain",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_page_auto_reloads() {
        let response = starting_workspace();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/html"));
    }

    #[test]
    fn invalid_subdomain_is_404_html() {
        let response = invalid_subdomain();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn malformed_subdomain_is_plain_502() {
        let response = malformed_subdomain();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let content_type = response.headers().get(header::CONTENT_TYPE);
        assert!(content_type
            .map_or(true, |v| !v.to_str().unwrap_or_default().starts_with("text/html")));
    }
}
