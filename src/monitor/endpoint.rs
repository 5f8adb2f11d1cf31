use std::sync::LazyLock;

use axum::http::Method;
use regex::Regex;

static NUMERIC_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\d+").expect("numeric id pattern"));
static UUID_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/[0-9a-fA-F-]{36}").expect("uuid pattern"));
static EMAIL_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/[\w.+-]+@[\w-]+\.[\w.]+").expect("email pattern"));

/// Collapses variable path segments so that `/accounts/42` and
/// `/accounts/7` aggregate under one key. Purely textual, so the result is
/// the same no matter which concrete id shows up first.
pub fn normalize_path(path: &str) -> String {
    let path = UUID_SEGMENT.replace_all(path, "/:uuid");
    let path = EMAIL_SEGMENT.replace_all(&path, "/:email");
    let path = NUMERIC_ID.replace_all(&path, "/:id");
    path.into_owned()
}

/// Canonical aggregation key: `METHOD:normalized-path`.
pub fn endpoint_key(method: &Method, path: &str) -> String {
    format!("{}:{}", method, normalize_path(path))
}
