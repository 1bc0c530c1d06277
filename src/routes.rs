//! Console route table.
//!
//! Every page is addressed by a slash-separated path such as
//! `objects/my-bucket`. Static segments must match exactly, `:name` segments
//! capture the raw (still percent-encoded) path segment.

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;
use serde::Serialize;

/// Static page metadata; every field is a template formatted against the
/// route parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteData {
    pub title: Option<&'static str>,
    pub sub_title: Option<&'static str>,
    pub url: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Page {
    Dashboard,
    Buckets,
    BucketCreate,
    BucketEdit,
    Objects,
}

#[derive(Debug, Clone, Copy)]
pub enum Target {
    Page(Page),
    Redirect(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub path: &'static str,
    pub data: RouteData,
    pub target: Target,
}

const BUCKET_TITLE: Option<&str> = Some("Bucket:");

pub static ROUTES: &[Route] = &[
    Route {
        path: "",
        data: RouteData { title: None, sub_title: None, url: None },
        target: Target::Redirect("dashboard"),
    },
    Route {
        path: "dashboard",
        data: RouteData { title: Some("Dashboard"), sub_title: None, url: None },
        target: Target::Page(Page::Dashboard),
    },
    Route {
        path: "buckets",
        data: RouteData { title: Some("Buckets"), sub_title: None, url: None },
        target: Target::Page(Page::Buckets),
    },
    Route {
        path: "buckets/create",
        data: RouteData { title: BUCKET_TITLE, sub_title: Some("Create"), url: Some("..") },
        target: Target::Page(Page::BucketCreate),
    },
    Route {
        path: "buckets/edit/:bid",
        data: RouteData { title: BUCKET_TITLE, sub_title: Some("{{ bid }}"), url: Some("../..") },
        target: Target::Page(Page::BucketEdit),
    },
    Route {
        path: "objects/:bid",
        data: RouteData {
            title: BUCKET_TITLE,
            sub_title: Some("{{ bid }}"),
            url: Some("../../buckets"),
        },
        target: Target::Page(Page::Objects),
    },
];

/// Raw path parameters captured by a route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteParams(BTreeMap<String, String>);

impl RouteParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, raw: &str) -> Self {
        self.0.insert(name.to_string(), raw.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Percent-decoded copy of every parameter.
    pub fn decoded(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(name, raw)| (name.clone(), decode(raw)))
            .collect()
    }
}

/// Percent-decodes a path segment; invalid UTF-8 is replaced lossily.
pub fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// Path after following redirects, without surrounding slashes
    pub path: String,
    pub page: Page,
    pub data: RouteData,
    pub params: RouteParams,
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn match_route(route: &Route, parts: &[&str]) -> Option<RouteParams> {
    let pattern = segments(route.path);
    if pattern.len() != parts.len() {
        return None;
    }

    let mut params = RouteParams::new();
    for (expected, actual) in pattern.iter().zip(parts) {
        match expected.strip_prefix(':') {
            Some(name) => params = params.with(name, actual),
            None if expected == actual => {}
            None => return None,
        }
    }
    Some(params)
}

/// Finds the page for `path`, following redirects.
pub fn resolve(path: &str) -> Option<RouteMatch> {
    let mut parts = segments(path.split(['?', '#']).next().unwrap_or_default());

    // The table has a single level of redirects; the bound guards against
    // accidental cycles.
    for _ in 0..ROUTES.len() {
        let (route, params) = ROUTES
            .iter()
            .find_map(|route| match_route(route, &parts).map(|params| (route, params)))?;

        match route.target {
            Target::Page(page) => {
                return Some(RouteMatch {
                    path: parts.join("/"),
                    page,
                    data: route.data,
                    params,
                })
            }
            Target::Redirect(to) => parts = segments(to),
        }
    }

    tracing::warn!("Redirect loop while resolving '{}'", path);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_path_redirects_to_dashboard() {
        let matched = resolve("/").unwrap();
        assert_eq!(matched.page, Page::Dashboard);
        assert_eq!(matched.path, "dashboard");
        assert_eq!(matched.data.title, Some("Dashboard"));
    }

    #[test]
    fn captures_raw_bucket_parameter() {
        let matched = resolve("/objects/my%20bucket/").unwrap();
        assert_eq!(matched.page, Page::Objects);
        assert_eq!(matched.params.get("bid"), Some("my%20bucket"));
        assert_eq!(matched.params.decoded()["bid"], "my bucket");
    }

    #[test]
    fn static_segments_win_over_parameters() {
        assert_eq!(resolve("buckets/create").unwrap().page, Page::BucketCreate);
        let edit = resolve("buckets/edit/photos?tab=1").unwrap();
        assert_eq!(edit.page, Page::BucketEdit);
        assert_eq!(edit.params.get("bid"), Some("photos"));
    }

    #[test]
    fn unknown_paths_do_not_resolve() {
        assert!(resolve("objects").is_none());
        assert!(resolve("buckets/edit").is_none());
        assert!(resolve("settings").is_none());
    }
}
