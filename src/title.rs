use serde::Serialize;

use crate::format::{format, FmtArgs};
use crate::routes::{RouteData, RouteParams};

/// Title block shown above every console page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageTitle {
    pub title: Option<String>,
    pub sub_title: Option<String>,
    /// Relative back-link target
    pub url: Option<String>,
}

impl PageTitle {
    /// Formats the route's metadata against its decoded parameters.
    pub fn project(data: &RouteData, params: &RouteParams) -> Self {
        let args: FmtArgs = params
            .decoded()
            .into_iter()
            .map(|(name, value)| (name, value.into()))
            .collect();
        let render = |template: Option<&str>| template.map(|t| format(t, &args));

        Self {
            title: render(data.title),
            sub_title: render(data.sub_title),
            url: render(data.url),
        }
    }

    /// Browser/window title: `"{app} - {title}"`, followed by the subtitle
    /// when there is one.
    pub fn document_title(&self, app_title: &str) -> Option<String> {
        let title = self.title.as_deref()?;
        let mut out = format!("{} - {}", app_title, title);
        if let Some(sub_title) = &self.sub_title {
            out.push(' ');
            out.push_str(sub_title);
        }
        Some(out)
    }

    /// Resolves the relative back-link against `current_path`.
    pub fn back_link(&self, current_path: &str) -> Option<String> {
        self.url.as_deref().map(|url| resolve_relative(current_path, url))
    }
}

/// Applies a relative link (`..`, `../../buckets`) to an absolute console
/// path, the way a router treats a link placed on that page.
pub fn resolve_relative(current_path: &str, link: &str) -> String {
    if link.starts_with('/') {
        return link.to_string();
    }

    let mut parts: Vec<&str> = current_path.split('/').filter(|s| !s.is_empty()).collect();
    for segment in link.split('/').filter(|s| !s.is_empty()) {
        match segment {
            "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::resolve;

    #[test]
    fn object_page_title_uses_decoded_bucket() {
        let matched = resolve("/objects/my%2Dbucket").unwrap();
        let title = PageTitle::project(&matched.data, &matched.params);

        assert_eq!(title.title.as_deref(), Some("Bucket:"));
        assert_eq!(title.sub_title.as_deref(), Some("my-bucket"));
        assert_eq!(title.url.as_deref(), Some("../../buckets"));
        assert_eq!(
            title.document_title("FreeBucket").as_deref(),
            Some("FreeBucket - Bucket: my-bucket")
        );
        assert_eq!(title.back_link("/objects/my-bucket").as_deref(), Some("/buckets"));
    }

    #[test]
    fn absent_metadata_yields_absent_fields() {
        let matched = resolve("/dashboard").unwrap();
        let title = PageTitle::project(&matched.data, &matched.params);

        assert_eq!(title.title.as_deref(), Some("Dashboard"));
        assert_eq!(title.sub_title, None);
        assert_eq!(title.back_link("/dashboard"), None);
        assert_eq!(title.document_title("FreeBucket").as_deref(), Some("FreeBucket - Dashboard"));
        assert_eq!(PageTitle::default().document_title("FreeBucket"), None);
    }

    #[test]
    fn relative_links_climb_from_the_current_page() {
        assert_eq!(resolve_relative("/buckets/create", ".."), "/buckets");
        assert_eq!(resolve_relative("/buckets/edit/photos", "../.."), "/buckets");
        assert_eq!(resolve_relative("/dashboard", "../../.."), "/");
        assert_eq!(resolve_relative("/objects/a", "/dashboard"), "/dashboard");
    }
}
