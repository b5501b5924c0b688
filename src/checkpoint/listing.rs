//! checkpoint::listing
//!
//! HTML directory listings.

use std::fmt::Write;

/// Renders directory listings as HTML.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Renderer {
    title: Option<String>,
}

impl Renderer {
    /// A renderer using `title` for the `<title>` element instead of the
    /// heading text.
    pub fn new(title: Option<String>) -> Self {
        Self { title }
    }

    /// Render a listing of `entries` under `path`.
    ///
    /// Directory entries should carry their trailing `/`.
    pub fn render(&self, path: &str, entries: &[String]) -> String {
        let heading = format!("Index of {}", escape(path));
        let title = self.title.as_deref().map(escape).unwrap_or_else(|| heading.clone());

        let mut body = String::new();
        body.push_str("<!DOCTYPE html>\n<html>\n");
        let _ = writeln!(body, "<head><title>{title}</title></head>");
        body.push_str("<body>\n");
        let _ = writeln!(body, "<h1>{heading}</h1>");
        body.push_str("<hr><pre>\n");
        if path != "/" {
            body.push_str("<a href=\"../\">../</a>\n");
        }
        for entry in entries {
            let entry = escape(entry);
            let _ = writeln!(body, "<a href=\"{entry}\">{entry}</a>");
        }
        body.push_str("</pre><hr>\n</body>\n</html>\n");
        body
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_names_the_path() {
        let body = Renderer::default().render("/cp/", &["20240501T120000Z/".to_string()]);
        assert!(body.contains("<h1>Index of /cp/</h1>"));
        assert!(body.contains("<title>Index of /cp/</title>"));
        assert!(body.contains("<a href=\"20240501T120000Z/\">20240501T120000Z/</a>"));
        assert!(body.contains("../"));
    }

    #[test]
    fn root_has_no_parent_link() {
        let body = Renderer::default().render("/", &[]);
        assert!(!body.contains("../"));
    }

    #[test]
    fn custom_title_and_escaping() {
        let renderer = Renderer::new(Some("Snapshots".to_string()));
        let body = renderer.render("/a/", &["x<y>&\"z\"".to_string()]);
        assert!(body.contains("<title>Snapshots</title>"));
        assert!(body.contains("x&lt;y&gt;&amp;&quot;z&quot;"));
        assert!(!body.contains("x<y>"));
    }
}
