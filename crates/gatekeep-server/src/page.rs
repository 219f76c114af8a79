//! The not-found page.
//!
//! Router misses, unmatched paths and upstream 404s all render the same page. A template
//! that fails to render falls back to plain text.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Built-in page template.
pub const DEFAULT_NOT_FOUND_TEMPLATE: &str = "<html><head><title>{{title}}</title></head>\
<body><p>Page not found</p><p>{{error}}</p></body></html>";

/// A template could not be rendered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("unclosed placeholder at byte {0}")]
    Unclosed(usize),

    #[error("unknown placeholder '{0}'")]
    UnknownPlaceholder(String),
}

/// Not-found page renderer.
#[derive(Debug, Clone)]
pub struct NotFoundPage {
    template: String,
}

impl Default for NotFoundPage {
    fn default() -> Self {
        Self::new(DEFAULT_NOT_FOUND_TEMPLATE)
    }
}

impl NotFoundPage {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Substitute `{{title}}` and `{{error}}`, HTML-escaping both values.
    pub fn render(&self, title: &str, error: &str) -> Result<String, PageError> {
        let mut out = String::with_capacity(self.template.len() + error.len());
        let mut rest = self.template.as_str();
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or(PageError::Unclosed(offset + start))?;
            match after[..end].trim() {
                "title" => out.push_str(&escape_html(title)),
                "error" => out.push_str(&escape_html(error)),
                other => return Err(PageError::UnknownPlaceholder(other.to_string())),
            }
            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// A 404 response for `error`.
    pub fn response(&self, error: &str) -> Response {
        let title = StatusCode::NOT_FOUND
            .canonical_reason()
            .unwrap_or("Not Found");
        match self.render(title, error) {
            Ok(html) => (
                StatusCode::NOT_FOUND,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                html,
            )
                .into_response(),
            Err(e) => {
                tracing::error!(error = %e, "failed to render not-found page");
                (
                    StatusCode::NOT_FOUND,
                    [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                    format!("{}\n", error),
                )
                    .into_response()
            }
        }
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
