//! The terminal result of a request, and its one conversion to HTTP.

use serde_json::Value;

use crate::context::RequestContext;
use crate::http::{Response, StatusCode};

const JSON_CONTENT_TYPE: &str = "application/json";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// A redirect, resolved against the request when the reply is written.
///
/// ```
/// use simplectl::controller::Redirect;
///
/// let r = Redirect::to("/login").permanent();
/// assert_eq!(r.location(), Some("/login"));
/// assert!(r.is_permanent());
/// assert_eq!(Redirect::current().location(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    location: Option<String>,
    permanent: bool,
}

impl Redirect {
    /// A `302` to `url`. An empty URL means the current request URL.
    pub fn to(url: impl Into<String>) -> Self {
        let url = url.into();
        let url = url.trim();
        Self {
            location: (!url.is_empty()).then(|| url.to_owned()),
            permanent: false,
        }
    }

    /// A `302` back to the URL the client requested.
    pub fn current() -> Self {
        Self {
            location: None,
            permanent: false,
        }
    }

    /// Turns this into a `301`.
    #[must_use]
    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    /// `301` if permanent; otherwise `302`, or `204` for fetch clients.
    pub fn status(&self, fetch: bool) -> StatusCode {
        match (self.permanent, fetch) {
            (true, _) => StatusCode::MovedPermanently,
            (false, true) => StatusCode::NoContent,
            (false, false) => StatusCode::Found,
        }
    }
}

/// How a request ends. Produced by the lifecycle, written by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A rendered page, always `200`.
    Page { body: String, content_type: String },
    Json { status: StatusCode, value: Value },
    /// Plain text. Surrounding whitespace is trimmed on the way out.
    Text { status: StatusCode, body: String },
    Redirect(Redirect),
    /// Nothing but a status.
    Empty { status: StatusCode },
}

impl Reply {
    pub fn page(body: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self::Page {
            body: body.into(),
            content_type: content_type.into(),
        }
    }

    pub fn json(status: StatusCode, value: Value) -> Self {
        Self::Json { status, value }
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::Text {
            status,
            body: body.into(),
        }
    }

    /// An empty `200`.
    pub fn empty() -> Self {
        Self::Empty {
            status: StatusCode::Ok,
        }
    }

    /// The status this reply is sent with for `ctx`.
    pub fn status(&self, ctx: &RequestContext) -> StatusCode {
        match self {
            Self::Page { .. } => StatusCode::Ok,
            Self::Json { status, .. } | Self::Text { status, .. } | Self::Empty { status } => {
                *status
            }
            Self::Redirect(redirect) => redirect.status(ctx.is_fetch()),
        }
    }

    /// Builds the HTTP response.
    ///
    /// ```
    /// use simplectl::context::RequestContext;
    /// use simplectl::controller::Reply;
    /// use simplectl::http::StatusCode;
    ///
    /// let ctx = RequestContext::builder().build();
    /// let response = Reply::text(StatusCode::NotFound, "Unknown service!\n").into_response(&ctx);
    /// assert_eq!(response.status(), StatusCode::NotFound);
    /// assert_eq!(response.payload(), b"Unknown service!");
    /// ```
    pub fn into_response(self, ctx: &RequestContext) -> Response {
        let status = self.status(ctx);
        let response = Response::new(status);

        match self {
            Self::Page { body, content_type } => {
                response.header("Content-Type", content_type).body(body)
            }
            Self::Json { value, .. } => response
                .header("Content-Type", JSON_CONTENT_TYPE)
                .body(value.to_string()),
            Self::Text { body, .. } => {
                let body = body.trim();
                if body.is_empty() {
                    response
                } else {
                    response.header("Content-Type", TEXT_CONTENT_TYPE).body(body)
                }
            }
            Self::Redirect(redirect) => {
                let location = redirect
                    .location()
                    .unwrap_or_else(|| ctx.target())
                    .to_owned();
                response.header("Location", location)
            }
            Self::Empty { .. } => response,
        }
    }
}
