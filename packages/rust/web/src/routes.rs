//! HTTP routes: the landing page and the `/w` archive endpoint.

use std::sync::Mutex;

use askama::Template;
use async_trait::async_trait;
use axum::Router;
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{any, get};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use wayback_core::{Channel, Format, Reply, ReplySink, ServiceContext, render_entries};
use wayback_shared::{Result, SlotInfo};

/// Build the router serving `/` and `/w`.
pub fn router(ctx: ServiceContext) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/w", any(archive))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

// ---------------------------------------------------------------------------
// Landing page
// ---------------------------------------------------------------------------

#[derive(Template)]
#[template(path = "index.html", escape = "html")]
struct IndexTemplate<'a> {
    title: &'a str,
    slots: Vec<&'a SlotInfo>,
}

async fn home(State(ctx): State<ServiceContext>) -> Response {
    let template = IndexTemplate {
        title: "Wayback",
        slots: ctx.registry.enabled().collect(),
    };
    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!(error = %e, "failed to render landing page");
            internal_error()
        }
    }
}

// ---------------------------------------------------------------------------
// Archive endpoint
// ---------------------------------------------------------------------------

/// Form body accepted by `/w`.
#[derive(Debug, Deserialize)]
struct Submission {
    #[serde(default)]
    text: String,
    #[serde(rename = "data-type")]
    data_type: Option<String>,
}

async fn archive(
    State(ctx): State<ServiceContext>,
    method: Method,
    form: std::result::Result<Form<Submission>, FormRejection>,
) -> Response {
    if method != Method::POST {
        info!(%method, "rejecting non-POST request");
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "POST")],
            "Method Not Allowed",
        )
            .into_response();
    }

    let Form(submission) = match form {
        Ok(form) => form,
        Err(rejection) => {
            info!(error = %rejection, "rejecting unparsable form");
            return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
        }
    };

    if submission.text.trim().is_empty() {
        info!("rejecting empty submission");
        return (StatusCode::LENGTH_REQUIRED, "Length Required").into_response();
    }
    debug!(chars = submission.text.len(), "received submission");

    let format = Format::from_data_type(submission.data_type.as_deref());
    let sink = WebSink::new(format);
    ctx.pipeline.run(&submission.text, &sink).await;

    match sink.take() {
        Some(body) => ([(header::CONTENT_TYPE, format.content_type())], body).into_response(),
        None => internal_error(),
    }
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

/// Captures the rendered body so the handler can return it.
struct WebSink {
    format: Format,
    body: Mutex<Option<String>>,
}

impl WebSink {
    fn new(format: Format) -> Self {
        Self {
            format,
            body: Mutex::new(None),
        }
    }

    fn take(&self) -> Option<String> {
        self.body.lock().ok().and_then(|mut body| body.take())
    }
}

#[async_trait]
impl ReplySink for WebSink {
    fn channel(&self) -> Channel {
        Channel::Web
    }

    async fn render(&self, reply: &Reply<'_>) -> Result<()> {
        let rendered = render_entries(&reply.entries(), self.format)?;
        if let Ok(mut body) = self.body.lock() {
            *body = Some(rendered);
        }
        Ok(())
    }
}
