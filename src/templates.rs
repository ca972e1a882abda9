use askama::Template;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use time::OffsetDateTime;
use tower_sessions::{session::Error as SessionError, Session};
use tracing::error;

use crate::{
    app_state::AppState,
    csrf,
    sessions::{current_user, SessionUser},
};

/// Shared layout context injected into all templates
#[derive(Clone, Debug)]
pub struct LayoutContext {
    pub title: String,
    pub brand_name: String,
    pub csrf_token: Option<String>,
    pub username: Option<String>,
    pub current_year: i32,
}

impl LayoutContext {
    /// Build a layout context using the configured brand name
    pub fn from_state(state: &AppState, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            brand_name: state.config().ui.brand_name.clone(),
            csrf_token: None,
            username: None,
            current_year: OffsetDateTime::now_utc().year(),
        }
    }

    /// Build a layout context carrying the session's CSRF token and signed-in user.
    pub async fn from_session(
        state: &AppState,
        session: &Session,
        title: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let token = csrf::ensure_csrf_token(session).await?;
        let user = current_user(session).await?;

        let mut layout = Self::from_state(state, title);
        layout.csrf_token = Some(token);
        layout.username = user.map(|user| user.username);
        Ok(layout)
    }

    /// Token for hidden form fields; empty when the session could not provide one.
    pub fn csrf_value(&self) -> &str {
        self.csrf_token.as_deref().unwrap_or_default()
    }
}

/// Status line shown above the dashboard after a form submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Flash {
    pub message: String,
    pub is_error: bool,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: true,
        }
    }
}

/// Wrapper that converts Askama templates into Axum responses with logging
pub struct HtmlTemplate<T: Template> {
    template: T,
    status: StatusCode,
}

impl<T: Template> HtmlTemplate<T> {
    pub fn new(template: T) -> Self {
        Self {
            template,
            status: StatusCode::OK,
        }
    }

    pub fn with_status(template: T, status: StatusCode) -> Self {
        Self { template, status }
    }
}

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.template.render() {
            Ok(html) => (self.status, Html(html)).into_response(),
            Err(err) => {
                error!(target: "templates", error = %err, "failed to render template");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Template rendering error",
                )
                    .into_response()
            }
        }
    }
}

#[derive(Template)]
#[template(path = "login.html", escape = "html")]
pub struct LoginTemplate {
    pub layout: LayoutContext,
    pub username: String,
    pub error_message: Option<String>,
}

impl LoginTemplate {
    pub fn new(layout: LayoutContext) -> Self {
        Self {
            layout,
            username: String::new(),
            error_message: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

#[derive(Template)]
#[template(path = "dashboard.html", escape = "html")]
pub struct DashboardTemplate {
    pub layout: LayoutContext,
    pub user: SessionUser,
    pub files: Vec<String>,
    pub flash: Option<Flash>,
    pub max_upload_display: String,
    pub allowed_summary: String,
}

impl DashboardTemplate {
    pub fn new(layout: LayoutContext, user: SessionUser) -> Self {
        Self {
            layout,
            user,
            files: Vec::new(),
            flash: None,
            max_upload_display: String::new(),
            allowed_summary: String::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    pub fn with_flash(mut self, flash: Option<Flash>) -> Self {
        self.flash = flash;
        self
    }

    pub fn with_upload_limits(mut self, max_upload_display: String, allowed_summary: String) -> Self {
        self.max_upload_display = max_upload_display;
        self.allowed_summary = allowed_summary;
        self
    }
}
