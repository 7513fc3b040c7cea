//! Terminal feedback: toast notifications, field-error annotation and the
//! mapping from client failures to user-facing messages.

use std::io::{self, Write};
use std::time::Duration;

use crate::client::ClientError;
use crate::config::messages;
use crate::form::field_hint;
use crate::validation::FieldErrors;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Info,
    Warning,
    Error,
}

impl ToastKind {
    fn label(self) -> &'static str {
        match self {
            ToastKind::Success => "ok",
            ToastKind::Info => "info",
            ToastKind::Warning => "warn",
            ToastKind::Error => "error",
        }
    }

    pub fn default_duration(self) -> Duration {
        match self {
            ToastKind::Error => Duration::from_secs(6),
            ToastKind::Warning => Duration::from_secs(5),
            ToastKind::Success | ToastKind::Info => Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
    pub duration: Duration,
}

impl Toast {
    pub fn new(kind: ToastKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            duration: kind.default_duration(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ToastKind::Success, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(ToastKind::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(ToastKind::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ToastKind::Error, message)
    }
}

/// Writes toasts to a terminal stream and keeps a history of what was shown.
pub struct Notifier<W: Write> {
    out: W,
    shown: Vec<Toast>,
}

impl Notifier<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write> Notifier<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            shown: Vec::new(),
        }
    }

    pub fn show(&mut self, toast: Toast) {
        // Write errors are ignored.
        let _ = writeln!(self.out, "[{}] {}", toast.kind.label(), toast.message);
        self.shown.push(toast);
    }

    pub fn shown(&self) -> &[Toast] {
        &self.shown
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    RateLimited,
    Unauthorized,
    NotFound,
    Network,
    Server,
    Unknown,
}

pub fn categorize(err: &ClientError) -> ErrorCategory {
    match err {
        ClientError::Network(inner) if inner.status().is_some_and(|s| s.is_server_error()) => {
            ErrorCategory::Server
        }
        ClientError::Network(_) => ErrorCategory::Network,
        ClientError::Api { status, kind, .. } => match (*status, kind.as_str()) {
            (_, "validation_error") | (400, _) | (422, _) => ErrorCategory::Validation,
            (429, _) => ErrorCategory::RateLimited,
            (401, _) | (403, _) => ErrorCategory::Unauthorized,
            (404, _) => ErrorCategory::NotFound,
            (500..=599, _) => ErrorCategory::Server,
            _ => ErrorCategory::Unknown,
        },
        ClientError::Decode(_) | ClientError::InvalidUrl(_) => ErrorCategory::Unknown,
    }
}

/// The message and toast for a failed request.
pub fn error_toast(err: &ClientError) -> Toast {
    let message = match categorize(err) {
        ErrorCategory::Validation | ErrorCategory::NotFound => err.to_string(),
        ErrorCategory::RateLimited => messages::RATE_LIMITED.to_string(),
        ErrorCategory::Unauthorized => {
            "Please sign in (pass --user) to manage saved profiles.".to_string()
        }
        ErrorCategory::Network => messages::NETWORK_ERROR.to_string(),
        ErrorCategory::Server => match err {
            ClientError::Api { message, .. } if !message.is_empty() => {
                format!("{} ({message})", messages::SERVER_ERROR)
            }
            _ => messages::SERVER_ERROR.to_string(),
        },
        ErrorCategory::Unknown => format!("Something went wrong: {err}"),
    };
    match categorize(err) {
        ErrorCategory::Validation | ErrorCategory::RateLimited => Toast::warning(message),
        _ => Toast::error(message),
    }
}

pub fn report_error<W: Write>(notifier: &mut Notifier<W>, err: &ClientError) {
    tracing::debug!(category = ?categorize(err), "request failed: {err}");
    notifier.show(error_toast(err));
}

/// One line per failing field, in the given field order.
pub fn annotate_field_errors(fields: &[&str], errors: &FieldErrors) -> String {
    fields
        .iter()
        .filter_map(|field| {
            errors.get(*field).map(|message| {
                let hint = field_hint(field);
                let label = if hint.is_empty() { *field } else { hint };
                format!("  ! {label}: {message}\n")
            })
        })
        .collect()
}
