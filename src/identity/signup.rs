use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::session::SessionMetadata;
use super::user::generated_avatar_url;
use crate::error::AppError;

pub const NAME_MIN_CHARS: usize = 3;
pub const PASSWORD_MIN_CHARS: usize = 6;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)+$")
        .unwrap_or_else(|e| panic!("email pattern: {e}"))
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignUpField {
    Name,
    Email,
    Password,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: SignUpField,
    pub message: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", join_messages(.0))]
pub struct ValidationErrors(pub Vec<FieldError>);

fn join_messages(errs: &[FieldError]) -> String {
    errs.iter().map(|e| e.message).collect::<Vec<_>>().join("; ")
}

impl ValidationErrors {
    pub fn for_field(&self, field: SignUpField) -> Option<&'static str> {
        self.0.iter().find(|e| e.field == field).map(|e| e.message)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errs: ValidationErrors) -> Self {
        AppError::UserInput { code: "invalid_signup".into(), message: errs.to_string() }
    }
}

/// Raw input of the registration screen.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignUpForm {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl SignUpForm {
    /// Check every field and report all failures at once.
    pub fn validate(&self) -> Result<SignUpRequest, ValidationErrors> {
        // The stored name is the trimmed one, so that is what gets measured.
        let name = self.name.trim();
        let email = self.email.trim();
        let mut errs = Vec::new();

        if name.chars().count() < NAME_MIN_CHARS {
            errs.push(FieldError { field: SignUpField::Name, message: "Nome deve ter pelo menos 3 caracteres" });
        }
        if !EMAIL_RE.is_match(email) {
            errs.push(FieldError { field: SignUpField::Email, message: "Email inválido" });
        }
        if self.password.chars().count() < PASSWORD_MIN_CHARS {
            errs.push(FieldError { field: SignUpField::Password, message: "Senha deve ter pelo menos 6 caracteres" });
        }

        if !errs.is_empty() {
            return Err(ValidationErrors(errs));
        }
        Ok(SignUpRequest { name: name.to_string(), email: email.to_string(), password: self.password.clone() })
    }
}

/// Validated registration, ready for the provider.
#[derive(Clone, PartialEq, Eq)]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for SignUpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignUpRequest")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl SignUpRequest {
    /// Identity metadata stored with the account.
    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata { name: Some(self.name.clone()), avatar_url: Some(generated_avatar_url(&self.name)) }
    }
}
