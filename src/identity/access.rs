use super::bridge::AuthState;
use super::user::User;

pub const LOGIN_PATH: &str = "/login";
pub const HOME_PATH: &str = "/dashboard";

/// What a screen should do given the current auth snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// State not determined yet; show a spinner.
    Pending,
    /// Authenticated area, rendered for this user.
    Granted(User),
    /// Public page, render as is.
    Open,
    Redirect(&'static str),
}

/// Gate for pages behind login.
pub fn protected_route(state: &AuthState) -> Access {
    if state.loading {
        return Access::Pending;
    }
    match &state.user {
        Some(u) => Access::Granted(u.clone()),
        None => Access::Redirect(LOGIN_PATH),
    }
}

/// Gate for the login / sign-up pages: signed-in users are sent home.
pub fn auth_route(state: &AuthState) -> Access {
    if state.loading {
        return Access::Pending;
    }
    if state.is_authenticated() {
        Access::Redirect(HOME_PATH)
    } else {
        Access::Open
    }
}
