//! The `User` view model and the default cascade that builds it.
//!
//! Each field is resolved by walking an ordered list of sources and taking the
//! first non-blank value. The tables below are the single place that decides
//! which source wins.

use serde::{Deserialize, Serialize};

use super::profile::ProfileRecord;
use super::session::Session;

pub const DEFAULT_DISPLAY_NAME: &str = "Novo Usuário";
pub const DEFAULT_SPECIALTY: &str = "Nutricionista";
pub const AVATAR_BASE_URL: &str = "https://api.dicebear.com/8.x/initials/svg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Nutritionist,
}

/// Merged, UI-facing projection of Session + Profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar: String,
    pub specialty: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldSource {
    Profile,
    SessionMetadata,
    Default,
}

pub const NAME_PRECEDENCE: &[FieldSource] = &[FieldSource::Profile, FieldSource::SessionMetadata, FieldSource::Default];
pub const AVATAR_PRECEDENCE: &[FieldSource] = &[FieldSource::Profile, FieldSource::SessionMetadata, FieldSource::Default];
// Session metadata never carries a specialty.
pub const SPECIALTY_PRECEDENCE: &[FieldSource] = &[FieldSource::Profile, FieldSource::Default];

/// Initials avatar for `seed`. Same seed, same URL.
pub fn generated_avatar_url(seed: &str) -> String {
    format!("{}?seed={}", AVATAR_BASE_URL, urlencoding::encode(seed))
}

fn present(v: Option<&String>) -> Option<&str> {
    v.map(|s| s.trim()).filter(|s| !s.is_empty())
}

/// Walk `order`, returning the first present value and where it came from.
/// `Default` always terminates the walk.
fn resolve_field<F>(order: &[FieldSource], profile: Option<&str>, metadata: Option<&str>, default: F) -> (String, FieldSource)
where
    F: FnOnce() -> String,
{
    for source in order {
        let candidate = match source {
            FieldSource::Profile => profile,
            FieldSource::SessionMetadata => metadata,
            FieldSource::Default => return (default(), FieldSource::Default),
        };
        if let Some(v) = candidate {
            return (v.to_string(), *source);
        }
    }
    (default(), FieldSource::Default)
}

/// Which source each field of a resolved user came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provenance {
    pub name: FieldSource,
    pub avatar: FieldSource,
    pub specialty: FieldSource,
}

/// Build the view model. `profile` is `None` both when the row is missing and
/// when the lookup failed.
pub fn resolve_user(session: &Session, profile: Option<&ProfileRecord>) -> (User, Provenance) {
    let meta = &session.user.user_metadata;

    let (name, name_src) = resolve_field(
        NAME_PRECEDENCE,
        profile.and_then(|p| present(p.name.as_ref())),
        present(meta.name.as_ref()),
        || DEFAULT_DISPLAY_NAME.to_string(),
    );
    let (avatar, avatar_src) = resolve_field(
        AVATAR_PRECEDENCE,
        profile.and_then(|p| present(p.avatar_url.as_ref())),
        present(meta.avatar_url.as_ref()),
        // seeded by the resolved name only, even when that is the default
        || generated_avatar_url(&name),
    );
    let (specialty, specialty_src) = resolve_field(
        SPECIALTY_PRECEDENCE,
        profile.and_then(|p| present(p.specialty.as_ref())),
        None,
        || DEFAULT_SPECIALTY.to_string(),
    );

    let user = User {
        id: session.user.id.clone(),
        name,
        email: session.user.email.clone().unwrap_or_default(),
        avatar,
        specialty,
        role: Role::Nutritionist,
    };
    (user, Provenance { name: name_src, avatar: avatar_src, specialty: specialty_src })
}
