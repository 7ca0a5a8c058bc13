//! Identity and session state for the dashboard.
//! Keep the public surface thin and split implementation across sub-modules.

mod access;
mod bridge;
mod profile;
mod provider;
mod session;
mod signup;
mod user;

pub use access::{auth_route, protected_route, Access, HOME_PATH, LOGIN_PATH};
pub use bridge::{resolve_session_user, AuthState, BridgeStats, SessionBridge, SessionHandle};
pub use profile::{MemoryProfileStore, ProfileRecord, ProfileStore};
pub use provider::{AuthProvider, MemoryAuthProvider, SessionSubscription, SignUpOutcome, SubscriberRegistry};
pub use session::{AuthEvent, AuthEventKind, AuthUser, Session, SessionMetadata};
pub use signup::{FieldError, SignUpField, SignUpForm, SignUpRequest, ValidationErrors};
pub use user::{
    generated_avatar_url, resolve_user, FieldSource, Provenance, Role, User, AVATAR_PRECEDENCE,
    DEFAULT_DISPLAY_NAME, DEFAULT_SPECIALTY, NAME_PRECEDENCE, SPECIALTY_PRECEDENCE,
};
