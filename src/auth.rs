//! Thin bearer-token check for admin dSort operations (`remove`), the
//! only admin-style surface this crate owns (SPEC_FULL.md §2 "auth").
//! Full authentication (PAM/shadow/realms) is the auth server's job and
//! out of scope per spec.md §1 — this module narrows the teacher's
//! `src/auth.rs` (a full `ProxmoxAuthenticator` with PAM and shadow-file
//! backends) down to exactly the interface spec.md §7's `Unauthorized`
//! kind needs: is this bearer token one the cluster currently trusts.

use std::collections::HashSet;
use std::sync::RwLock;

use once_cell::sync::Lazy;

use crate::error::TargetError;

static TRUSTED_TOKENS: Lazy<RwLock<HashSet<String>>> = Lazy::new(|| RwLock::new(HashSet::new()));

/// Replace the set of tokens this node accepts. Called by the (external,
/// out-of-scope) auth server's admin push, wholesale, the same way
/// [`crate::config::cluster::install`] replaces the cluster map.
pub fn install_tokens(tokens: HashSet<String>) {
    *TRUSTED_TOKENS.write().unwrap() = tokens;
}

/// Check an `Authorization: Bearer <token>` header value against the
/// process-wide trusted set installed via [`install_tokens`]. Spec.md §7:
/// `Unauthorized` maps to HTTP 401.
pub fn check_bearer(header_value: Option<&str>) -> Result<(), TargetError> {
    check_bearer_against(header_value, &TRUSTED_TOKENS.read().unwrap())
}

/// Pure check against an explicit token set, factored out of
/// [`check_bearer`] so tests never share the process-wide global (which
/// real request handling always goes through).
fn check_bearer_against(header_value: Option<&str>, tokens: &HashSet<String>) -> Result<(), TargetError> {
    let token = header_value
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| TargetError::Unauthorized("missing bearer token".into()))?;

    if tokens.contains(token) {
        Ok(())
    } else {
        Err(TargetError::Unauthorized("unknown bearer token".into()))
    }
}
