//! Authenticated identity and per-request context.
//!
//! Upstream middleware attaches a [`RequestContext`] to every inbound request
//! as an extension. The proxy reads the user, the audit ID and the
//! cancellation token from it; it never authenticates on its own.

use std::collections::BTreeMap;
use std::net::IpAddr;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A verified user identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserInfo {
    pub name: String,
    pub uid: String,
    /// Group memberships, in the order the authenticator produced them.
    pub groups: Vec<String>,
    pub extra: BTreeMap<String, Vec<String>>,
}

impl UserInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.extra.insert(key.into(), values);
        self
    }
}

/// Everything upstream middleware knows about an inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    user: Option<UserInfo>,
    audit_id: Option<String>,
    client_addr: Option<IpAddr>,
    scheme: &'static str,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            user: None,
            audit_id: None,
            client_addr: None,
            scheme: "http",
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_user(mut self, user: UserInfo) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_audit_id(mut self, audit_id: impl Into<String>) -> Self {
        self.audit_id = Some(audit_id.into());
        self
    }

    pub fn with_client_addr(mut self, addr: IpAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    /// Scheme the request arrived on (`http` or `https`).
    pub fn with_scheme(mut self, scheme: &'static str) -> Self {
        self.scheme = scheme;
        self
    }

    /// An upstream deadline; the proxy never extends it.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Use an externally owned cancellation token, e.g. one tied to the
    /// inbound connection.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn user(&self) -> Option<&UserInfo> {
        self.user.as_ref()
    }

    pub fn audit_id(&self) -> Option<&str> {
        self.audit_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn client_addr(&self) -> Option<IpAddr> {
        self.client_addr
    }

    pub fn scheme(&self) -> &'static str {
        self.scheme
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_audit_id_is_absent() {
        let ctx = RequestContext::new().with_audit_id("");
        assert_eq!(ctx.audit_id(), None);

        let ctx = RequestContext::new().with_audit_id("foo-bar");
        assert_eq!(ctx.audit_id(), Some("foo-bar"));
    }

    #[test]
    fn groups_keep_order() {
        let user = UserInfo::new("username").with_groups(["two", "one"]);
        assert_eq!(user.groups, vec!["two".to_string(), "one".to_string()]);
    }
}
