// src/policy/context.rs

//! The request context and target an action is checked against.

use std::collections::BTreeMap;

/// Attributes of the object an action applies to. Rule values of the form
/// `%(name)s` are substituted from here.
pub type Target = BTreeMap<String, String>;

/// Credentials of the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub roles: Vec<String>,
    pub is_admin: bool,
    /// Any additional named credential usable in field-match rules.
    pub fields: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Case-insensitive role membership.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    /// Value of a named credential, as a string.
    ///
    /// `is_admin` renders as `True`/`False`; `project_id` is an alias of
    /// `tenant_id`.
    pub fn credential(&self, name: &str) -> Option<String> {
        match name {
            "user_id" => self.user_id.clone(),
            "tenant_id" | "project_id" => self.tenant_id.clone(),
            "is_admin" => Some(if self.is_admin { "True" } else { "False" }.to_string()),
            other => self.fields.get(other).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_cover_builtin_and_extra_fields() {
        let ctx = RequestContext::new()
            .with_user("u1")
            .with_tenant("t1")
            .with_admin(true)
            .with_field("domain", "d1");

        assert_eq!(ctx.credential("user_id").as_deref(), Some("u1"));
        assert_eq!(ctx.credential("project_id").as_deref(), Some("t1"));
        assert_eq!(ctx.credential("is_admin").as_deref(), Some("True"));
        assert_eq!(ctx.credential("domain").as_deref(), Some("d1"));
        assert_eq!(ctx.credential("missing"), None);
    }

    #[test]
    fn roles_match_case_insensitively() {
        let ctx = RequestContext::new().with_roles(["Heat_Stack_User", "member"]);
        assert!(ctx.has_role("heat_stack_user"));
        assert!(!ctx.has_role("admin"));
    }
}
