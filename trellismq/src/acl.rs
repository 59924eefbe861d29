use async_trait::async_trait;

use crate::types::Credentials;
use crate::Result;

/// What a role is allowed to do with a resource.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Ability {
    Read,
    Write,
}

/// Broker actions gated by the ACL.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Action {
    Publish,
    Subscribe,
    Queue,
}

/// Permission set attached to one user type.
pub trait Role: Sync + Send {
    fn has_perm(&self, ability: Ability, action: Action, resource: &str) -> bool;
}

/// Maps a user type to its role, if any.
pub trait Acl: Sync + Send {
    fn role(&self, user_type: &str) -> Option<&dyn Role>;
}

/// Authentication entry point consulted during connection setup.
#[async_trait]
pub trait Auth: Sync + Send {
    async fn can_authenticate(&self, credentials: &Credentials) -> Result<bool>;

    fn acl(&self) -> &dyn Acl;
}

struct PermissiveRole;

impl Role for PermissiveRole {
    fn has_perm(&self, _ability: Ability, _action: Action, _resource: &str) -> bool {
        true
    }
}

/// Grants every known user type one permissive role.
pub struct DefaultAcl {
    role: PermissiveRole,
}

impl Default for DefaultAcl {
    fn default() -> Self {
        Self { role: PermissiveRole }
    }
}

impl Acl for DefaultAcl {
    fn role(&self, _user_type: &str) -> Option<&dyn Role> {
        Some(&self.role)
    }
}

/// Accepts named users unconditionally and anonymous ones only when the
/// listener allows it.
pub struct DefaultAuth {
    allow_anonymous: bool,
    acl: DefaultAcl,
}

impl DefaultAuth {
    pub fn new(allow_anonymous: bool) -> Self {
        Self { allow_anonymous, acl: DefaultAcl::default() }
    }
}

#[async_trait]
impl Auth for DefaultAuth {
    async fn can_authenticate(&self, credentials: &Credentials) -> Result<bool> {
        if credentials.is_anonymous() {
            return Ok(self.allow_anonymous);
        }
        Ok(true)
    }

    fn acl(&self) -> &dyn Acl {
        &self.acl
    }
}

/// Convenience over the trait pair: whether `user_type` may perform
/// `action` on `resource`. A missing role denies.
pub fn has_perm(auth: &dyn Auth, user_type: &str, ability: Ability, action: Action, resource: &str) -> bool {
    auth.acl().role(user_type).map(|r| r.has_perm(ability, action, resource)).unwrap_or(false)
}
