use std::fmt;

use serde::{Deserialize, Serialize};

/// Permission represents a bitmask of granted site access levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(u32);

impl Permission {
    pub const SITE_READ: Permission = Permission(1 << 0); // 1
    pub const SITE_WRITE: Permission = Permission(1 << 1); // 2
    pub const SITE_ADMIN: Permission = Permission(1 << 2); // 4

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if this permission bitmask contains the required permission.
    #[must_use]
    pub const fn has(self, required: Permission) -> bool {
        self.0 & required.0 == required.0
    }

    #[must_use]
    pub const fn union(self, other: Permission) -> Permission {
        Permission(self.0 | other.0)
    }

    #[must_use]
    pub const fn difference(self, other: Permission) -> Permission {
        Permission(self.0 & !other.0)
    }

    /// Expands a permission bitmask to include implied permissions:
    /// admin implies write implies read.
    /// Only meaningful for ALLOW bits, never for DENY.
    #[must_use]
    pub fn expand_implied(self) -> Permission {
        let mut result = self.0;

        if self.has(Self::SITE_ADMIN) {
            result |= Self::SITE_WRITE.0;
        }
        if Permission(result).has(Self::SITE_WRITE) {
            result |= Self::SITE_READ.0;
        }

        Permission(result)
    }

    pub fn parse(s: &str) -> Option<Permission> {
        match s {
            "site:read" => Some(Self::SITE_READ),
            "site:write" => Some(Self::SITE_WRITE),
            "site:admin" => Some(Self::SITE_ADMIN),
            _ => None,
        }
    }

    pub fn parse_many(strs: &[&str]) -> Option<Permission> {
        let mut result = Permission::default();
        for s in strs {
            result = result.union(Self::parse(s)?);
        }
        Some(result)
    }

    #[must_use]
    pub fn to_strings(self) -> Vec<&'static str> {
        let mut perms = Vec::new();
        if self.has(Self::SITE_READ) {
            perms.push("site:read");
        }
        if self.has(Self::SITE_WRITE) {
            perms.push("site:write");
        }
        if self.has(Self::SITE_ADMIN) {
            perms.push("site:admin");
        }
        perms
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_strings().join(", "))
    }
}

impl From<u32> for Permission {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

impl From<Permission> for u32 {
    fn from(p: Permission) -> Self {
        p.0
    }
}

impl From<i64> for Permission {
    fn from(bits: i64) -> Self {
        Self(bits as u32)
    }
}

impl From<Permission> for i64 {
    fn from(p: Permission) -> Self {
        p.0 as i64
    }
}
