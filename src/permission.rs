use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Role permissions granted through `CREATE ROLE r WITH ...`.
///
/// Semantics:
/// - `Admin` implies every other permission, including system procedures.
/// - `Sql` implies `SqlRead`; both only cover ad hoc work.
/// - `AllProc` allows every user procedure regardless of its `ALLOW` list.
/// - `DefaultProc` allows the auto-generated table procedures only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    Admin,
    Sql,
    SqlRead,
    DefaultProc,
    AllProc,
}

impl Permission {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Some(Permission::Admin),
            "SQL" => Some(Permission::Sql),
            "SQLREAD" => Some(Permission::SqlRead),
            "DEFAULTPROC" => Some(Permission::DefaultProc),
            "ALLPROC" => Some(Permission::AllProc),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Admin => "ADMIN",
            Permission::Sql => "SQL",
            Permission::SqlRead => "SQLREAD",
            Permission::DefaultProc => "DEFAULTPROC",
            Permission::AllProc => "ALLPROC",
        }
    }
}

/// The effective grant of one session: the union of the permissions of
/// its roles, plus the role names for procedure `ALLOW` lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Grant {
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<Permission>,
    // Set when security is disabled; never deserialized from untrusted input.
    #[serde(default, skip_deserializing)]
    unrestricted: bool,
}

impl Grant {
    pub fn unrestricted() -> Self {
        Self {
            roles: BTreeSet::new(),
            permissions: BTreeSet::new(),
            unrestricted: true,
        }
    }

    pub fn new(roles: BTreeSet<String>, permissions: BTreeSet<Permission>) -> Self {
        Self {
            roles,
            permissions,
            unrestricted: false,
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.unrestricted
    }

    pub fn has(&self, permission: Permission) -> bool {
        if self.unrestricted || self.permissions.contains(&Permission::Admin) {
            return true;
        }
        match permission {
            Permission::SqlRead => {
                self.permissions.contains(&Permission::SqlRead)
                    || self.permissions.contains(&Permission::Sql)
            }
            other => self.permissions.contains(&other),
        }
    }

    pub fn can_run_sysproc(&self) -> bool {
        self.has(Permission::Admin)
    }

    /// Whether this grant may invoke a user procedure allowed for `allowed_roles`.
    pub fn can_invoke(&self, allowed_roles: &BTreeSet<String>) -> bool {
        if self.has(Permission::AllProc) {
            return true;
        }
        self.roles.iter().any(|role| allowed_roles.contains(role))
    }
}

#[cfg(test)]
mod tests {
    use super::{Grant, Permission};
    use std::collections::BTreeSet;

    fn grant(roles: &[&str], perms: &[Permission]) -> Grant {
        Grant::new(
            roles.iter().map(|r| r.to_string()).collect(),
            perms.iter().copied().collect(),
        )
    }

    #[test]
    fn admin_implies_everything() {
        let g = grant(&["ADMINISTRATOR"], &[Permission::Admin]);
        assert!(g.can_run_sysproc());
        assert!(g.has(Permission::SqlRead));
        assert!(g.can_invoke(&BTreeSet::new()));
    }

    #[test]
    fn sql_implies_sqlread_but_not_admin() {
        let g = grant(&["DEV"], &[Permission::Sql]);
        assert!(g.has(Permission::SqlRead));
        assert!(!g.can_run_sysproc());
    }

    #[test]
    fn allow_list_matches_by_role() {
        let g = grant(&["OPS"], &[]);
        let allowed: BTreeSet<String> = ["OPS".to_string()].into_iter().collect();
        assert!(g.can_invoke(&allowed));
        assert!(!g.can_invoke(&BTreeSet::new()));
        assert!(Grant::unrestricted().can_invoke(&BTreeSet::new()));
    }

    #[test]
    fn permission_names_round_trip() {
        for p in [
            Permission::Admin,
            Permission::Sql,
            Permission::SqlRead,
            Permission::DefaultProc,
            Permission::AllProc,
        ] {
            assert_eq!(Permission::parse(p.as_str()), Some(p));
        }
        assert_eq!(Permission::parse(" sqlread "), Some(Permission::SqlRead));
        assert_eq!(Permission::parse("root"), None);
    }
}
