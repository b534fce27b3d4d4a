use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Every action a role may be granted. Unknown keys do not deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    CreateRole,
    ReadRole,
    UpdateRole,
    UpdateRolePermissions,
    DeleteRole,
    CreateOrganization,
    ReadOrganization,
    UpdateOrganization,
    DeleteOrganization,
    CreateCategory,
    ReadCategory,
    UpdateCategory,
    DeleteCategory,
    ReadProfile,
    UpdateProfile,
}

impl Permission {
    pub const ALL: [Permission; 15] = [
        Permission::CreateRole,
        Permission::ReadRole,
        Permission::UpdateRole,
        Permission::UpdateRolePermissions,
        Permission::DeleteRole,
        Permission::CreateOrganization,
        Permission::ReadOrganization,
        Permission::UpdateOrganization,
        Permission::DeleteOrganization,
        Permission::CreateCategory,
        Permission::ReadCategory,
        Permission::UpdateCategory,
        Permission::DeleteCategory,
        Permission::ReadProfile,
        Permission::UpdateProfile,
    ];

    fn bit(self) -> u64 {
        1 << (self as u32)
    }

    pub fn key(self) -> &'static str {
        match self {
            Permission::CreateRole => "create_role",
            Permission::ReadRole => "read_role",
            Permission::UpdateRole => "update_role",
            Permission::UpdateRolePermissions => "update_role_permissions",
            Permission::DeleteRole => "delete_role",
            Permission::CreateOrganization => "create_organization",
            Permission::ReadOrganization => "read_organization",
            Permission::UpdateOrganization => "update_organization",
            Permission::DeleteOrganization => "delete_organization",
            Permission::CreateCategory => "create_category",
            Permission::ReadCategory => "read_category",
            Permission::UpdateCategory => "update_category",
            Permission::DeleteCategory => "delete_category",
            Permission::ReadProfile => "read_profile",
            Permission::UpdateProfile => "update_profile",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Granted permissions as a bitset. Serialized as `{key: bool}` for every key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionSet(u64);

impl PermissionSet {
    pub fn empty() -> Self {
        Self(0)
    }

    /// The super-admin superset.
    pub fn all() -> Self {
        Permission::ALL.iter().fold(Self::empty(), |set, p| set.with(*p))
    }

    /// Drops bits that do not name a permission.
    pub fn from_bits(bits: i64) -> Self {
        Self(bits as u64 & Self::all().0)
    }

    pub fn bits(self) -> i64 {
        self.0 as i64
    }

    pub fn with(self, p: Permission) -> Self {
        Self(self.0 | p.bit())
    }

    pub fn without(self, p: Permission) -> Self {
        Self(self.0 & !p.bit())
    }

    pub fn contains(self, p: Permission) -> bool {
        self.0 & p.bit() != 0
    }

    /// Applies explicit flags on top of this set.
    pub fn overlay(self, flags: &BTreeMap<Permission, bool>) -> Self {
        flags
            .iter()
            .fold(self, |set, (p, on)| if *on { set.with(*p) } else { set.without(*p) })
    }

    pub fn from_flags(flags: &BTreeMap<Permission, bool>) -> Self {
        Self::empty().overlay(flags)
    }

    pub fn flags(self) -> BTreeMap<Permission, bool> {
        Permission::ALL.iter().map(|p| (*p, self.contains(*p))).collect()
    }
}

impl Serialize for PermissionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.flags().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PermissionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let flags = BTreeMap::<Permission, bool>::deserialize(deserializer)?;
        Ok(Self::from_flags(&flags))
    }
}
