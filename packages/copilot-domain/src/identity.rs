use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
	Admin,
	#[serde(rename = "HR")]
	Hr,
	Engineering,
	Finance,
	Operations,
}
impl Role {
	pub const ALL: [Role; 5] =
		[Role::Admin, Role::Hr, Role::Engineering, Role::Finance, Role::Operations];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Admin => "Admin",
			Self::Hr => "HR",
			Self::Engineering => "Engineering",
			Self::Finance => "Finance",
			Self::Operations => "Operations",
		}
	}

	/// Case-insensitive parse of a role tag.
	pub fn parse(raw: &str) -> Option<Self> {
		let raw = raw.trim();

		Self::ALL.into_iter().find(|role| role.as_str().eq_ignore_ascii_case(raw))
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Non-empty set of roles held by a caller.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "BTreeSet<Role>", into = "BTreeSet<Role>")]
pub struct RoleSet(BTreeSet<Role>);
impl RoleSet {
	pub fn new(roles: impl IntoIterator<Item = Role>) -> Option<Self> {
		let roles: BTreeSet<Role> = roles.into_iter().collect();

		if roles.is_empty() {
			return None;
		}

		Some(Self(roles))
	}

	pub fn single(role: Role) -> Self {
		Self(BTreeSet::from([role]))
	}

	/// Parses a comma-separated header value such as `HR, Finance`.
	pub fn parse_list(raw: &str) -> Option<Self> {
		let mut roles = BTreeSet::new();

		for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
			roles.insert(Role::parse(part)?);
		}

		Self::new(roles)
	}

	pub fn contains(&self, role: Role) -> bool {
		self.0.contains(&role)
	}

	pub fn intersects(&self, other: &BTreeSet<Role>) -> bool {
		other.iter().any(|role| self.0.contains(role))
	}

	pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
		self.0.iter().copied()
	}

	/// Stable label used in cache keys and invalidation tags, e.g. `HR,Engineering`.
	pub fn label(&self) -> String {
		self.0.iter().map(|role| role.as_str()).collect::<Vec<_>>().join(",")
	}
}

impl TryFrom<BTreeSet<Role>> for RoleSet {
	type Error = &'static str;

	fn try_from(roles: BTreeSet<Role>) -> Result<Self, Self::Error> {
		Self::new(roles).ok_or("Role set must be non-empty.")
	}
}

impl From<RoleSet> for BTreeSet<Role> {
	fn from(roles: RoleSet) -> Self {
		roles.0
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	pub user_id: String,
	pub roles: RoleSet,
}
impl Identity {
	pub fn new(user_id: impl Into<String>, roles: RoleSet) -> Self {
		Self { user_id: user_id.into(), roles }
	}
}
