use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::identity::Role;

/// A retrieved unit of knowledge together with the roles allowed to read it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
	pub chunk_id: String,
	pub document_id: String,
	pub title: Option<String>,
	pub content: String,
	pub score: f32,
	pub access_roles: BTreeSet<Role>,
}
impl Candidate {
	pub fn content_chars(&self) -> usize {
		self.content.chars().count()
	}
}
