#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use ydna_core::{Gender, ImmediateFamily, Profile};
use ydna_directory::{DirectoryError, ProfileDirectory};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Profile(String),
    Family(String),
}

/// In-memory directory built from declared people and parent edges. Every
/// request is recorded with the identifier the caller passed.
#[derive(Default)]
pub struct ScriptedDirectory {
    people: RefCell<Vec<Profile>>,
    fathers: RefCell<HashMap<String, String>>,
    mothers: RefCell<HashMap<String, String>>,
    listed_children: RefCell<HashMap<String, Vec<String>>>,
    aliases: RefCell<HashMap<String, String>>,
    failing: RefCell<HashSet<String>>,
    failing_profiles: RefCell<HashSet<String>>,
    auth_expired: Cell<bool>,
    calls: RefCell<Vec<Call>>,
}

impl ScriptedDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn male(&self, id: &str) -> &Self {
        self.person(id, Gender::Male)
    }

    pub fn female(&self, id: &str) -> &Self {
        self.person(id, Gender::Female)
    }

    pub fn person(&self, id: &str, gender: Gender) -> &Self {
        let profile = Profile::new(id, gender).with_name(id, "Ward");
        self.people.borrow_mut().push(profile);
        self
    }

    pub fn surname(&self, id: &str, last_name: &str) -> &Self {
        if let Some(profile) = self.people.borrow_mut().iter_mut().find(|p| p.id == id) {
            profile.last_name = Some(last_name.to_string());
        }
        self
    }

    pub fn father_of(&self, child: &str, father: &str) -> &Self {
        self.fathers
            .borrow_mut()
            .insert(child.to_string(), father.to_string());
        self
    }

    pub fn mother_of(&self, child: &str, mother: &str) -> &Self {
        self.mothers
            .borrow_mut()
            .insert(child.to_string(), mother.to_string());
        self
    }

    /// Fixes the children reported for `parent`, regardless of parent edges.
    pub fn children(&self, parent: &str, children: &[&str]) -> &Self {
        self.listed_children.borrow_mut().insert(
            parent.to_string(),
            children.iter().map(|child| child.to_string()).collect(),
        );
        self
    }

    /// Requests for `raw` are answered as if `canonical` had been asked for.
    pub fn alias(&self, raw: &str, canonical: &str) -> &Self {
        self.aliases
            .borrow_mut()
            .insert(raw.to_string(), canonical.to_string());
        self
    }

    pub fn fail(&self, id: &str) -> &Self {
        self.failing.borrow_mut().insert(id.to_string());
        self
    }

    /// Profile lookups for `id` fail while family lookups keep working.
    pub fn fail_profile(&self, id: &str) -> &Self {
        self.failing_profiles.borrow_mut().insert(id.to_string());
        self
    }

    pub fn recover(&self, id: &str) -> &Self {
        self.failing.borrow_mut().remove(id);
        self
    }

    pub fn expire_auth(&self) {
        self.auth_expired.set(true);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn family_fetches(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Family(id) => Some(id.clone()),
                Call::Profile(_) => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    fn canonical(&self, id: &str) -> String {
        self.aliases
            .borrow()
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    fn lookup(&self, id: &str) -> Option<Profile> {
        self.people.borrow().iter().find(|p| p.id == id).cloned()
    }

    fn check(&self, id: &str) -> Result<Profile, DirectoryError> {
        if self.auth_expired.get() {
            return Err(DirectoryError::NotAuthenticated("token expired".to_string()));
        }
        if self.failing.borrow().contains(id) {
            return Err(DirectoryError::Remote {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        self.lookup(id).ok_or_else(|| DirectoryError::Remote {
            status: 404,
            message: format!("no profile {id}"),
        })
    }
}

impl ProfileDirectory for ScriptedDirectory {
    fn fetch_profile(&self, profile_id: &str) -> Result<Profile, DirectoryError> {
        self.calls
            .borrow_mut()
            .push(Call::Profile(profile_id.to_string()));
        let canonical = self.canonical(profile_id);
        if self.failing_profiles.borrow().contains(&canonical) {
            return Err(DirectoryError::Remote {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        self.check(&canonical)
    }

    fn fetch_immediate_family(&self, profile_id: &str) -> Result<ImmediateFamily, DirectoryError> {
        self.calls
            .borrow_mut()
            .push(Call::Family(profile_id.to_string()));
        let canonical = self.canonical(profile_id);
        let focus = self.check(&canonical)?;

        let mut parents = Vec::new();
        if let Some(mother) = self.mothers.borrow().get(&canonical) {
            parents.extend(self.lookup(mother));
        }
        if let Some(father) = self.fathers.borrow().get(&canonical) {
            parents.extend(self.lookup(father));
        }

        let children: Vec<Profile> = match self.listed_children.borrow().get(&canonical) {
            Some(listed) => listed.iter().filter_map(|id| self.lookup(id)).collect(),
            None => {
                let fathers = self.fathers.borrow();
                let mothers = self.mothers.borrow();
                self.people
                    .borrow()
                    .iter()
                    .filter(|p| {
                        fathers.get(&p.id) == Some(&canonical)
                            || mothers.get(&p.id) == Some(&canonical)
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            }
        };

        let mut profiles = vec![focus.clone()];
        profiles.extend(parents.iter().cloned());
        profiles.extend(children.iter().cloned());

        Ok(ImmediateFamily {
            focus: Some(focus),
            parents,
            children,
            partners: Vec::new(),
            profiles,
            unions: Vec::new(),
        })
    }
}
