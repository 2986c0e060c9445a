use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserState {
    #[default]
    Idle,
    Dialing,
    Busy,
}

/// A named client as seen by the relay.
///
/// `partner` is only meaningful while the user is dialing or busy.
/// `initiator` marks the side whose DIAL opened the current handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub state: UserState,
    pub partner: Option<String>,
    pub initiator: bool,
}

impl User {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: UserState::Idle,
            partner: None,
            initiator: false,
        }
    }

    /// Partner identifier while dialing or busy.
    pub fn active_partner(&self) -> Option<&str> {
        match self.state {
            UserState::Dialing | UserState::Busy => self.partner.as_deref(),
            UserState::Idle => None,
        }
    }

    pub fn reset(&mut self) {
        self.state = UserState::Idle;
        self.partner = None;
        self.initiator = false;
    }
}

/// Lookup table from user identifier to user state.
///
/// Entries are created lazily, whether the identifier shows up as a dialer
/// or as a dial target, and reused by every later reference.
#[derive(Debug, Default)]
pub struct Registry {
    users: HashMap<String, User>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_or_create(&mut self, id: &str) -> &mut User {
        self.users
            .entry(id.to_string())
            .or_insert_with(|| User::new(id))
    }

    pub fn get(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut User> {
        self.users.get_mut(id)
    }

    /// Removes `id`. Absent identifiers are a no-op.
    pub fn delete(&mut self, id: &str) -> Option<User> {
        self.users.remove(id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn count_in(&self, state: UserState) -> usize {
        self.users.values().filter(|u| u.state == state).count()
    }
}
