use log::info;

use crate::error::{ChatError, Result};
use crate::models::Message;
use crate::storage::Storage;

/// Where the client currently is. The selected peer lives inside `LoggedIn`
/// so logging out cannot leave a stale selection behind.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum SessionState {
    #[default]
    LoggedOut,
    LoggedIn {
        user_id: i64,
        username: String,
        peer: Option<i64>,
    },
}

/// One rendered transcript entry, ready for display.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatLine {
    pub who: String,
    pub content: String,
    pub created_at: String,
    pub own: bool,
}

/// The session state machine: login, peer selection, sending, polling,
/// logout. Holds only transient identity; all durable state stays in the
/// `Storage` passed into each call, which keeps the controller testable
/// without a UI.
#[derive(Default)]
pub struct Session {
    state: SessionState,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn current_user(&self) -> Option<i64> {
        match &self.state {
            SessionState::LoggedIn { user_id, .. } => Some(*user_id),
            SessionState::LoggedOut => None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match &self.state {
            SessionState::LoggedIn { username, .. } => Some(username),
            SessionState::LoggedOut => None,
        }
    }

    pub fn selected_peer(&self) -> Option<i64> {
        match &self.state {
            SessionState::LoggedIn { peer, .. } => *peer,
            SessionState::LoggedOut => None,
        }
    }

    /// Create an account. Does not log in; the user is expected to log in
    /// with the new credentials afterwards.
    pub fn sign_up(store: &Storage, username: &str, password: &str) -> Result<i64> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ChatError::EmptyInput("username"));
        }
        if password.is_empty() {
            return Err(ChatError::EmptyInput("password"));
        }
        store.register(username, password)
    }

    /// Authenticate and enter `LoggedIn` with no peer selected. Returns the
    /// roster so the caller can populate the user list right away.
    pub fn login(
        &mut self,
        store: &Storage,
        username: &str,
        password: &str,
    ) -> Result<Vec<(i64, String)>> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ChatError::EmptyInput("username"));
        }
        if password.is_empty() {
            return Err(ChatError::EmptyInput("password"));
        }
        let user_id = store.authenticate(username, password)?;
        self.state = SessionState::LoggedIn {
            user_id,
            username: username.to_string(),
            peer: None,
        };
        info!("user {username:?} (id {user_id}) logged in");
        store.list_others(user_id)
    }

    /// Switch the active conversation and fetch its transcript. Replaces any
    /// previously selected peer; the old view is discarded, not cached.
    pub fn select_peer(&mut self, store: &Storage, peer_id: i64) -> Result<Vec<Message>> {
        match &mut self.state {
            SessionState::LoggedIn { user_id, peer, .. } => {
                *peer = Some(peer_id);
                store.transcript(*user_id, peer_id)
            }
            SessionState::LoggedOut => Err(ChatError::NotLoggedIn),
        }
    }

    /// Send a message to the selected peer and return the refreshed
    /// transcript immediately, without waiting for the next poll tick.
    pub fn send(&self, store: &Storage, text: &str) -> Result<Vec<Message>> {
        let SessionState::LoggedIn { user_id, peer, .. } = &self.state else {
            return Err(ChatError::NotLoggedIn);
        };
        let Some(peer) = *peer else {
            return Err(ChatError::NoPeerSelected);
        };
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyInput("message"));
        }
        store.send_message(*user_id, peer, text)?;
        store.transcript(*user_id, peer)
    }

    /// One poll tick: re-fetch the open conversation wholesale. Returns
    /// `None` when no conversation is open, so idle ticks touch nothing.
    pub fn poll(&self, store: &Storage) -> Result<Option<Vec<Message>>> {
        match &self.state {
            SessionState::LoggedIn {
                user_id,
                peer: Some(peer),
                ..
            } => Ok(Some(store.transcript(*user_id, *peer)?)),
            _ => Ok(None),
        }
    }

    /// Re-run the roster query for the current user.
    pub fn refresh_roster(&self, store: &Storage) -> Result<Vec<(i64, String)>> {
        match &self.state {
            SessionState::LoggedIn { user_id, .. } => store.list_others(*user_id),
            SessionState::LoggedOut => Err(ChatError::NotLoggedIn),
        }
    }

    /// Clear identity and selected peer. The caller must stop its poll clock
    /// in the same step so no tick fires against a cleared session.
    pub fn logout(&mut self) {
        if let SessionState::LoggedIn { username, .. } = &self.state {
            info!("user {username:?} logged out");
        }
        self.state = SessionState::LoggedOut;
    }

    /// Resolve raw messages into display lines. Own messages render as
    /// "You"; an unresolvable sender id degrades to a placeholder label.
    pub fn view_transcript(&self, store: &Storage, messages: &[Message]) -> Vec<ChatLine> {
        let me = self.current_user();
        messages
            .iter()
            .map(|msg| {
                let own = Some(msg.from_user) == me;
                let who = if own {
                    "You".to_string()
                } else {
                    store.username_of(msg.from_user)
                };
                ChatLine {
                    who,
                    content: msg.content.clone(),
                    created_at: msg.created_at.clone(),
                    own,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Storage, Session) {
        (Storage::open(":memory:").unwrap(), Session::new())
    }

    #[test]
    fn test_login_loads_roster_without_self() {
        let (store, mut session) = setup();
        let roster = session.login(&store, "alice", "alicepass").unwrap();
        let names: Vec<&str> = roster.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(names, ["bob", "carol"]);
        assert_eq!(session.current_user(), Some(1));
        assert_eq!(session.selected_peer(), None);
    }

    #[test]
    fn test_login_rejects_blank_input_before_store() {
        let (store, mut session) = setup();
        assert!(matches!(
            session.login(&store, "  ", "pass"),
            Err(ChatError::EmptyInput("username"))
        ));
        assert!(matches!(
            session.login(&store, "alice", ""),
            Err(ChatError::EmptyInput("password"))
        ));
        assert_eq!(*session.state(), SessionState::LoggedOut);
    }

    #[test]
    fn test_login_with_bad_password_stays_logged_out() {
        let (store, mut session) = setup();
        assert!(matches!(
            session.login(&store, "alice", "wrong"),
            Err(ChatError::InvalidCredentials)
        ));
        assert_eq!(*session.state(), SessionState::LoggedOut);
    }

    #[test]
    fn test_sign_up_then_login() {
        let (store, mut session) = setup();
        let id = Session::sign_up(&store, "dave", "davepass").unwrap();
        let roster = session.login(&store, "dave", "davepass").unwrap();
        assert_eq!(session.current_user(), Some(id));
        assert!(roster.iter().all(|(other, _)| *other != id));
    }

    #[test]
    fn test_sign_up_does_not_log_in() {
        let (store, _session) = setup();
        Session::sign_up(&store, "dave", "davepass").unwrap();
        let session = Session::new();
        assert_eq!(*session.state(), SessionState::LoggedOut);
    }

    #[test]
    fn test_select_peer_fetches_transcript() {
        let (store, mut session) = setup();
        session.login(&store, "alice", "alicepass").unwrap();
        let messages = session.select_peer(&store, 2).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(session.selected_peer(), Some(2));
    }

    #[test]
    fn test_select_peer_replaces_previous() {
        let (store, mut session) = setup();
        session.login(&store, "alice", "alicepass").unwrap();
        session.select_peer(&store, 2).unwrap();
        let messages = session.select_peer(&store, 3).unwrap();
        assert!(messages.is_empty());
        assert_eq!(session.selected_peer(), Some(3));
    }

    #[test]
    fn test_send_requires_login_and_peer() {
        let (store, mut session) = setup();
        assert!(matches!(
            session.send(&store, "hello"),
            Err(ChatError::NotLoggedIn)
        ));
        session.login(&store, "alice", "alicepass").unwrap();
        assert!(matches!(
            session.send(&store, "hello"),
            Err(ChatError::NoPeerSelected)
        ));
    }

    #[test]
    fn test_send_rejects_blank_message() {
        let (store, mut session) = setup();
        session.login(&store, "alice", "alicepass").unwrap();
        session.select_peer(&store, 2).unwrap();
        assert!(matches!(
            session.send(&store, "   "),
            Err(ChatError::EmptyInput("message"))
        ));
    }

    #[test]
    fn test_send_appends_and_refreshes() {
        let (store, mut session) = setup();
        session.login(&store, "alice", "alicepass").unwrap();
        session.select_peer(&store, 2).unwrap();
        let messages = session.send(&store, "a fresh message").unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages.last().unwrap().content, "a fresh message");
    }

    #[test]
    fn test_poll_without_peer_is_a_no_op() {
        let (store, mut session) = setup();
        assert!(session.poll(&store).unwrap().is_none());
        session.login(&store, "alice", "alicepass").unwrap();
        assert!(session.poll(&store).unwrap().is_none());
    }

    #[test]
    fn test_poll_refetches_open_conversation() {
        let (store, mut session) = setup();
        session.login(&store, "alice", "alicepass").unwrap();
        session.select_peer(&store, 2).unwrap();
        let first = session.poll(&store).unwrap().unwrap();
        store.send_message(2, 1, "from the other side").unwrap();
        let second = session.poll(&store).unwrap().unwrap();
        assert_eq!(second.len(), first.len() + 1);
    }

    #[test]
    fn test_logout_clears_peer_across_sessions() {
        let (store, mut session) = setup();
        session.login(&store, "alice", "alicepass").unwrap();
        session.select_peer(&store, 2).unwrap();
        session.logout();
        assert_eq!(*session.state(), SessionState::LoggedOut);
        session.login(&store, "alice", "alicepass").unwrap();
        assert_eq!(session.selected_peer(), None);
    }

    #[test]
    fn test_refresh_roster_sees_new_users() {
        let (store, mut session) = setup();
        session.login(&store, "alice", "alicepass").unwrap();
        Session::sign_up(&store, "dave", "davepass").unwrap();
        let roster = session.refresh_roster(&store).unwrap();
        let names: Vec<&str> = roster.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(names, ["bob", "carol", "dave"]);
    }

    #[test]
    fn test_view_transcript_labels_senders() {
        let (store, mut session) = setup();
        session.login(&store, "alice", "alicepass").unwrap();
        let messages = session.select_peer(&store, 2).unwrap();
        let lines = session.view_transcript(&store, &messages);
        assert_eq!(lines[0].who, "You");
        assert!(lines[0].own);
        assert_eq!(lines[1].who, "bob");
        assert!(!lines[1].own);
    }

    #[test]
    fn test_view_transcript_falls_back_on_unknown_sender() {
        let (store, mut session) = setup();
        session.login(&store, "alice", "alicepass").unwrap();
        store.send_message(999, 1, "ghost message").unwrap();
        let messages = store.transcript(1, 999).unwrap();
        let lines = session.view_transcript(&store, &messages);
        assert_eq!(lines[0].who, "user:999");
    }
}
