//! Game session
//!
//! Owns the state shared by every connection (users and card display) and
//! hands out connection handlers wired to it.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Card, CardDisplay, User, Users};
use crate::server::{
    get_new_handler, ConnectionHandler, Envelope, MalformedFramePolicy, ProtocolError,
};

/// Message type sent by a client to join the session
pub const LOGIN: &str = "login";

/// Message type sent by a client to play a card
pub const CHOOSE_CARD: &str = "choose_card";

/// Message type sent by a client to clear the table for the next round
pub const NEW_ROUND: &str = "new_round";

/// Errors raised by the session's message listeners
#[derive(Debug, Error)]
pub enum GameError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] ProtocolError),

    #[error("Connection already logged in as {0}")]
    AlreadyLoggedIn(String),

    #[error("User id {0} is already in use")]
    UserIdTaken(String),

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Empty user id")]
    EmptyUserId,
}

/// Result type for game operations
pub type GameResult<T> = Result<T, GameError>;

#[derive(Debug, Deserialize)]
struct LoginPayload {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChooseCardPayload {
    card: Card,
}

/// A single shared poker table
pub struct GameSession {
    users: Arc<Users>,
    card_display: Arc<CardDisplay>,
    malformed_policy: MalformedFramePolicy,
}

impl GameSession {
    /// Create a session with an empty table
    pub fn new() -> Self {
        Self {
            users: Arc::new(Users::new()),
            card_display: Arc::new(CardDisplay::new()),
            malformed_policy: MalformedFramePolicy::default(),
        }
    }

    /// Set the malformed-frame policy applied to new handlers
    pub fn with_malformed_policy(mut self, policy: MalformedFramePolicy) -> Self {
        self.malformed_policy = policy;
        self
    }

    /// Users logged in to this session
    pub fn users(&self) -> &Arc<Users> {
        &self.users
    }

    /// Cards currently on the table
    pub fn card_display(&self) -> &Arc<CardDisplay> {
        &self.card_display
    }

    /// Create a handler initialized with this session's shared state
    ///
    /// The handler still has to be bound to a socket.
    pub fn new_handler(&self) -> Arc<ConnectionHandler> {
        let handler = get_new_handler();
        handler.init(
            Some(self.users.clone()),
            Some(self.card_display.clone()),
        );
        handler.set_malformed_policy(self.malformed_policy);
        self.register_listeners(&handler);
        debug!("Created handler {}", handler.id());
        handler
    }

    fn register_listeners(&self, handler: &ConnectionHandler) {
        let users = Arc::clone(&self.users);
        handler.on(LOGIN, move |envelope, handler| {
            if let Err(e) = login(&users, envelope, handler) {
                warn!("Login on connection {} rejected: {}", handler.id(), e);
            }
        });

        let card_display = Arc::clone(&self.card_display);
        handler.on(CHOOSE_CARD, move |envelope, handler| {
            if let Err(e) = choose_card(&card_display, envelope, handler) {
                warn!("Card on connection {} rejected: {}", handler.id(), e);
            }
        });

        let card_display = Arc::clone(&self.card_display);
        handler.on(NEW_ROUND, move |_envelope, handler| {
            if let Err(e) = new_round(&card_display, handler) {
                warn!("New round on connection {} rejected: {}", handler.id(), e);
            }
        });
    }
}

impl Default for GameSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Register the user on the session and associate it with the connection
///
/// An id held by another connection is refused, so that connection's
/// cleanup can never remove someone else's state.
fn login(users: &Users, envelope: &Envelope, handler: &ConnectionHandler) -> GameResult<()> {
    if let Some(current) = handler.get_user() {
        return Err(GameError::AlreadyLoggedIn(current.id.clone()));
    }

    let payload: LoginPayload = envelope.payload_as()?;
    if payload.id.is_empty() {
        return Err(GameError::EmptyUserId);
    }

    let name = payload.name.unwrap_or_else(|| payload.id.clone());
    let user = Arc::new(User::new(payload.id, name));
    if !users.add(Arc::clone(&user)) {
        return Err(GameError::UserIdTaken(user.id.clone()));
    }
    handler.set_user(Arc::clone(&user));

    info!(
        "User {} ({}) joined on connection {}, {} players at the table",
        user.id,
        user.name,
        handler.id(),
        users.len()
    );
    Ok(())
}

/// Put the connection's user's card on the table
fn choose_card(
    card_display: &CardDisplay,
    envelope: &Envelope,
    handler: &ConnectionHandler,
) -> GameResult<()> {
    let user = handler.get_user().ok_or(GameError::NotLoggedIn)?;
    let payload: ChooseCardPayload = envelope.payload_as()?;
    card_display.put_card(user.id.clone(), payload.card);
    debug!("{} cards on the table", card_display.len());
    Ok(())
}

/// Clear the table, logging the cards of the finished round
fn new_round(card_display: &CardDisplay, handler: &ConnectionHandler) -> GameResult<()> {
    let user = handler.get_user().ok_or(GameError::NotLoggedIn)?;
    if card_display.is_empty() {
        debug!("User {} started a new round on an empty table", user.id);
        return Ok(());
    }

    let played: Vec<String> = card_display
        .clear()
        .iter()
        .map(|(user_id, card)| format!("{}={}", user_id, card))
        .collect();
    info!("User {} started a new round, previous cards: {}", user.id, played.join(", "));
    Ok(())
}
