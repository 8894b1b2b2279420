//! Shared card display
//!
//! Holds the card each player has put on the table.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::server::CardStore;

/// A played card: a whole point value, a fractional one such as `0.5`, or a
/// label such as `?`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Card {
    Points(u32),
    Fraction(f64),
    Label(String),
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Card::Points(points) => write!(f, "{}", points),
            Card::Fraction(points) => write!(f, "{}", points),
            Card::Label(label) => f.write_str(label),
        }
    }
}

/// Cards on the table, keyed by the id of the user who played them
#[derive(Debug, Default)]
pub struct CardDisplay {
    cards: RwLock<BTreeMap<String, Card>>,
}

impl CardDisplay {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a user's card on the table, replacing their previous one
    pub fn put_card(&self, user_id: impl Into<String>, card: Card) -> Option<Card> {
        let user_id = user_id.into();
        debug!("User {} played {}", user_id, card);
        self.cards.write().insert(user_id, card)
    }

    /// Take a user's card off the table
    pub fn remove_card(&self, user_id: &str) -> Option<Card> {
        self.cards.write().remove(user_id)
    }

    /// Clear the table for a new round, returning the cards that were on it
    pub fn clear(&self) -> Vec<(String, Card)> {
        std::mem::take(&mut *self.cards.write()).into_iter().collect()
    }

    /// Number of cards on the table
    pub fn len(&self) -> usize {
        self.cards.read().len()
    }

    /// Whether no card has been played
    pub fn is_empty(&self) -> bool {
        self.cards.read().is_empty()
    }
}

impl CardStore for CardDisplay {
    fn remove_card(&self, user_id: &str) {
        CardDisplay::remove_card(self, user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_put_card() {
        let display = CardDisplay::new();
        assert!(display.put_card("u1", Card::Points(8)).is_none());

        assert_eq!(display.len(), 1);
        assert_eq!(display.clear(), vec![("u1".to_string(), Card::Points(8))]);
    }

    #[test]
    fn test_put_replaces_previous_card() {
        let display = CardDisplay::new();
        display.put_card("u1", Card::Points(8));
        let previous = display.put_card("u1", Card::Label("?".to_string()));

        assert_eq!(previous, Some(Card::Points(8)));
        assert_eq!(
            display.clear(),
            vec![("u1".to_string(), Card::Label("?".to_string()))]
        );
    }

    #[test]
    fn test_remove_card() {
        let display = CardDisplay::new();
        display.put_card("u1", Card::Points(3));

        assert_eq!(display.remove_card("u1"), Some(Card::Points(3)));
        assert_eq!(display.remove_card("u1"), None);
        assert!(display.is_empty());
    }

    #[test]
    fn test_remove_through_store_trait() {
        let display = Arc::new(CardDisplay::new());
        display.put_card("u1", Card::Points(13));

        let store: Arc<dyn CardStore> = display.clone();
        store.remove_card("u1");

        assert!(display.is_empty());
    }

    #[test]
    fn test_clear_returns_cards_in_order() {
        let display = CardDisplay::new();
        display.put_card("b", Card::Points(20));
        display.put_card("a", Card::Points(8));

        let cleared = display.clear();
        assert_eq!(cleared[0], ("a".to_string(), Card::Points(8)));
        assert_eq!(cleared[1], ("b".to_string(), Card::Points(20)));
        assert!(display.is_empty());
        assert!(display.clear().is_empty());
    }

    #[test]
    fn test_card_untagged_serialization() {
        let points: Card = serde_json::from_str("13").unwrap();
        assert_eq!(points, Card::Points(13));

        let label: Card = serde_json::from_str("\"coffee\"").unwrap();
        assert_eq!(label, Card::Label("coffee".to_string()));

        assert_eq!(serde_json::to_string(&Card::Points(5)).unwrap(), "5");
        assert_eq!(Card::Label("?".to_string()).to_string(), "?");
    }

    #[test]
    fn test_half_point_card() {
        let half: Card = serde_json::from_str("0.5").unwrap();
        assert_eq!(half, Card::Fraction(0.5));
        assert_eq!(half.to_string(), "0.5");
        assert_eq!(serde_json::to_string(&half).unwrap(), "0.5");
    }
}
