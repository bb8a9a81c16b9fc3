use std::collections::HashMap;

use thiserror::Error;

use super::result::Label;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("unrecognized detector label {0:?}")]
    Unrecognized(String),
}

/// Maps detector class identifiers onto [`Label`].
///
/// Identifiers are either numeric class ids or class names. Anything not in
/// the table is an error; there is no fallback class.
#[derive(Clone, Debug)]
pub struct LabelMap {
    entries: HashMap<String, Label>,
}

impl LabelMap {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn with(mut self, identifier: &str, label: Label) -> Self {
        self.entries.insert(identifier.to_ascii_lowercase(), label);
        self
    }

    pub fn decode(&self, identifier: &str) -> Result<Label, LabelError> {
        let key = identifier.trim().to_ascii_lowercase();
        self.entries
            .get(&key)
            .copied()
            .ok_or_else(|| LabelError::Unrecognized(identifier.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LabelMap {
    /// Class table of the match detection model: 0 ball, 1 goalkeeper,
    /// 2 player, 3 referee. Goalkeepers are players.
    fn default() -> Self {
        Self::empty()
            .with("0", Label::Ball)
            .with("1", Label::Player)
            .with("2", Label::Player)
            .with("3", Label::Referee)
            .with("ball", Label::Ball)
            .with("goalkeeper", Label::Player)
            .with("player", Label::Player)
            .with("referee", Label::Referee)
            .with("goalpost", Label::Goalpost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_class_ids_and_names() {
        let map = LabelMap::default();
        assert_eq!(map.decode("0"), Ok(Label::Ball));
        assert_eq!(map.decode("1"), Ok(Label::Player));
        assert_eq!(map.decode("3"), Ok(Label::Referee));
        assert_eq!(map.decode("Goalpost"), Ok(Label::Goalpost));
    }

    #[test]
    fn unknown_identifiers_are_errors_not_players() {
        let map = LabelMap::default();
        assert_eq!(
            map.decode("7"),
            Err(LabelError::Unrecognized("7".to_string()))
        );
        assert!(map.decode("linesman").is_err());
    }
}
