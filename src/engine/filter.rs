use crate::model::Room;

/// Lowercased blacklist terms matched as substrings of [`Room::rendered`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blacklist {
    terms: Vec<String>,
}

impl Blacklist {
    /// Empty terms are dropped; they would match every room.
    pub fn new<S: AsRef<str>>(terms: &[S]) -> Self {
        Self {
            terms: terms
                .iter()
                .map(|t| t.as_ref().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn matches(&self, room: &Room) -> bool {
        if self.terms.is_empty() {
            return false;
        }
        let text = room.rendered();
        self.terms.iter().any(|term| text.contains(term.as_str()))
    }

    /// Drop blacklisted rooms, keeping the rest in their original order.
    pub fn apply(&self, rooms: Vec<Room>) -> Vec<Room> {
        if self.terms.is_empty() {
            return rooms;
        }
        rooms.into_iter().filter(|room| !self.matches(room)).collect()
    }
}

/// Remove rooms whose rendered text contains any of `terms`, case-insensitively.
pub fn apply<S: AsRef<str>>(rooms: Vec<Room>, terms: &[S]) -> Vec<Room> {
    Blacklist::new(terms).apply(rooms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: i64, name: &str, building_code: &str) -> Room {
        Room {
            room_id: id,
            room_code: format!("R{id}"),
            building_id: 1,
            building_code: building_code.into(),
            name: name.into(),
        }
    }

    #[test]
    fn term_matches_case_insensitively() {
        let rooms = vec![room(1, "Storage Room 3B", "GLNN"), room(2, "Seminar 101", "GLNN")];
        let kept = apply(rooms, &["storage"]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "Seminar 101");
    }

    #[test]
    fn uppercase_terms_are_folded_too() {
        let kept = apply(vec![room(1, "storage closet", "X")], &["STORAGE"]);
        assert!(kept.is_empty());
    }

    #[test]
    fn empty_blacklist_preserves_order_and_content() {
        let rooms = vec![room(3, "C", "X"), room(1, "A", "X"), room(2, "B", "X")];
        let kept = apply::<&str>(rooms.clone(), &[]);
        assert_eq!(kept, rooms);
    }

    #[test]
    fn empty_terms_are_ignored() {
        let rooms = vec![room(1, "A", "X")];
        let bl = Blacklist::new(&["", ""]);
        assert!(bl.is_empty());
        assert_eq!(bl.apply(rooms.clone()), rooms);
    }

    #[test]
    fn matches_fields_other_than_name() {
        let rooms = vec![room(1, "Lounge", "MEDSCH"), room(2, "Lounge", "GLNN")];
        let kept = apply(rooms, &["medsch"]);
        assert_eq!(kept.iter().map(|r| r.room_id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn survivors_keep_relative_order() {
        let rooms = vec![
            room(1, "Zeta", "X"),
            room(2, "Storage", "X"),
            room(3, "Alpha", "X"),
        ];
        let kept = apply(rooms, &["storage"]);
        assert_eq!(kept.iter().map(|r| r.room_id).collect::<Vec<_>>(), vec![1, 3]);
    }
}
