use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::MenuEntry;

/// Where a pinned action ends up in the final candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    First,
    Last,
    /// Clamped to the list length.
    Index(usize),
}

/// A repositioning request for every entry carrying `action`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pin {
    pub owner: String,
    pub action: Value,
    pub placement: Placement,
}

/// Apply `pins` in order. Matching entries move as a block (keeping their own
/// relative order); every other entry keeps its relative order.
pub fn apply_placements(mut entries: Vec<MenuEntry>, pins: &[Pin]) -> Vec<MenuEntry> {
    for pin in pins {
        let (moved, mut rest): (Vec<MenuEntry>, Vec<MenuEntry>) =
            entries.into_iter().partition(|entry| entry.action == pin.action);
        if moved.is_empty() {
            entries = rest;
            continue;
        }

        let at = match pin.placement {
            Placement::First => 0,
            Placement::Last => rest.len(),
            Placement::Index(n) => n.min(rest.len()),
        };
        let tail = rest.split_off(at);
        rest.extend(moved);
        rest.extend(tail);
        entries = rest;
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(actions: &[&str]) -> Vec<MenuEntry> {
        actions.iter().map(|a| MenuEntry::new(*a, *a)).collect()
    }

    fn actions(entries: &[MenuEntry]) -> Vec<&str> {
        entries.iter().filter_map(|e| e.action.as_str()).collect()
    }

    fn pin(action: &str, placement: Placement) -> Pin {
        Pin {
            owner: "tests".into(),
            action: action.into(),
            placement,
        }
    }

    #[test]
    fn pinned_action_moves_others_keep_order() {
        let sorted = apply_placements(
            entries(&["walk", "attack", "examine", "pickup"]),
            &[pin("pickup", Placement::First)],
        );
        assert_eq!(actions(&sorted), vec!["pickup", "walk", "attack", "examine"]);
    }

    #[test]
    fn index_is_clamped_and_last_appends() {
        let sorted = apply_placements(
            entries(&["walk", "attack", "examine"]),
            &[pin("walk", Placement::Index(99))],
        );
        assert_eq!(actions(&sorted), vec!["attack", "examine", "walk"]);

        let sorted = apply_placements(
            entries(&["walk", "attack", "examine"]),
            &[pin("attack", Placement::Last)],
        );
        assert_eq!(actions(&sorted), vec!["walk", "examine", "attack"]);
    }

    #[test]
    fn duplicate_actions_move_as_a_block() {
        let mut list = entries(&["walk", "attack", "examine", "attack"]);
        list[1].label = "Attack goblin".into();
        list[3].label = "Attack rat".into();
        let sorted = apply_placements(list, &[pin("attack", Placement::Index(1))]);
        let labels: Vec<&str> = sorted.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["walk", "Attack goblin", "Attack rat", "examine"]);
    }

    #[test]
    fn numeric_actions_match_numeric_pins() {
        let list: Vec<MenuEntry> = [23, 1, 7].into_iter().map(|a| MenuEntry::new(a, "")).collect();
        let pin = Pin {
            owner: "tests".into(),
            action: Value::from(1),
            placement: Placement::First,
        };
        let sorted = apply_placements(list, &[pin]);
        let order: Vec<Value> = sorted.into_iter().map(|e| e.action).collect();
        assert_eq!(order, vec![Value::from(1), Value::from(23), Value::from(7)]);
    }

    #[test]
    fn later_pins_win_and_missing_actions_are_ignored() {
        let sorted = apply_placements(
            entries(&["a", "b", "c"]),
            &[
                pin("c", Placement::First),
                pin("zz", Placement::First),
                pin("a", Placement::First),
            ],
        );
        assert_eq!(actions(&sorted), vec!["a", "c", "b"]);
    }
}
