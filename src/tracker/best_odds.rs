use std::collections::BTreeMap;

use crate::types::{BestOddsEntry, LineSnapshot};

/// Picks the best price per selection across bookies within one generation.
///
/// Higher American odds are better for the bettor on both sides of the sign:
/// +150 beats +120 and -105 beats -110. A plain `candidate > recorded`
/// comparison covers both, so there is no separate favourite/underdog rule.
/// Ties keep the first bookie seen. Selection labels are compared verbatim.
pub fn select_best(generation: &[LineSnapshot]) -> BTreeMap<String, BestOddsEntry> {
    let mut best: BTreeMap<String, BestOddsEntry> = BTreeMap::new();

    for line in generation {
        let candidate = BestOddsEntry {
            bookie_id: line.bookie_id,
            odds: line.odds,
            line_value: line.line_value,
        };
        match best.get_mut(&line.selection) {
            Some(recorded) if line.odds > recorded.odds => *recorded = candidate,
            Some(_) => {}
            None => {
                best.insert(line.selection.clone(), candidate);
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn line(bookie_id: u32, selection: &str, odds: i32) -> LineSnapshot {
        LineSnapshot {
            event_id: "e1".to_string(),
            market_id: 2,
            bookie_id,
            selection: selection.to_string(),
            player_name: None,
            line_value: Some(44.5),
            odds,
            timestamp: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        }
    }

    #[test]
    fn empty_generation_gives_empty_map() {
        assert!(select_best(&[]).is_empty());
    }

    #[test]
    fn less_negative_favourite_wins() {
        let best = select_best(&[line(10, "Over", -110), line(12, "Over", -105)]);
        assert_eq!(best.len(), 1);
        assert_eq!(best["Over"].bookie_id, 12);
        assert_eq!(best["Over"].odds, -105);
    }

    #[test]
    fn larger_underdog_price_wins() {
        let best = select_best(&[line(10, "DEN", 150), line(12, "DEN", 165), line(13, "DEN", 140)]);
        assert_eq!(best["DEN"].bookie_id, 12);
        assert_eq!(best["DEN"].odds, 165);
    }

    #[test]
    fn positive_beats_negative_for_same_selection() {
        let best = select_best(&[line(10, "KC", -102), line(12, "KC", 100)]);
        assert_eq!(best["KC"].odds, 100);
    }

    #[test]
    fn one_entry_per_selection_with_max_odds() {
        let lines = vec![
            line(10, "Over", -110),
            line(10, "Under", -110),
            line(12, "Over", -115),
            line(12, "Under", -105),
            line(13, "Over", -108),
        ];
        let best = select_best(&lines);
        assert_eq!(best.len(), 2);
        for (selection, entry) in &best {
            let max = lines.iter().filter(|l| &l.selection == selection).map(|l| l.odds).max();
            assert_eq!(Some(entry.odds), max);
        }
        assert_eq!(best["Over"].bookie_id, 13);
        assert_eq!(best["Under"].bookie_id, 12);
    }

    #[test]
    fn ties_keep_first_bookie() {
        let best = select_best(&[line(19, "Under", -110), line(10, "Under", -110)]);
        assert_eq!(best["Under"].bookie_id, 19);
    }

    #[test]
    fn labels_are_not_normalised() {
        let best = select_best(&[line(10, "Over", -110), line(12, "over", -105)]);
        assert_eq!(best.len(), 2);
    }
}
