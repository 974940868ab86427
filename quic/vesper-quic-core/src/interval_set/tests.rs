// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;

fn intervals(set: &IntervalSet) -> Vec<(u64, u64)> {
    set.iter()
        .map(|interval| (interval.start, interval.end))
        .collect()
}

#[test]
fn insert_coalesces_adjacent() {
    let mut set = IntervalSet::new();
    assert!(set.insert_value(3));
    assert!(set.insert_value(5));
    assert_eq!(intervals(&set), vec![(3, 3), (5, 5)]);

    // filling the gap merges into one interval
    assert!(set.insert_value(4));
    assert_eq!(intervals(&set), vec![(3, 5)]);
}

#[test]
fn duplicate_insert_reports_false() {
    let mut set = IntervalSet::new();
    assert!(set.insert(Interval::new(10, 20)));
    assert!(!set.insert_value(15));
    assert!(!set.insert(Interval::new(10, 20)));
    assert!(set.insert(Interval::new(18, 25)));
    assert_eq!(intervals(&set), vec![(10, 25)]);
}

#[test]
fn insert_spanning_multiple_intervals() {
    let mut set = IntervalSet::new();
    set.insert(Interval::new(0, 1));
    set.insert(Interval::new(5, 6));
    set.insert(Interval::new(10, 11));

    assert!(set.insert(Interval::new(0, 12)));
    assert_eq!(intervals(&set), vec![(0, 12)]);
}

#[test]
fn contains_and_bounds() {
    let set: IntervalSet = [1..=3, 7..=9].into_iter().collect();
    assert!(set.contains(1));
    assert!(set.contains(8));
    assert!(!set.contains(0));
    assert!(!set.contains(5));
    assert!(!set.contains(10));
    assert_eq!(set.min_value(), Some(1));
    assert_eq!(set.max_value(), Some(9));
    assert_eq!(set.count(), 6);
    assert_eq!(set.interval_len(), 2);
}

#[test]
fn remove_until_sheds_and_trims() {
    let mut set: IntervalSet = [1..=3, 7..=9, 20..=30].into_iter().collect();
    set.remove_until(8);
    assert_eq!(intervals(&set), vec![(8, 9), (20, 30)]);
    set.remove_until(31);
    assert!(set.is_empty());
}

#[test]
fn descending_iteration() {
    let set: IntervalSet = [1..=3, 7..=9].into_iter().collect();
    let descending: Vec<_> = set
        .iter_descending()
        .map(|interval| (interval.start, interval.end))
        .collect();
    assert_eq!(descending, vec![(7, 9), (1, 3)]);
}

#[test]
fn insert_matches_btree_model() {
    use std::collections::BTreeSet;

    bolero::check!()
        .with_type::<Vec<(u8, u8)>>()
        .for_each(|ops| {
            let mut set = IntervalSet::new();
            let mut model = BTreeSet::new();

            for (start, len) in ops {
                let start = *start as u64;
                let end = start + (*len as u64 % 8);
                set.insert(Interval::new(start, end));
                for value in start..=end {
                    model.insert(value);
                }
            }

            assert_eq!(set.count() as usize, model.len());
            for value in 0u64..=300 {
                assert_eq!(set.contains(value), model.contains(&value), "value {value}");
            }
        });
}
