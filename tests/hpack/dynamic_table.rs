//! Tests for the HPACK dynamic table

use h2_mux::{DynamicTable, ErrorCode};

#[test]
fn test_capacity_bounds_size() {
    let mut table = DynamicTable::new(200);
    for i in 0..20 {
        table.add(format!("name-{}", i), "v".repeat(i));
        assert!(table.size() <= table.capacity());
    }
    // Newest first.
    assert_eq!(table.get(1).unwrap().name, "name-19");
}

#[test]
fn test_oldest_evicted_first() {
    // Each entry is 1 + 1 + 32 = 34 bytes; three fit in 110.
    let mut table = DynamicTable::new(110);
    table.add("a".into(), "1".into());
    table.add("b".into(), "2".into());
    table.add("c".into(), "3".into());
    let evicted = table.add("d".into(), "4".into());

    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].name, "a");
    let names: Vec<&str> = (1..=table.len())
        .map(|i| table.get(i).unwrap().name.as_str())
        .collect();
    assert_eq!(names, vec!["d", "c", "b"]);
}

#[test]
fn test_resize_to_zero_invalidates_all_indices() {
    let mut table = DynamicTable::new(4096);
    for i in 0..10 {
        table.add(format!("k{}", i), format!("v{}", i));
    }
    let evicted = table.resize(0);
    assert_eq!(evicted.len(), 10);
    assert_eq!(table.size(), 0);
    for index in 0..=11 {
        assert_eq!(table.get(index).map(|_| ()), Err(ErrorCode::CompressionError));
    }
}

#[test]
fn test_shrink_keeps_newest() {
    let mut table = DynamicTable::new(4096);
    table.add("old".into(), "x".repeat(100));
    table.add("new".into(), "y".into());
    table.resize(64);
    assert_eq!(table.len(), 1);
    assert_eq!(table.get(1).unwrap().name, "new");
}

#[test]
fn test_entry_too_large_empties_table() {
    let mut table = DynamicTable::new(64);
    table.add("a".into(), "b".into());
    let evicted = table.add("huge".into(), "z".repeat(64));
    assert_eq!(evicted.len(), 1);
    assert!(table.is_empty());
}
