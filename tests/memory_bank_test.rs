use std::sync::Arc;
use std::thread;
use std::time::Duration;

use askdata::store::{MemoryBank, MemorySortKey};

#[test]
fn add_returns_distinct_ids_under_concurrent_callers() {
    let bank = Arc::new(MemoryBank::new());

    let mut handles = Vec::new();
    for t in 0..8 {
        let bank = bank.clone();
        handles.push(thread::spawn(move || {
            (0..50)
                .map(|i| bank.add(format!("note {}-{}", t, i), "general", None))
                .collect::<Vec<_>>()
        }));
    }

    let mut ids: Vec<String> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let total = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), total, "memory ids must be pairwise distinct");
}

#[test]
fn search_matches_content_and_category_case_insensitively() {
    let bank = MemoryBank::new();
    bank.add("Sales grew 10%", "insight", None);
    bank.add("remember the quarterly numbers", "sales_note", None);
    bank.add("unrelated note", "general", None);

    let hits = bank.search("sale", 10);
    assert_eq!(hits.len(), 2);

    let upper: Vec<String> = bank.search("SALES", 10).iter().map(|m| m.id.clone()).collect();
    let lower: Vec<String> = bank.search("sales", 10).iter().map(|m| m.id.clone()).collect();
    assert_eq!(upper, lower, "query case must not change results");
}

#[test]
fn list_filters_by_category_and_orders_newest_first() {
    let bank = MemoryBank::new();
    let _t1 = bank.add("first insight", "insight", None);
    thread::sleep(Duration::from_millis(5));
    let t2 = bank.add("second insight", "insight", None);
    thread::sleep(Duration::from_millis(5));
    let t3 = bank.add("third insight", "insight", None);
    bank.add("a preference", "user_preference", None);

    let listed = bank.list(Some("insight"), 2, MemorySortKey::CreatedAt);
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, t3);
    assert_eq!(listed[1].id, t2);
}

#[test]
fn list_sorts_by_access_count_when_asked() {
    let bank = MemoryBank::new();
    let quiet = bank.add("rarely read", "general", None);
    let busy = bank.add("often read", "general", None);
    for _ in 0..3 {
        bank.get(&busy);
    }

    let listed = bank.list(None, 10, MemorySortKey::AccessCount);
    assert_eq!(listed[0].id, busy);
    assert_eq!(listed[1].id, quiet);

    // LastAccessed sorts never-read entries last
    let listed = bank.list(None, 10, MemorySortKey::LastAccessed);
    assert_eq!(listed[0].id, busy);
    assert_eq!(listed[1].id, quiet);
}

#[test]
fn get_updates_access_stats() {
    let bank = MemoryBank::new();
    let id = bank.add("popular note", "general", None);

    let first = bank.get(&id).unwrap();
    assert_eq!(first.access_count, 1);
    assert!(first.last_accessed.is_some());

    let second = bank.get(&id).unwrap();
    assert_eq!(second.access_count, 2);

    assert!(bank.get("no-such-id").is_none());
}

#[test]
fn search_ranks_by_access_count_then_recency() {
    let bank = MemoryBank::new();
    let hot = bank.add("alpha report", "general", None);
    thread::sleep(Duration::from_millis(5));
    let cold = bank.add("alpha summary", "general", None);
    for _ in 0..3 {
        bank.get(&hot);
    }

    let hits = bank.search("alpha", 10);
    assert_eq!(hits[0].id, hot);
    assert_eq!(hits[1].id, cold);

    // returned memories count as accessed
    assert!(hits[1].access_count > 0);
}

#[test]
fn summary_counts_categories_and_top_accessed() {
    let bank = MemoryBank::new();
    bank.add("one", "insight", None);
    bank.add("two", "insight", None);
    let read = bank.add("three", "user_preference", None);
    bank.get(&read);

    let summary = bank.summary();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.categories["insight"], 2);
    assert_eq!(summary.categories["user_preference"], 1);
    assert_eq!(summary.most_accessed[0].id, read);
}

#[test]
fn delete_and_clear() {
    let bank = MemoryBank::new();
    let id = bank.add("temporary", "general", None);
    assert!(bank.delete(&id));
    assert!(!bank.delete(&id));

    bank.add("a", "general", None);
    bank.add("b", "general", None);
    assert_eq!(bank.clear(), 2);
    assert_eq!(bank.summary().total, 0);
}
