//! Tests for the shipped task catalog.

use query_grader::catalog::{TaskCatalog, TaskFilter};
use query_grader::guard::validate;
use std::path::Path;

fn shipped_catalog() -> TaskCatalog {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tasks.toml");
    TaskCatalog::load(&path).unwrap()
}

#[test]
fn test_shipped_catalog_loads() {
    let catalog = shipped_catalog();
    assert_eq!(catalog.len(), 3);
    assert_eq!(catalog.get(1).unwrap().gold_query, "SELECT * FROM customers;");
    assert_eq!(catalog.get(3).unwrap().database_schema, "music");
    assert_eq!(catalog.categories(), vec!["ecommerce", "music"]);
}

#[test]
fn test_shipped_reference_queries_pass_the_guard() {
    let catalog = shipped_catalog();
    for task in catalog.list(&TaskFilter::default()) {
        assert!(
            validate(task.gold_query.trim()).is_ok(),
            "reference query of task {} is rejected",
            task.task_id
        );
    }
}

#[test]
fn test_filter_by_category() {
    let catalog = shipped_catalog();
    let music = catalog.list(&TaskFilter {
        category: Some("music".to_string()),
        difficulty: None,
    });
    assert_eq!(music.len(), 1);
    assert_eq!(music[0].title, "Select all tracks");
}
