mod support;

use std::time::Duration;

use compkit::{ComponentError, ComponentManager, LoadError, ManagerConfig};
use support::{list, node, slow_node, Journal};

async fn load_err(components: compkit::ComponentList) -> LoadError {
    let registry = components.build_default().unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        ComponentManager::start(registry, &ManagerConfig::default()),
    )
    .await
    .expect("a cycle must never deadlock the load")
    .unwrap_err()
}

fn cycle_path(err: &LoadError) -> (String, Vec<String>) {
    let failure = err
        .find_failure(|e| matches!(e, ComponentError::CyclicDependency { .. }))
        .expect("cycle reported");
    match &failure.error {
        ComponentError::CyclicDependency { path } => (failure.name.clone(), path.clone()),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn self_dependency_is_rejected() {
    let journal = Journal::default();
    let err = load_err(list(vec![("ouroboros", node("ouroboros", &["ouroboros"], &journal))])).await;

    let (name, path) = cycle_path(&err);
    assert_eq!(name, "ouroboros");
    assert_eq!(path, vec!["ouroboros", "ouroboros"]);
    assert_eq!(err.failed.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mutual_dependency_fails_one_side_and_cancels_the_rest() {
    let journal = Journal::default();
    let err = load_err(list(vec![
        ("a", node("a", &["b"], &journal)),
        ("b", node("b", &["a"], &journal)),
        ("bystander", slow_node("bystander", &[], Duration::from_secs(30), &journal)),
    ]))
    .await;

    let (name, path) = cycle_path(&err);
    let other = if name == "a" { "b" } else { "a" };
    assert_eq!(path, vec![name.as_str(), other, name.as_str()]);

    assert_eq!(err.failed.len(), 1);
    let mut cancelled = err.cancelled_names();
    cancelled.sort();
    let mut expected = vec![other, "bystander"];
    expected.sort();
    assert_eq!(cancelled, expected);
    assert!(journal.of("stop").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_way_cycle_is_detected() {
    let journal = Journal::default();
    let err = load_err(list(vec![
        ("a", node("a", &["b"], &journal)),
        ("b", node("b", &["c"], &journal)),
        ("c", node("c", &["a"], &journal)),
    ]))
    .await;

    let (name, path) = cycle_path(&err);
    assert_eq!(path.len(), 4);
    assert_eq!(path.first(), Some(&name));
    assert_eq!(path.last(), Some(&name));
    assert_eq!(err.failed.len(), 1);
    assert_eq!(err.cancelled.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn diamond_is_not_a_cycle() {
    let journal = Journal::default();
    let registry = list(vec![
        ("top", node("top", &["left", "right"], &journal)),
        ("left", node("left", &["bottom"], &journal)),
        ("right", node("right", &["bottom"], &journal)),
        ("bottom", slow_node("bottom", &[], Duration::from_millis(20), &journal)),
    ])
    .build_default()
    .unwrap();

    let manager = ComponentManager::start(registry, &ManagerConfig::default())
        .await
        .expect("shared dependencies are fine");
    let order = manager.realized_order();
    assert_eq!(order.first().map(String::as_str), Some("bottom"));
    assert_eq!(order.last().map(String::as_str), Some("top"));
    manager.shutdown().await;
    assert_eq!(journal.of("stop").last().map(String::as_str), Some("bottom"));
}
