use ahash::AHashMap;
use rand::{Rng, SeedableRng, rngs::StdRng};
use sqlitecascade::{
    CascadeError, DependencyOrderer, EntityType, Relation, SchemaGraph, SchemaRegistry,
    bfs::{bottom_up_order, shortest_join_path},
};

fn build_registry(entities: &[&str], relations: &[(&str, &str, &str)]) -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    for name in entities {
        registry
            .register_entity(EntityType::new(*name, name.to_lowercase()))
            .unwrap();
    }
    for &(source, name, target) in relations {
        registry
            .register_relation(Relation::belongs_to(
                source,
                name,
                target,
                format!("{name}_id"),
            ))
            .unwrap();
    }
    registry
}

fn project_schema() -> SchemaRegistry {
    build_registry(
        &["Project", "Subproject", "Task", "Attachment", "Comment", "Audit"],
        &[
            ("Subproject", "project", "Project"),
            ("Task", "project", "Project"),
            ("Task", "subproject", "Subproject"),
            ("Attachment", "task", "Task"),
            ("Attachment", "subproject", "Subproject"),
            ("Comment", "task", "Task"),
            ("Audit", "project", "Project"),
        ],
    )
}

#[test]
fn test_bottom_up_order_leaf_first() {
    let registry = project_schema();
    let order = bottom_up_order(&registry, "Project").expect("order");
    assert_eq!(
        order,
        vec!["Attachment", "Comment", "Task", "Subproject", "Audit", "Project"]
    );
}

#[test]
fn test_bottom_up_order_from_inner_entity() {
    let registry = project_schema();
    let order = bottom_up_order(&registry, "Task").expect("order");
    assert_eq!(order, vec!["Attachment", "Comment", "Task"]);
}

#[test]
fn test_bottom_up_order_ignores_self_reference() {
    let registry = build_registry(
        &["Project", "Task"],
        &[("Task", "project", "Project"), ("Task", "parent", "Task")],
    );
    let order = bottom_up_order(&registry, "Project").expect("order");
    assert_eq!(order, vec!["Task", "Project"]);
}

#[test]
fn test_bottom_up_order_keeps_root_last_in_cycle() {
    let registry = build_registry(
        &["Project", "Task"],
        &[("Project", "current_task", "Task"), ("Task", "project", "Project")],
    );
    let order = bottom_up_order(&registry, "Project").expect("order");
    assert_eq!(order, vec!["Task", "Project"]);
}

#[test]
fn test_bottom_up_order_breaks_cycles_by_registration() {
    let registry = build_registry(
        &["Root", "A", "B"],
        &[("A", "root", "Root"), ("A", "b", "B"), ("B", "a", "A")],
    );
    let order = bottom_up_order(&registry, "Root").expect("order");
    assert_eq!(order, vec!["A", "B", "Root"]);
}

#[test]
fn test_bottom_up_property_on_random_dags() {
    for seed in 0..25_u64 {
        let mut rng = StdRng::seed_from_u64(0xCA5C + seed);
        let size = rng.gen_range(3..12);
        let names: Vec<String> = (0..size).map(|idx| format!("E{idx}")).collect();
        let mut edges = Vec::new();
        // every entity except E0 references at least one lower-numbered entity
        for child in 1..size {
            let count = rng.gen_range(1..=child.min(3));
            for _ in 0..count {
                let parent = rng.gen_range(0..child);
                edges.push((child, parent));
            }
        }
        edges.sort();
        edges.dedup();
        let mut registry = SchemaRegistry::new();
        // register in shuffled-ish order so registration order differs from topology
        let mut order: Vec<usize> = (0..size).collect();
        order.rotate_left(rng.gen_range(0..size));
        for idx in &order {
            registry
                .register_entity(EntityType::new(names[*idx].clone(), names[*idx].to_lowercase()))
                .unwrap();
        }
        for (child, parent) in &edges {
            registry
                .register_relation(Relation::belongs_to(
                    names[*child].clone(),
                    format!("to_{parent}"),
                    names[*parent].clone(),
                    format!("e{parent}_id"),
                ))
                .unwrap();
        }

        let plan = registry.bottom_up_types("E0").expect("order");
        assert_eq!(plan.last().map(String::as_str), Some("E0"));
        let position: AHashMap<&str, usize> = plan
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();
        for (child, parent) in &edges {
            let (Some(c), Some(p)) = (
                position.get(names[*child].as_str()),
                position.get(names[*parent].as_str()),
            ) else {
                continue;
            };
            assert!(c < p, "seed {seed}: {} must precede {}", names[*child], names[*parent]);
        }
    }
}

#[test]
fn test_shortest_join_path_prefers_registration_order() {
    let registry = project_schema();
    let path = shortest_join_path(&registry, "Attachment", "Project")
        .expect("path")
        .expect("connected");
    assert_eq!(path.describe(), "task.project");
    assert!(path.connects("Attachment", "Project"));
}

#[test]
fn test_shortest_join_path_missing() {
    let registry = project_schema();
    let path = shortest_join_path(&registry, "Audit", "Subproject").expect("path");
    assert_eq!(path, None);
}

#[test]
fn test_shortest_join_path_same_entity_is_empty() {
    let registry = project_schema();
    let path = shortest_join_path(&registry, "Task", "Task").unwrap().unwrap();
    assert!(path.is_empty());
}

#[test]
fn test_orderer_applies_exclusions() {
    let registry = project_schema();
    let orderer = DependencyOrderer::new(&registry, &registry).with_exclusions(["Audit"]);
    let order = orderer.bottom_up("Project").unwrap();
    assert_eq!(order, vec!["Attachment", "Comment", "Task", "Subproject", "Project"]);
}

#[test]
fn test_orderer_path_to_reports_missing_path() {
    let registry = project_schema();
    let orderer = DependencyOrderer::new(&registry, &registry);
    let err = orderer.path_to("Audit", "Task").unwrap_err();
    assert!(matches!(err, CascadeError::NoPathFound { .. }));
}

#[test]
fn test_orderer_plan_uses_overrides() {
    let registry = project_schema();
    let orderer = DependencyOrderer::new(&registry, &registry);
    let mut overrides = AHashMap::new();
    overrides.insert(
        "Attachment".to_string(),
        vec!["subproject".to_string(), "project".to_string()],
    );
    let plan = orderer.plan("Project", &overrides).unwrap();
    assert_eq!(plan.root(), "Project");
    assert_eq!(plan.steps().last().unwrap().join, None);
    let attachment = plan.step("Attachment").unwrap();
    assert_eq!(
        attachment.join.as_ref().map(|path| path.describe()),
        Some("subproject.project".to_string())
    );
    let comment = plan.step("Comment").unwrap();
    assert_eq!(
        comment.join.as_ref().map(|path| path.describe()),
        Some("task.project".to_string())
    );
}

#[test]
fn test_plan_defers_entities_joined_through_in_cycle() {
    let registry = build_registry(
        &["Root", "A", "B"],
        &[("A", "root", "Root"), ("A", "b", "B"), ("B", "a", "A")],
    );
    let orderer = DependencyOrderer::new(&registry, &registry);
    let plan = orderer.plan("Root", &AHashMap::new()).unwrap();
    // B reaches Root through A, so A must outlive B's step
    assert_eq!(plan.entities(), vec!["B", "A", "Root"]);
    assert_eq!(
        plan.step("B").and_then(|step| step.join.as_ref()).map(|path| path.describe()),
        Some("a.root".to_string())
    );
}

#[test]
fn test_plan_rejects_overrides_joining_through_each_other() {
    let registry = build_registry(
        &["Root", "A", "B"],
        &[
            ("A", "root", "Root"),
            ("B", "root", "Root"),
            ("A", "b", "B"),
            ("B", "a", "A"),
        ],
    );
    let orderer = DependencyOrderer::new(&registry, &registry);
    let mut overrides = AHashMap::new();
    overrides.insert("A".to_string(), vec!["b".to_string(), "root".to_string()]);
    overrides.insert("B".to_string(), vec!["a".to_string(), "root".to_string()]);
    let err = orderer.plan("Root", &overrides).unwrap_err();
    assert!(matches!(err, CascadeError::InvalidInput(_)));
}

#[test]
fn test_override_must_reach_root() {
    let registry = project_schema();
    let orderer = DependencyOrderer::new(&registry, &registry);
    let err = orderer
        .resolve_override("Attachment", "Project", &["subproject"])
        .unwrap_err();
    assert!(matches!(err, CascadeError::InvalidInput(_)));
    let err = orderer
        .resolve_override("Attachment", "Project", &["owner"])
        .unwrap_err();
    assert!(matches!(err, CascadeError::InvalidInput(_)));
}
