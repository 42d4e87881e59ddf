use chrono::{TimeZone, Utc};
use cms_delegate_core::db::open_db_in_memory;
use cms_delegate_core::{
    ChangeEvent, ChangeNotifier, CollectionDescriptor, CollectionRegistry, DataSourceDelegate,
    Entity, EntityCursor, EntityValues, FetchCollectionQuery, FieldFilter, FilterOp,
    NotifyResult, OrderBy, RepoError, SaveEntityRequest, SqliteEntityRepository, Value,
};
use rusqlite::Connection;
use std::cell::Cell;

#[derive(Default)]
struct CountingNotifier {
    calls: Cell<usize>,
}

impl ChangeNotifier for CountingNotifier {
    fn notify(&self, _event: &ChangeEvent) -> NotifyResult<()> {
        self.calls.set(self.calls.get() + 1);
        Ok(())
    }
}

fn registry() -> CollectionRegistry {
    let mut quiet = CollectionDescriptor::new("logs");
    quiet.text_search_enabled = false;
    let mut aliased = CollectionDescriptor::new("people");
    aliased.target = Some("users".to_string());
    CollectionRegistry::new()
        .with(CollectionDescriptor::new("users"))
        .unwrap()
        .with(quiet)
        .unwrap()
        .with(aliased)
        .unwrap()
}

fn seed_users(repo: &impl DataSourceDelegate) {
    let rows = [
        ("u1", "Ann Lee", 34, Some("admin"), 2021),
        ("u2", "Bo Chen", 27, None, 2022),
        ("u3", "Cy Ann", 41, Some("editor"), 2020),
        ("u4", "Di Park", 27, Some("admin"), 2023),
    ];
    for (id, name, age, role, year) in rows {
        let mut values = EntityValues::new();
        values.insert("name".to_string(), Value::from(name));
        values.insert("age".to_string(), Value::Integer(age));
        values.insert(
            "joined".to_string(),
            Value::Date(Utc.with_ymd_and_hms(year, 6, 1, 12, 0, 0).unwrap()),
        );
        if let Some(role) = role {
            values.insert(
                "roles".to_string(),
                Value::Array(vec![Value::from(role), Value::from("member")]),
            );
            values.insert("primaryRole".to_string(), Value::from(role));
        }
        repo.save_entity(&SaveEntityRequest::existing("users", id, values))
            .unwrap();
    }
}

fn ids(entities: &[Entity]) -> Vec<&str> {
    entities.iter().map(|entity| entity.id.as_str()).collect()
}

fn setup<'a>(
    conn: &'a Connection,
    notifier: &'a CountingNotifier,
) -> SqliteEntityRepository<'a, &'a CountingNotifier> {
    let repo = SqliteEntityRepository::try_new(conn, registry(), notifier).unwrap();
    seed_users(&repo);
    repo
}

#[test]
fn default_order_is_by_id_and_reads_do_not_notify() {
    let conn = open_db_in_memory().unwrap();
    let notifier = CountingNotifier::default();
    let repo = setup(&conn, &notifier);
    let writes = notifier.calls.get();

    let all = repo
        .fetch_collection(&FetchCollectionQuery::new("users"))
        .unwrap();
    assert_eq!(ids(&all), vec!["u1", "u2", "u3", "u4"]);
    repo.fetch_entity("users", "u1", None).unwrap();
    repo.check_unique_field("users", "name", &Value::from("x"), None, None)
        .unwrap();
    assert_eq!(notifier.calls.get(), writes);
}

#[test]
fn comparison_filters_apply_to_scalars_and_dates() {
    let conn = open_db_in_memory().unwrap();
    let notifier = CountingNotifier::default();
    let repo = setup(&conn, &notifier);

    let mut query = FetchCollectionQuery::new("users");
    query.filters = vec![FieldFilter::new("age", FilterOp::Eq, 27)];
    assert_eq!(ids(&repo.fetch_collection(&query).unwrap()), vec!["u2", "u4"]);

    query.filters = vec![FieldFilter::new("age", FilterOp::Gt, 30)];
    assert_eq!(ids(&repo.fetch_collection(&query).unwrap()), vec!["u1", "u3"]);

    let cutoff = Utc.with_ymd_and_hms(2021, 12, 31, 0, 0, 0).unwrap();
    query.filters = vec![FieldFilter::new("joined", FilterOp::Ge, cutoff)];
    assert_eq!(ids(&repo.fetch_collection(&query).unwrap()), vec!["u2", "u4"]);

    query.filters = vec![
        FieldFilter::new("age", FilterOp::Le, 34),
        FieldFilter::new("name", FilterOp::Ne, "Bo Chen"),
    ];
    assert_eq!(ids(&repo.fetch_collection(&query).unwrap()), vec!["u1", "u4"]);
}

#[test]
fn null_equality_matches_missing_fields() {
    let conn = open_db_in_memory().unwrap();
    let notifier = CountingNotifier::default();
    let repo = setup(&conn, &notifier);

    let mut query = FetchCollectionQuery::new("users");
    query.filters = vec![FieldFilter::new("primaryRole", FilterOp::Eq, Value::Null)];
    assert_eq!(ids(&repo.fetch_collection(&query).unwrap()), vec!["u2"]);

    query.filters = vec![FieldFilter::new("primaryRole", FilterOp::Ne, Value::Null)];
    assert_eq!(
        ids(&repo.fetch_collection(&query).unwrap()),
        vec!["u1", "u3", "u4"]
    );
}

#[test]
fn list_and_array_filters() {
    let conn = open_db_in_memory().unwrap();
    let notifier = CountingNotifier::default();
    let repo = setup(&conn, &notifier);

    let mut query = FetchCollectionQuery::new("users");
    query.filters = vec![FieldFilter::new("roles", FilterOp::ArrayContains, "admin")];
    assert_eq!(ids(&repo.fetch_collection(&query).unwrap()), vec!["u1", "u4"]);

    query.filters = vec![FieldFilter::new(
        "roles",
        FilterOp::ArrayContainsAny,
        Value::Array(vec![Value::from("editor"), Value::from("owner")]),
    )];
    assert_eq!(ids(&repo.fetch_collection(&query).unwrap()), vec!["u3"]);

    query.filters = vec![FieldFilter::new(
        "age",
        FilterOp::In,
        Value::Array(vec![Value::Integer(41), Value::Integer(34)]),
    )];
    assert_eq!(ids(&repo.fetch_collection(&query).unwrap()), vec!["u1", "u3"]);

    query.filters = vec![FieldFilter::new(
        "primaryRole",
        FilterOp::NotIn,
        Value::Array(vec![Value::from("admin")]),
    )];
    assert_eq!(ids(&repo.fetch_collection(&query).unwrap()), vec!["u3"]);

    query.filters = vec![FieldFilter::new(
        "age",
        FilterOp::In,
        Value::Array(Vec::new()),
    )];
    assert!(repo.fetch_collection(&query).unwrap().is_empty());
}

#[test]
fn ordering_breaks_ties_by_id() {
    let conn = open_db_in_memory().unwrap();
    let notifier = CountingNotifier::default();
    let repo = setup(&conn, &notifier);

    let mut query = FetchCollectionQuery::new("users");
    query.order_by = Some(OrderBy::asc("age"));
    assert_eq!(
        ids(&repo.fetch_collection(&query).unwrap()),
        vec!["u2", "u4", "u1", "u3"]
    );

    query.order_by = Some(OrderBy::desc("joined"));
    assert_eq!(
        ids(&repo.fetch_collection(&query).unwrap()),
        vec!["u4", "u2", "u1", "u3"]
    );
}

#[test]
fn cursor_pages_through_ordered_results() {
    let conn = open_db_in_memory().unwrap();
    let notifier = CountingNotifier::default();
    let repo = setup(&conn, &notifier);

    let order = OrderBy::desc("age");
    let mut query = FetchCollectionQuery::new("users");
    query.order_by = Some(order.clone());
    query.limit = Some(2);

    let first = repo.fetch_collection(&query).unwrap();
    assert_eq!(ids(&first), vec!["u3", "u1"]);

    query.start_after = first.last().map(|last| EntityCursor::after(last, Some(&order)));
    let second = repo.fetch_collection(&query).unwrap();
    assert_eq!(ids(&second), vec!["u2", "u4"]);

    query.start_after = second.last().map(|last| EntityCursor::after(last, Some(&order)));
    assert!(repo.fetch_collection(&query).unwrap().is_empty());
}

#[test]
fn cursor_pages_across_missing_order_values() {
    let conn = open_db_in_memory().unwrap();
    let notifier = CountingNotifier::default();
    let repo = setup(&conn, &notifier);

    let order = OrderBy::asc("primaryRole");
    let mut query = FetchCollectionQuery::new("users");
    query.order_by = Some(order.clone());
    query.limit = Some(1);

    let mut seen = Vec::new();
    loop {
        let page = repo.fetch_collection(&query).unwrap();
        let Some(last) = page.last() else { break };
        seen.push(last.id.clone());
        query.start_after = Some(EntityCursor::after(last, Some(&order)));
    }
    assert_eq!(seen, vec!["u2", "u1", "u4", "u3"]);
}

#[test]
fn unordered_cursor_continues_by_id() {
    let conn = open_db_in_memory().unwrap();
    let notifier = CountingNotifier::default();
    let repo = setup(&conn, &notifier);

    let mut query = FetchCollectionQuery::new("users");
    query.limit = Some(3);
    let first = repo.fetch_collection(&query).unwrap();
    query.start_after = first.last().map(|last| EntityCursor::after(last, None));
    assert_eq!(ids(&repo.fetch_collection(&query).unwrap()), vec!["u4"]);
}

#[test]
fn search_takes_precedence_over_filters() {
    let conn = open_db_in_memory().unwrap();
    let notifier = CountingNotifier::default();
    let repo = setup(&conn, &notifier);

    let mut query = FetchCollectionQuery::new("users");
    query.search_string = Some("ann".to_string());
    query.filters = vec![FieldFilter::new("age", FilterOp::Eq, 999)];
    let mut found = ids(&repo.fetch_collection(&query).unwrap())
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    found.sort();
    assert_eq!(found, vec!["u1", "u3"]);

    query.search_string = Some("park".to_string());
    query.limit = Some(1);
    assert_eq!(ids(&repo.fetch_collection(&query).unwrap()), vec!["u4"]);
}

#[test]
fn search_reflects_updates_and_deletes() {
    let conn = open_db_in_memory().unwrap();
    let notifier = CountingNotifier::default();
    let repo = setup(&conn, &notifier);

    let mut values = EntityValues::new();
    values.insert("name".to_string(), Value::from("Renamed Person"));
    repo.save_entity(&SaveEntityRequest::existing("users", "u4", values))
        .unwrap();
    repo.delete_entity("users", "u1", None).unwrap();

    let mut query = FetchCollectionQuery::new("users");
    query.search_string = Some("park".to_string());
    assert!(repo.fetch_collection(&query).unwrap().is_empty());
    query.search_string = Some("renamed".to_string());
    assert_eq!(ids(&repo.fetch_collection(&query).unwrap()), vec!["u4"]);
    query.search_string = Some("lee".to_string());
    assert!(repo.fetch_collection(&query).unwrap().is_empty());
}

#[test]
fn search_on_disabled_collection_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let notifier = CountingNotifier::default();
    let repo = setup(&conn, &notifier);

    let mut query = FetchCollectionQuery::new("logs");
    query.search_string = Some("anything".to_string());
    assert!(matches!(
        repo.fetch_collection(&query),
        Err(RepoError::InvalidQuery(_))
    ));
}

#[test]
fn aliased_path_reads_the_same_storage_target() {
    let conn = open_db_in_memory().unwrap();
    let notifier = CountingNotifier::default();
    let repo = setup(&conn, &notifier);

    let people = repo
        .fetch_collection(&FetchCollectionQuery::new("people"))
        .unwrap();
    assert_eq!(people.len(), 4);
    assert!(repo.fetch_entity("people", "u2", None).unwrap().is_some());
}

#[test]
fn invalid_field_names_are_rejected() {
    let conn = open_db_in_memory().unwrap();
    let notifier = CountingNotifier::default();
    let repo = setup(&conn, &notifier);

    let mut query = FetchCollectionQuery::new("users");
    query.order_by = Some(OrderBy::asc("name') --"));
    assert!(matches!(
        repo.fetch_collection(&query),
        Err(RepoError::InvalidQuery(_))
    ));
}
