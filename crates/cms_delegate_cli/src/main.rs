//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `cms_delegate_core` linkage with one save/fetch/delete cycle.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `cms_delegate_cli [config.json]`. Without a config the probe runs
//! against an in-memory store with a single `users` collection.

use cms_delegate_core::db::{open_db, open_db_in_memory};
use cms_delegate_core::{
    core_version, default_log_level, init_logging, CollectionDescriptor, DataSourceDelegate,
    DelegateConfig, EntityCounter, EntityValues, FetchCollectionQuery, SaveEntityRequest,
    SqliteEntityRepository, SubscriptionHub, SubscriptionScope, Value,
};
use log::info;
use std::error::Error;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const PROBE_COLLECTION: &str = "users";
const PROBE_ENTITY_ID: &str = "cli-probe";

fn main() -> ExitCode {
    match run(std::env::args().nth(1)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("cms_delegate_cli error={err}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: Option<String>) -> Result<(), Box<dyn Error>> {
    let config = match config_path {
        Some(path) => DelegateConfig::from_file(path)?,
        None => DelegateConfig::default(),
    };
    if let Some(log_dir) = config.log_dir.as_deref() {
        let level = config.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir)?;
    }

    let mut registry = config.collection_registry()?;
    if registry.get(PROBE_COLLECTION).is_none() {
        registry.register(CollectionDescriptor::new(PROBE_COLLECTION))?;
    }

    let conn = match config.database_path.as_deref() {
        Some(path) => open_db(path)?,
        None => open_db_in_memory()?,
    };

    let hub = Arc::new(SubscriptionHub::new());
    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    hub.subscribe(SubscriptionScope::collection(PROBE_COLLECTION), move |_event| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let repo = SqliteEntityRepository::try_new(&conn, registry, Arc::clone(&hub))?
        .with_options(config.repository_options());

    let mut values = EntityValues::new();
    values.insert("name".to_string(), Value::from("CLI Probe"));
    let saved = repo.save_entity(&SaveEntityRequest::existing(
        PROBE_COLLECTION,
        PROBE_ENTITY_ID,
        values,
    ))?;
    let listed = repo.fetch_collection(&FetchCollectionQuery::new(PROBE_COLLECTION))?;
    let found = repo
        .fetch_entity(PROBE_COLLECTION, &saved.id, None)?
        .is_some();
    repo.delete_entity(PROBE_COLLECTION, &saved.id, None)?;
    let remaining = repo.count_entities(PROBE_COLLECTION, None)?;

    info!(
        "event=cli_probe module=cli status=ok notifications={}",
        received.load(Ordering::SeqCst)
    );
    println!("cms_delegate_core version={}", core_version());
    println!("probe saved={} found={found}", saved.id);
    println!("probe listed={}", listed.len());
    println!("probe remaining={remaining}");
    println!("probe notifications={}", received.load(Ordering::SeqCst));
    Ok(())
}
