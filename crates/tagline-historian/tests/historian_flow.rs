use std::sync::Arc;
use std::thread;
use tagline_core::{AudienceKind, ManualClock, Mutation, TagGroups, TagGroupsMutation};
use tagline_historian::{RecordStore, Registrar, StoredRegistrar, TagGroupHistorian, RECORDS_KEY};
use tagline_storage::{ConfigStore, MemoryConfigStore, SqliteConfigStore};
use tempfile::NamedTempFile;

struct Harness {
    store: Arc<dyn ConfigStore>,
    clock: Arc<ManualClock>,
    registrar: Arc<StoredRegistrar<TagGroupsMutation>>,
    historian: Arc<TagGroupHistorian<TagGroupsMutation>>,
}

fn harness(store: Arc<dyn ConfigStore>, clock: ManualClock) -> Harness {
    let clock = Arc::new(clock);
    let registrar = Arc::new(StoredRegistrar::<TagGroupsMutation>::new(store.clone()));
    let historian = Arc::new(TagGroupHistorian::<TagGroupsMutation>::new(
        registrar.clone(),
        store.clone(),
        clock.clone(),
    ));
    historian.init();
    Harness {
        store,
        clock,
        registrar,
        historian,
    }
}

fn stored_records(store: &Arc<dyn ConfigStore>) -> Vec<(i64, serde_json::Value)> {
    RecordStore::new(store.clone(), RECORDS_KEY)
        .load::<TagGroupsMutation>()
        .expect("load records")
        .into_iter()
        .map(|record| (record.time(), record.mutation().to_json()))
        .collect()
}

fn upload(h: &Harness, kind: AudienceKind, mutation: &TagGroupsMutation) {
    h.registrar.enqueue(kind, mutation).expect("enqueue");
    h.registrar.confirm_upload(kind).expect("confirm upload");
}

fn effective(historian: &TagGroupHistorian<TagGroupsMutation>, since_ms: i64) -> TagGroups {
    let mut tags = TagGroups::new();
    historian
        .apply_local_data(&mut tags, since_ms)
        .expect("apply local data");
    tags
}

#[test]
fn concurrent_appends_lose_nothing_and_stay_ordered() {
    const WRITERS: usize = 64;

    let file = NamedTempFile::new().expect("temp db");
    let store: Arc<dyn ConfigStore> =
        Arc::new(SqliteConfigStore::open(file.path()).expect("open db"));
    let h = harness(store, ManualClock::with_step(1_000, 1));
    for writer in 0..WRITERS {
        h.registrar
            .enqueue(
                AudienceKind::Channel,
                &TagGroupsMutation::add_tags("load", [format!("tag-{writer}")]),
            )
            .expect("enqueue");
    }

    thread::scope(|scope| {
        for _ in 0..WRITERS {
            let registrar = &h.registrar;
            scope.spawn(move || {
                registrar
                    .confirm_upload(AudienceKind::Channel)
                    .expect("confirm upload")
                    .expect("pending mutation");
            });
        }
        for _ in 0..4 {
            let historian = &h.historian;
            scope.spawn(move || {
                let mut tags = TagGroups::new();
                historian
                    .apply_local_data(&mut tags, 0)
                    .expect("concurrent read");
            });
        }
    });

    assert!(h
        .registrar
        .pending_mutations(AudienceKind::Channel)
        .expect("pending")
        .is_empty());
    let records = stored_records(&h.store);
    assert_eq!(records.len(), WRITERS);
    assert!(records.windows(2).all(|pair| pair[0].0 < pair[1].0));

    let tags = effective(&h.historian, 0);
    assert_eq!(tags.get("load").map(|set| set.len()), Some(WRITERS));
}

#[test]
fn upload_confirmation_moves_mutation_from_pending_to_history() {
    let h = harness(Arc::new(MemoryConfigStore::new()), ManualClock::new(500));
    let mutation = TagGroupsMutation::add_tags("music", ["rock"]);

    h.registrar
        .enqueue(AudienceKind::Channel, &mutation)
        .expect("enqueue");
    assert!(effective(&h.historian, 0)["music"].contains("rock"));
    assert!(stored_records(&h.store).is_empty());

    h.registrar
        .confirm_upload(AudienceKind::Channel)
        .expect("confirm upload");

    assert!(h
        .registrar
        .pending_mutations(AudienceKind::Channel)
        .expect("pending")
        .is_empty());
    assert_eq!(stored_records(&h.store), vec![(500, mutation.to_json())]);
    assert!(effective(&h.historian, 0)["music"].contains("rock"));
}

#[test]
fn repeated_init_subscribes_once() {
    let h = harness(Arc::new(MemoryConfigStore::new()), ManualClock::new(1));
    h.historian.init();
    h.historian.init();

    h.registrar
        .enqueue(
            AudienceKind::NamedUser,
            &TagGroupsMutation::add_tags("g", ["a"]),
        )
        .expect("enqueue");
    h.registrar
        .confirm_upload(AudienceKind::NamedUser)
        .expect("confirm upload");

    assert_eq!(stored_records(&h.store).len(), 1);
}

#[test]
fn dropped_historian_ignores_later_uploads() {
    let h = harness(Arc::new(MemoryConfigStore::new()), ManualClock::new(1));
    let Harness {
        store,
        registrar,
        historian,
        ..
    } = h;
    drop(historian);

    registrar
        .enqueue(AudienceKind::Channel, &TagGroupsMutation::add_tags("g", ["a"]))
        .expect("enqueue");
    let uploaded = registrar
        .confirm_upload(AudienceKind::Channel)
        .expect("confirm upload");

    assert!(uploaded.is_some());
    assert!(stored_records(&store).is_empty());
}

#[test]
fn history_survives_reopening_the_store() {
    let file = NamedTempFile::new().expect("temp db");
    {
        let store: Arc<dyn ConfigStore> =
            Arc::new(SqliteConfigStore::open(file.path()).expect("open db"));
        let h = harness(store, ManualClock::new(2_000));
        upload(
            &h,
            AudienceKind::Channel,
            &TagGroupsMutation::set_tags("news", ["local"]),
        );
        h.registrar
            .enqueue(
                AudienceKind::NamedUser,
                &TagGroupsMutation::add_tags("news", ["world"]),
            )
            .expect("enqueue");
    }

    let store: Arc<dyn ConfigStore> =
        Arc::new(SqliteConfigStore::open(file.path()).expect("reopen db"));
    let h = harness(store, ManualClock::new(3_000));
    let tags = effective(&h.historian, 0);

    assert_eq!(
        tags["news"].iter().cloned().collect::<Vec<_>>(),
        vec!["local".to_string(), "world".to_string()]
    );
}

#[test]
fn server_snapshot_only_replays_newer_history() {
    let h = harness(Arc::new(MemoryConfigStore::new()), ManualClock::new(0));

    h.clock.set(100);
    upload(
        &h,
        AudienceKind::NamedUser,
        &TagGroupsMutation::add_tags("g", ["before-snapshot"]),
    );
    h.clock.set(300);
    upload(
        &h,
        AudienceKind::Channel,
        &TagGroupsMutation::remove_tags("g", ["server"]),
    );

    let mut tags = TagGroups::new();
    tags.insert("g".to_string(), ["server".to_string()].into());
    h.historian
        .apply_local_data(&mut tags, 200)
        .expect("apply local data");

    assert!(tags["g"].is_empty());
}
