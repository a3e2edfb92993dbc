mod common;

use ndi::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

fn secret_store(orchestrator: &Arc<MemoryOrchestrator>, prefix: &str) -> VersionedStore {
    VersionedStore::new(orchestrator.clone(), StoreKind::Secret, prefix)
}

#[tokio::test]
async fn next_version_is_fresh_and_strictly_greater() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    let store = secret_store(&orchestrator, "ndi.svc.a.key.");

    // Arbitrary write sequence, including gaps and out-of-order versions.
    for version in [0u64, 5, 2] {
        orchestrator
            .create_secret(&store.name_at(version), b"pem", HashMap::new())
            .await
            .unwrap();
    }

    let (latest_version, _) = store.latest_version().await.unwrap().unwrap();
    assert_eq!(latest_version, 5);

    let next = store.next_version().await.unwrap();
    assert_eq!(next, 6);
    assert!(next > latest_version);

    // The slot at the next version is unoccupied.
    let fresh = store.name_at(next);
    assert!(orchestrator.get_secret(&fresh).await.unwrap().is_none());

    // Writing there keeps the ordering strict.
    orchestrator
        .create_secret(&fresh, b"pem", HashMap::new())
        .await
        .unwrap();
    assert_eq!(store.next_version().await.unwrap(), 7);
}

#[tokio::test]
async fn latest_cert_pair_is_max_of_version_intersection() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    let names = Namespace::default();
    let id = common::seed_ingress_service(&orchestrator, "app", "app.example.com", false).await;

    // keys at {0, 1, 3}, certs at {0, 1, 2}: the usable maximum is 1.
    for version in [0u64, 1, 3] {
        orchestrator
            .create_secret(
                &format!("{}{}", names.svc_key_prefix(&id), version),
                b"key",
                HashMap::new(),
            )
            .await
            .unwrap();
    }
    for version in [0u64, 1, 2] {
        orchestrator
            .create_secret(
                &format!("{}{}", names.svc_crt_prefix(&id), version),
                b"crt",
                HashMap::new(),
            )
            .await
            .unwrap();
    }

    let info = orchestrator.get_service("app").await.unwrap().unwrap();
    let view = ServiceView::new(orchestrator.clone(), info, names);
    assert_eq!(view.latest_cert_version().await.unwrap(), Some(1));
}

#[tokio::test]
async fn undefined_pair_when_no_common_version() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    let names = Namespace::default();
    let id = common::seed_ingress_service(&orchestrator, "app", "app.example.com", false).await;

    orchestrator
        .create_secret(
            &format!("{}0", names.svc_key_prefix(&id)),
            b"key",
            HashMap::new(),
        )
        .await
        .unwrap();

    let info = orchestrator.get_service("app").await.unwrap().unwrap();
    let view = ServiceView::new(orchestrator.clone(), info, names);
    assert!(view.latest_cert_pair().await.unwrap().is_none());
}

#[tokio::test]
async fn write_secret_replaces_existing_entry() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());

    orchestrator
        .write_secret("ndi.conf.h", b"old", HashMap::new())
        .await
        .unwrap();
    orchestrator
        .write_secret("ndi.conf.h", b"new", HashMap::new())
        .await
        .unwrap();

    let entries = orchestrator.list_secrets(Some("ndi.conf.h")).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].data, b"new");

    // The journal shows the delete happened before the second create.
    let journal = orchestrator.journal();
    let journal = journal.lock().unwrap();
    let delete = journal
        .iter()
        .position(|op| op == "delete_secret ndi.conf.h")
        .unwrap();
    let second_create = journal
        .iter()
        .rposition(|op| op == "create_secret ndi.conf.h")
        .unwrap();
    assert!(delete < second_create);
}
