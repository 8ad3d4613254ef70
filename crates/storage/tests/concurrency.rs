//! Concurrent writers sharing one backend.

use std::sync::Arc;
use std::time::Duration;

use rekey_core::{ManagedSecret, Resource, SystemClock};
use rekey_storage::{
    BlobStore, Datastore, FileBlobStore, LeasePolicy, MemoryBlobStore, RandomJitter,
};

fn quick_policy() -> LeasePolicy {
    LeasePolicy {
        backoff_min: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        max_wait: Duration::from_secs(20),
        ..LeasePolicy::default()
    }
}

fn datastore(store: Arc<dyn BlobStore>) -> Datastore {
    Datastore::new(
        store,
        quick_policy(),
        Arc::new(SystemClock),
        Arc::new(RandomJitter),
    )
}

async fn create_many(ds: Datastore, count: usize) {
    let mut handles = Vec::new();
    for i in 0..count {
        let ds = ds.clone();
        handles.push(tokio::spawn(async move {
            ds.resources
                .create(Resource::new(format!("r{i}"), "t", ""))
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_are_not_lost_in_memory() {
    let ds = datastore(Arc::new(MemoryBlobStore::new()));
    create_many(ds.clone(), 24).await;
    assert_eq!(ds.resources.list().await.unwrap().len(), 24);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_are_not_lost_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let ds = datastore(Arc::new(FileBlobStore::new(dir.path())));
    create_many(ds.clone(), 16).await;
    assert_eq!(ds.resources.list().await.unwrap().len(), 16);
    assert!(!dir.path().join("resources.lease").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_disk_races_never_lose_a_write() {
    let dir = tempfile::tempdir().unwrap();
    let ds = datastore(Arc::new(FileBlobStore::new(dir.path())));
    for round in 1..=10 {
        create_many(ds.clone(), 12).await;
        assert_eq!(ds.resources.list().await.unwrap().len(), round * 12);
    }
    assert!(!dir.path().join("resources.lease").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn separate_instances_share_one_directory() {
    let dir = tempfile::tempdir().unwrap();
    let a = datastore(Arc::new(FileBlobStore::new(dir.path())));
    let b = datastore(Arc::new(FileBlobStore::new(dir.path())));

    let left = tokio::spawn(create_many(a.clone(), 8));
    let right = tokio::spawn(create_many(b.clone(), 8));
    left.await.unwrap();
    right.await.unwrap();

    assert_eq!(a.resources.list().await.unwrap().len(), 16);
    assert_eq!(b.resources.list().await.unwrap().len(), 16);
}

#[tokio::test]
async fn records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let secret = ManagedSecret::new("sql-admin", Duration::from_secs(86_400));
    {
        let ds = datastore(Arc::new(FileBlobStore::new(dir.path())));
        ds.secrets.create(secret.clone()).await.unwrap();
    }
    let ds = datastore(Arc::new(FileBlobStore::new(dir.path())));
    assert_eq!(ds.secrets.get(secret.id).await.unwrap(), secret);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_update_with_serializes_increments() {
    let ds = datastore(Arc::new(MemoryBlobStore::new()));
    let secret = ManagedSecret::new("counter", Duration::from_secs(60));
    ds.secrets.create(secret.clone()).await.unwrap();
    let id = secret.id;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let ds = ds.clone();
        handles.push(tokio::spawn(async move {
            ds.secrets
                .update_with(id, |s| {
                    let n: u32 = s.description.parse().unwrap_or(0);
                    s.description = (n + 1).to_string();
                    Ok(())
                })
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(ds.secrets.get(secret.id).await.unwrap().description, "20");
}
