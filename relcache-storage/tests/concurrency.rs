//! Many tasks hammering shared caches on a multi-threaded runtime.

use std::collections::HashSet;
use std::sync::Arc;

use relcache_core::{CredentialKey, DeviceId, GroupId, MemberId, Role};
use relcache_storage::{InMemoryRoleCache, RelationCaches, RoleCache};

const TASKS: usize = 16;
const ROUNDS: usize = 200;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_role_writers_keep_index_consistent() {
    let cache = Arc::new(InMemoryRoleCache::new());
    let member = MemberId::from("user-shared");

    let mut handles = Vec::new();
    for task in 0..TASKS {
        let cache = cache.clone();
        let member = member.clone();
        handles.push(tokio::spawn(async move {
            let group = GroupId::new(format!("grp-{}", task));
            for round in 0..ROUNDS {
                let role = if round % 2 == 0 { "viewer" } else { "editor" };
                cache
                    .save(&group, &member, &Role::from(role))
                    .await
                    .expect("save");
                if round % 3 == 0 {
                    cache.remove(&group, &member).await.expect("remove");
                }
            }
            // Leave odd tasks assigned, even tasks removed.
            if task % 2 == 0 {
                cache.remove(&group, &member).await.expect("final remove");
            } else {
                cache
                    .save(&group, &member, &Role::from("admin"))
                    .await
                    .expect("final save");
            }
        }));
    }
    for handle in handles {
        handle.await.expect("task panicked");
    }

    let expected: HashSet<GroupId> = (0..TASKS)
        .filter(|t| t % 2 == 1)
        .map(|t| GroupId::new(format!("grp-{}", t)))
        .collect();
    assert_eq!(cache.memberships_of(&member).await.expect("scan"), expected);
    assert_eq!(cache.len(), expected.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_and_writers_on_separate_caches() {
    let caches = RelationCaches::in_memory();
    let device = DeviceId::from("dev-1");
    caches
        .device_groups
        .save(&device, &GroupId::from("grp-9"))
        .await
        .expect("seed");

    let writer = {
        let caches = caches.clone();
        tokio::spawn(async move {
            for i in 0..ROUNDS {
                let key = CredentialKey::new(format!("key-{}", i));
                let device = DeviceId::new(format!("dev-{}", i % 8));
                caches.credentials.save(&key, &device).await.expect("save");
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..TASKS {
        let caches = caches.clone();
        let device = device.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..ROUNDS {
                let group = caches.device_groups.resolve(&device).await.expect("hit");
                assert_eq!(group, GroupId::from("grp-9"));
            }
        }));
    }

    writer.await.expect("writer panicked");
    for reader in readers {
        reader.await.expect("reader panicked");
    }

    assert_eq!(caches.credentials.stats().entry_count, ROUNDS as u64);
    assert_eq!(
        caches.device_groups.stats().hits,
        (TASKS * ROUNDS) as u64
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_credential_remove_leaves_no_orphans() {
    let caches = RelationCaches::in_memory();
    let device = DeviceId::from("dev-7");

    let mut handles = Vec::new();
    for task in 0..TASKS {
        let caches = caches.clone();
        let device = device.clone();
        handles.push(tokio::spawn(async move {
            for round in 0..ROUNDS / 4 {
                let key = CredentialKey::new(format!("key-{}-{}", task, round));
                caches.credentials.save(&key, &device).await.expect("save");
            }
        }));
    }
    for handle in handles {
        handle.await.expect("task panicked");
    }

    caches.credentials.remove(&device).await.expect("remove");
    assert_eq!(caches.credentials.stats().entry_count, 0);
    assert!(caches
        .credentials
        .resolve(&CredentialKey::from("key-0-0"))
        .await
        .expect_err("revoked")
        .is_not_found());
}
