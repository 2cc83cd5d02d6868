#![allow(dead_code)]

//! Shared harness: boots sites on ephemeral ports over temporary data
//! directories so tests run isolated and in parallel.

use std::future::Future;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use bibliored::actors;
use bibliored::config::{
    CcMode, ConsumerConfig, CoordinatorConfig, LoanActorConfig, StorageConfig,
};
use bibliored::coordinator::{self, Coordinator};
use bibliored::domain::{Book, BookCode, OpKind, RequestId, SiteId, UserId, dates};
use bibliored::storage::StorageSite;
use bibliored::transport::ReqRepClient;
use bibliored::wire::{CcReply, ClientRequest};

/// Storage site configuration on ephemeral ports. Replication inbound is
/// wired explicitly by tests that need a peer.
pub fn storage_config(dir: &TempDir, node: SiteId) -> StorageConfig {
    StorageConfig {
        data_dir: dir.path().to_path_buf(),
        node_id: node,
        rep_bind: "127.0.0.1:0".to_string(),
        repl_pub_bind: "127.0.0.1:0".to_string(),
        repl_sub_connect: String::new(),
        health_rep_bind: "127.0.0.1:0".to_string(),
        heartbeat_pub_bind: "127.0.0.1:0".to_string(),
        heartbeat_interval: Duration::from_millis(200),
        snapshot_interval_ops: 0,
        retain_last_n: 1000,
        loan_duration_days: 14,
        max_renewals: 2,
    }
}

/// A full single site: storage, the three actors, and the coordinator.
pub struct TestSite {
    pub site: StorageSite,
    pub coordinator: Coordinator,
    pub shutdown: CancellationToken,
    _data_dir: TempDir,
}

impl Drop for TestSite {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Boot a complete site and wait until the async actors are attached to
/// the coordinator's topics.
pub async fn start_full_site(mode: CcMode, workers: usize) -> TestSite {
    let dir = TempDir::new().unwrap();
    let shutdown = CancellationToken::new();

    let site = StorageSite::start(&storage_config(&dir, SiteId::A), shutdown.clone())
        .await
        .unwrap();

    let loan_addr = actors::loan::start(
        &LoanActorConfig {
            rep_bind: "127.0.0.1:0".to_string(),
            sm_connect: site.rep_addr.to_string(),
        },
        shutdown.clone(),
    )
    .await
    .unwrap();

    let coordinator = coordinator::start(
        &CoordinatorConfig {
            client_bind: "127.0.0.1:0".to_string(),
            pub_bind: "127.0.0.1:0".to_string(),
            loan_connect: loan_addr.to_string(),
            mode,
            workers,
            renew_duration_days: 7,
        },
        shutdown.clone(),
    )
    .await
    .unwrap();

    let consumer_config = ConsumerConfig {
        pub_connect: coordinator.pub_addr.to_string(),
        sm_connect: site.rep_addr.to_string(),
    };
    tokio::spawn(actors::run_renew_actor(
        consumer_config.clone(),
        shutdown.clone(),
    ));
    tokio::spawn(actors::run_return_actor(consumer_config, shutdown.clone()));

    let attached = eventually(|| {
        let count = coordinator.subscriber_count();
        async move { count >= 2 }
    })
    .await;
    assert!(attached, "async actors did not attach to the topics");

    TestSite {
        site,
        coordinator,
        shutdown,
        _data_dir: dir,
    }
}

/// Boot two storage sites replicating into each other.
pub async fn start_storage_pair(
    shutdown: &CancellationToken,
) -> (TempDir, TempDir, StorageSite, StorageSite) {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    let site_a = StorageSite::start(&storage_config(&dir_a, SiteId::A), shutdown.clone())
        .await
        .unwrap();
    let site_b = StorageSite::start(&storage_config(&dir_b, SiteId::B), shutdown.clone())
        .await
        .unwrap();

    assert!(
        site_a
            .connect_peer(&site_b.repl_pub_addr.to_string(), shutdown.clone())
            .await
    );
    assert!(
        site_b
            .connect_peer(&site_a.repl_pub_addr.to_string(), shutdown.clone())
            .await
    );

    let linked = eventually(|| {
        let ready = site_a.replicator.peer_count() >= 1 && site_b.replicator.peer_count() >= 1;
        async move { ready }
    })
    .await;
    assert!(linked, "replication links did not come up");

    (dir_a, dir_b, site_a, site_b)
}

pub async fn seed_book(site: &StorageSite, code: &str, title: &str) {
    site.storage
        .add_book(Book {
            code: BookCode::from(code),
            title: title.to_string(),
            available: true,
        })
        .await
        .unwrap();
}

pub fn client_request(op: OpKind, id: &str, user: &str, code: &str) -> ClientRequest {
    ClientRequest {
        id: RequestId::from(id),
        site_id: SiteId::A,
        user_id: UserId::from(user),
        op,
        libro_codigo: BookCode::from(code),
        timestamp: dates::now_ms(),
    }
}

pub async fn connect_client(site: &TestSite) -> ReqRepClient {
    ReqRepClient::connect(&site.coordinator.client_addr.to_string())
        .await
        .unwrap()
}

pub async fn send(client: &mut ReqRepClient, request: &ClientRequest) -> CcReply {
    client.request(request).await.unwrap()
}

/// Poll a condition for up to five seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
