//! End-to-end synchronization tests against local AXFR and HTTP upstreams.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::dnssec::rdata::{DNSSECRData, DS, NSEC, RRSIG};
use hickory_proto::dnssec::{Algorithm, DigestType};
use hickory_proto::op::{Message, MessageType, OpCode};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use rootcache_sync::{
    BulkOptions, Manager, ManagerConfig, ManagerState, SyncError, TransferOptions,
};
use rootcache_zone::parse_records;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

const OLD_ZONE: &str = "\
. 86400 IN SOA a.root-servers.net. nstld.verisign-grs.com. 2024010100 1800 900 604800 86400
. 518400 IN NS a.root-servers.net.
a.root-servers.net. 518400 IN A 198.41.0.4
com. 172800 IN NS a.gtld-servers.net.
a.gtld-servers.net. 172800 IN A 192.5.6.30
";

const NEW_ZONE: &str = "\
. 86400 IN SOA a.root-servers.net. nstld.verisign-grs.com. 2024010200 1800 900 604800 86400
. 518400 IN NS a.root-servers.net.
a.root-servers.net. 518400 IN A 198.41.0.4
com. 172800 IN NS b.gtld-servers.net.
b.gtld-servers.net. 172800 IN A 192.33.14.30
b.gtld-servers.net. 172800 IN AAAA 2001:503:231d::2:30
org. 86400 IN NS a0.org.afilias-nst.info.
";

fn records(zone: &str) -> Vec<Record> {
    parse_records(zone).records
}

fn name(s: &str) -> Name {
    Name::from_ascii(s).unwrap()
}

fn rrsig(owner: &str, covered: RecordType, labels: u8) -> Record {
    Record::from_rdata(
        name(owner),
        86_400,
        RData::DNSSEC(DNSSECRData::RRSIG(RRSIG::new(
            covered,
            Algorithm::RSASHA256,
            labels,
            86_400,
            1_704_931_200,
            1_703_808_000,
            20_326,
            Name::root(),
            vec![0x5a; 64],
        ))),
    )
}

/// `zone` plus root and `com.` signatures, an NSEC chain link and a DS set.
fn signed(zone: &str) -> Vec<Record> {
    let mut records = records(zone);
    records.push(rrsig(".", RecordType::SOA, 0));
    records.push(rrsig(".", RecordType::NS, 0));
    records.push(Record::from_rdata(
        Name::root(),
        86_400,
        RData::DNSSEC(DNSSECRData::NSEC(NSEC::new(
            name("aaa."),
            [RecordType::NS, RecordType::SOA, RecordType::RRSIG, RecordType::NSEC],
        ))),
    ));
    records.push(Record::from_rdata(
        name("com."),
        86_400,
        RData::DNSSEC(DNSSECRData::DS(DS::new(
            19_718,
            Algorithm::ECDSAP256SHA256,
            DigestType::SHA256,
            vec![0x8a; 32],
        ))),
    ));
    records.push(rrsig("com.", RecordType::DS, 1));
    records
}

fn config(snapshot: &Path, method: &str, upstream: &str, fallbacks: &[String]) -> ManagerConfig {
    ManagerConfig {
        method: method.to_string(),
        upstream: Some(upstream.to_string()),
        snapshot_path: snapshot.to_path_buf(),
        refresh_interval: Duration::from_secs(30),
        transfer: TransferOptions {
            fallback_endpoints: fallbacks.to_vec(),
            connect_timeout: Duration::from_millis(500),
            io_timeout: Duration::from_secs(2),
            transfer_timeout: Duration::from_secs(10),
        },
        bulk: BulkOptions {
            fallback_urls: fallbacks.to_vec(),
            timeout: Duration::from_secs(2),
        },
    }
}

// ============================================================================
// Local AXFR upstream
// ============================================================================

struct Transfer {
    records: Vec<Record>,
    gate: Option<oneshot::Receiver<()>>,
}

impl Transfer {
    fn of(zone: &str) -> Self {
        Self {
            records: records(zone),
            gate: None,
        }
    }

    fn gated(zone: &str) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let transfer = Self {
            records: records(zone),
            gate: Some(rx),
        };
        (transfer, tx)
    }
}

/// Drops the first connection unanswered, then serves `zone` on every
/// later one. Returns the address and the number of connections seen.
async fn spawn_flaky_axfr(zone: &str) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let records = records(zone);
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                drop(stream);
                continue;
            }
            let query = read_frame(&mut stream).await;
            write_transfer(&mut stream, &query, records.clone()).await;
        }
    });

    (addr, attempts)
}

/// Serves one transfer per accepted connection, in order.
async fn spawn_axfr(transfers: Vec<Transfer>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        for transfer in transfers {
            let (mut stream, _) = listener.accept().await.unwrap();
            let query = read_frame(&mut stream).await;
            if let Some(gate) = transfer.gate {
                let _ = gate.await;
            }
            write_transfer(&mut stream, &query, transfer.records).await;
        }
    });

    addr
}

async fn read_frame(stream: &mut TcpStream) -> Message {
    let mut len = [0u8; 2];
    stream.read_exact(&mut len).await.unwrap();
    let mut buf = vec![0u8; usize::from(u16::from_be_bytes(len))];
    stream.read_exact(&mut buf).await.unwrap();
    Message::from_vec(&buf).unwrap()
}

// Splits the zone over two messages and closes it with the leading SOA.
async fn write_transfer(stream: &mut TcpStream, query: &Message, records: Vec<Record>) {
    let soa = records[0].clone();
    let mid = records.len() / 2;
    let mut second: Vec<Record> = records[mid..].to_vec();
    second.push(soa);
    let chunks = [records[..mid].to_vec(), second];

    for chunk in chunks {
        let mut response = Message::new();
        response
            .set_id(query.id())
            .set_message_type(MessageType::Response)
            .set_op_code(OpCode::Query)
            .set_authoritative(true);
        response.add_queries(query.queries().to_vec());
        response.add_answers(chunk);

        let wire = response.to_vec().unwrap();
        let mut frame = (wire.len() as u16).to_be_bytes().to_vec();
        frame.extend_from_slice(&wire);
        stream.write_all(&frame).await.unwrap();
    }
    stream.flush().await.unwrap();
}

// ============================================================================
// Local HTTP upstream
// ============================================================================

/// Answers every request with `status` and `body`, counting requests.
async fn spawn_http(status: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/root.zone", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);

            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }

            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    (url, hits)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_transfer_sync_installs_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("data").join("root.zone");
    let addr = spawn_axfr(vec![Transfer::of(NEW_ZONE)]).await;

    let manager = Manager::new(config(&snapshot, "axfr", &addr.to_string(), &[])).unwrap();
    let report = manager.sync().await.unwrap();

    // The closing SOA is not a second record.
    assert_eq!(report.records, 7);
    assert_eq!(report.delegations, 3);
    assert!(report.persisted);
    assert!(snapshot.exists());
    assert_eq!(manager.state(), ManagerState::Serving);

    let reply = manager.handle_query(
        &Name::from_ascii("www.example.com.").unwrap(),
        RecordType::A,
        false,
    );
    assert!(reply.response.answer.is_empty());
    assert_eq!(reply.response.authority.len(), 1);
    assert_eq!(reply.response.additional.len(), 2);
    assert!(!reply.response.authoritative);
}

#[tokio::test]
async fn test_transfer_falls_back_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("root.zone");
    let addr = spawn_axfr(vec![Transfer::of(OLD_ZONE)]).await;

    let manager = Manager::new(config(
        &snapshot,
        "transfer",
        "127.0.0.1:1",
        &[addr.to_string()],
    ))
    .unwrap();

    let report = manager.sync().await.unwrap();
    assert_eq!(report.records, 5);
}

#[tokio::test]
async fn test_all_endpoints_fail_then_restore_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("root.zone");

    // An earlier run left a snapshot behind.
    let addr = spawn_axfr(vec![Transfer::of(OLD_ZONE)]).await;
    let first = Manager::new(config(&snapshot, "transfer", &addr.to_string(), &[])).unwrap();
    first.sync().await.unwrap();

    let manager = Manager::new(config(
        &snapshot,
        "transfer",
        "127.0.0.1:1",
        &["127.0.0.1:2".to_string()],
    ))
    .unwrap();

    let err = manager.sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Synchronization { attempted: 2, .. }));
    assert!(manager.snapshot().is_none());

    manager.sync_from_file().await.unwrap();
    let reply = manager.handle_query(&Name::root(), RecordType::NS, false);
    assert!(reply.response.authoritative);
    assert_eq!(reply.response.answer.len(), 1);
    assert_eq!(reply.response.additional.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_see_whole_snapshots_during_sync() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("root.zone");

    let (gated, release) = Transfer::gated(NEW_ZONE);
    let addr = spawn_axfr(vec![Transfer::of(OLD_ZONE), gated]).await;
    let manager = Arc::new(
        Manager::new(config(&snapshot, "transfer", &addr.to_string(), &[])).unwrap(),
    );
    manager.sync().await.unwrap();

    let syncing = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.sync().await })
    };

    let qname = Name::from_ascii("www.example.com.").unwrap();

    // Upstream is stalled, yet readers are answered from the old snapshot.
    let stalled = tokio::time::timeout(Duration::from_secs(1), async {
        manager.handle_query(&qname, RecordType::A, false)
    })
    .await
    .unwrap();
    assert_eq!(stalled.response.additional.len(), 1);

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let qname = qname.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    let reply = manager.handle_query(&qname, RecordType::A, false);
                    let target = reply.response.authority[0].data().to_string();
                    let glue = reply.response.additional.len();
                    match target.as_str() {
                        "a.gtld-servers.net." => assert_eq!(glue, 1),
                        "b.gtld-servers.net." => assert_eq!(glue, 2),
                        other => panic!("unexpected NS target {other}"),
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    release.send(()).unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    let report = syncing.await.unwrap().unwrap();
    assert_eq!(report.records, 7);

    let reply = manager.handle_query(&qname, RecordType::A, false);
    assert_eq!(reply.response.additional.len(), 2);
}

#[tokio::test]
async fn test_bulk_download_stops_at_first_usable_url() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("root.zone");

    let (broken, broken_hits) = spawn_http("500 Internal Server Error", "").await;
    let (junk, junk_hits) = spawn_http("200 OK", "this is not a zone\n").await;
    let (good, good_hits) = spawn_http("200 OK", NEW_ZONE).await;
    let (spare, spare_hits) = spawn_http("200 OK", OLD_ZONE).await;

    let manager = Manager::new(config(
        &snapshot,
        "bulk-download",
        &broken,
        &[junk, good, spare],
    ))
    .unwrap();

    let report = manager.sync().await.unwrap();
    assert_eq!(report.records, 7);
    assert_eq!(broken_hits.load(Ordering::SeqCst), 1);
    assert_eq!(junk_hits.load(Ordering::SeqCst), 1);
    assert_eq!(good_hits.load(Ordering::SeqCst), 1);
    assert_eq!(spare_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_bulk_download_all_urls_unusable() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("root.zone");
    let (junk, _) = spawn_http("200 OK", "; nothing here\n").await;

    let manager = Manager::new(config(&snapshot, "http", &junk, &[])).unwrap();
    let err = manager.sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Synchronization { attempted: 1, .. }));
    assert!(!snapshot.exists());
}

#[tokio::test]
async fn test_signed_zone_survives_restart_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("root.zone");
    let addr = spawn_axfr(vec![Transfer {
        records: signed(NEW_ZONE),
        gate: None,
    }])
    .await;

    let first = Manager::new(config(&snapshot, "transfer", &addr.to_string(), &[])).unwrap();
    let report = first.sync().await.unwrap();
    assert!(report.persisted);
    assert_eq!(report.records, 12);

    let restarted = Manager::new(config(&snapshot, "transfer", "127.0.0.1:1", &[])).unwrap();
    let restored = restarted.sync_from_file().await.unwrap();
    assert_eq!(restored.records, report.records);

    let before = first.snapshot().unwrap();
    let after = restarted.snapshot().unwrap();
    assert_eq!(after.signatures(&Name::root()).len(), 2);
    assert_eq!(after.signatures(&Name::root()), before.signatures(&Name::root()));
    assert_eq!(after.signatures(&name("com.")), before.signatures(&name("com.")));
    for rtype in [RecordType::NSEC, RecordType::RRSIG] {
        assert_eq!(after.lookup(&Name::root(), rtype), before.lookup(&Name::root(), rtype));
    }
    assert_eq!(
        after.lookup(&name("com."), RecordType::DS),
        before.lookup(&name("com."), RecordType::DS)
    );

    let reply = restarted.handle_query(&Name::root(), RecordType::RRSIG, true);
    assert!(reply.response.authoritative);
    assert_eq!(reply.response.answer.len(), 2);
    assert!(reply
        .response
        .answer
        .iter()
        .all(|r| r.record_type() == RecordType::RRSIG));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_continues_after_failed_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("root.zone");
    let (addr, attempts) = spawn_flaky_axfr(NEW_ZONE).await;

    let manager = Arc::new(
        Manager::new(config(&snapshot, "transfer", &addr.to_string(), &[])).unwrap(),
    );
    let started = tokio::time::Instant::now();
    let refresh = manager.spawn_refresh();

    while manager.state() != ManagerState::Serving {
        assert!(
            started.elapsed() < Duration::from_secs(300),
            "refresh never installed a snapshot"
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    // The first tick fails, so the snapshot comes from a later one.
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert!(attempts.load(Ordering::SeqCst) >= 2);
    assert!(!refresh.is_finished());

    refresh.stop().await;
    assert!(snapshot.exists());
}
