//! Property-based tests for identifier generation and store invariants.

use proptest::prelude::*;
use serde_json::json;

use crate::harness::{make_host_record, make_request, make_workload};
use crate::ident;
use crate::store::{MemoryRelay, RelayStore};
use crate::types::{HostPatch, HostStatus, RequestStatus, Workload};

fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// Identifier shape: every generated value stays inside its charset and
// length contract, for any draw of the RNG.
#[test]
fn prop_identifier_shapes() {
    for _ in 0..200 {
        let code = ident::generate_session_code();
        assert_eq!(code.len(), ident::CODE_LEN);
        assert!(code.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));

        let otp = ident::generate_otp();
        assert_eq!(otp.len(), ident::OTP_LEN);
        assert!(otp.bytes().all(|b| b.is_ascii_digit()));

        let credential = ident::generate_credential();
        assert_eq!(credential.len(), 64);
        assert!(credential.bytes().all(|b| b.is_ascii_hexdigit()));

        let host = ident::generate_host_id();
        assert!(host.strip_prefix("host-").is_some_and(|h| h.len() == 16));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // Client ids keep their three-part shape for any prefix without a
    // dash in it.
    #[test]
    fn prop_client_id_shape(prefix in "[a-z]{1,12}") {
        let id = ident::generate_client_id(&prefix);
        let parts: Vec<&str> = id.splitn(3, '-').collect();
        prop_assert_eq!(parts.len(), 3);
        prop_assert_eq!(parts[0], prefix.as_str());
        prop_assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        prop_assert_eq!(parts[2].len(), 6);
        prop_assert!(parts[2].chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    // Terminal-write convergence: for any order of complete/fail
    // writes against one request, exactly the first one applies and
    // every later reader observes its outcome.
    #[test]
    fn prop_first_terminal_write_wins(writes in prop::collection::vec(any::<bool>(), 1..12)) {
        let rt = rt();
        rt.block_on(async {
            let store = MemoryRelay::new();
            store
                .insert_request(make_request("req-1", "host-1", 100))
                .await
                .unwrap();

            let mut applied_count = 0;
            for (i, complete) in writes.iter().enumerate() {
                let applied = if *complete {
                    store
                        .complete_request("req-1", json!({"writer": i}))
                        .await
                        .unwrap()
                } else {
                    store.fail_request("req-1", &format!("writer {i}")).await.unwrap()
                };
                if applied {
                    applied_count += 1;
                }

                // After any write the request is terminal and frozen in
                // the first writer's outcome.
                let request = store.get_request("req-1").await.unwrap().unwrap();
                prop_assert!(request.is_terminal());
                if writes[0] {
                    prop_assert_eq!(request.status, RequestStatus::Completed);
                    prop_assert_eq!(request.response.as_ref().unwrap(), &json!({"writer": 0}));
                    prop_assert!(request.error.is_none());
                } else {
                    prop_assert_eq!(request.status, RequestStatus::Failed);
                    prop_assert_eq!(request.error.as_deref(), Some("writer 0"));
                    prop_assert!(request.response.is_none());
                }
            }
            prop_assert_eq!(applied_count, 1);
            Ok(())
        })?;
    }
}

fn workload_strategy() -> impl Strategy<Value = Vec<Workload>> {
    prop::collection::vec(("/srv/[a-z]{1,8}", 1024u16..9999), 0..4)
        .prop_map(|ws| ws.into_iter().map(|(path, port)| make_workload(&path, port)).collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // Heartbeat partial update: after any sequence of heartbeats with
    // and without workload lists, the stored list is the last one
    // supplied (or the announced list if none ever was), and the
    // record is online.
    #[test]
    fn prop_heartbeat_partial_update(
        announced in workload_strategy(),
        beats in prop::collection::vec(prop::option::of(workload_strategy()), 1..8),
    ) {
        let rt = rt();
        rt.block_on(async {
            let store = MemoryRelay::new();
            let mut record = make_host_record("host-1", 1);
            record.active_workloads = announced.clone();
            store.put_host(record).await.unwrap();

            let mut expected = announced;
            for (i, beat) in beats.iter().enumerate() {
                let patch = HostPatch {
                    status: Some(HostStatus::Online),
                    active_workloads: beat.clone(),
                    last_seen: Some(10 + i as u64),
                };
                prop_assert!(store.patch_host("host-1", patch).await.unwrap());
                if let Some(list) = beat {
                    expected = list.clone();
                }
            }

            let host = store.get_host("host-1").await.unwrap().unwrap();
            prop_assert_eq!(host.status, HostStatus::Online);
            prop_assert_eq!(host.last_seen, 10 + beats.len() as u64 - 1);
            prop_assert_eq!(host.active_workloads.len(), expected.len());
            for (stored, wanted) in host.active_workloads.iter().zip(expected.iter()) {
                prop_assert_eq!(&stored.path, &wanted.path);
                prop_assert_eq!(stored.port, wanted.port);
            }
            Ok(())
        })?;
    }
}
