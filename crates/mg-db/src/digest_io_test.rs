use super::*;
use crate::traits::{ExitResult, OnLine};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// In-memory stand-in for a psql-backed fleet: stores constant functions per
/// endpoint and answers the catalog queries the digest I/O layer issues.
struct FakeFleet {
    fns: Mutex<HashMap<(String, String), String>>,
    schemas: Vec<String>,
    unreachable: HashSet<String>,
}

impl FakeFleet {
    fn new(schemas: &[&str]) -> Self {
        Self {
            fns: Mutex::new(HashMap::new()),
            schemas: schemas.iter().map(|s| s.to_string()).collect(),
            unreachable: HashSet::new(),
        }
    }

    fn key(dest: &Dest, sql: &str) -> (String, String) {
        let name = if sql.contains(DIGEST_FN) {
            DIGEST_FN
        } else {
            FINGERPRINT_FN
        };
        (dest.host.clone(), name.to_string())
    }
}

#[async_trait]
impl SqlRunner for FakeFleet {
    async fn run_script(&self, _: &Dest, _: &str, _: OnLine<'_>) -> DbResult<ExitResult> {
        Ok(ExitResult::default())
    }

    async fn run_query(&self, dest: &Dest, sql: &str) -> DbResult<Vec<Vec<String>>> {
        if self.unreachable.contains(&dest.host) {
            return Err(DbError::QueryFailed {
                target: dest.to_string(),
                stderr: "could not connect to server: Connection refused".to_string(),
            });
        }

        if sql.contains("pg_catalog.pg_namespace") && !sql.contains("pg_proc") {
            return Ok(self.schemas.iter().map(|s| vec![s.clone()]).collect());
        }

        if sql.contains("pg_catalog.pg_proc") {
            let exists = self.fns.lock().unwrap().contains_key(&Self::key(dest, sql));
            return Ok(if exists { vec![vec!["1".to_string()]] } else { vec![] });
        }

        if let Some(rest) = sql.strip_prefix("CREATE OR REPLACE FUNCTION ") {
            let value = rest
                .split_once("$mig$SELECT '")
                .map(|(_, v)| v.trim_end_matches("'::text$mig$"))
                .unwrap_or_default()
                .replace("''", "'");
            self.fns
                .lock()
                .unwrap()
                .insert(Self::key(dest, sql), value);
            return Ok(vec![]);
        }

        if sql.starts_with("SELECT \"") {
            let value = self
                .fns
                .lock()
                .unwrap()
                .get(&Self::key(dest, sql))
                .cloned()
                .unwrap_or_default();
            return Ok(vec![vec![value]]);
        }

        panic!("unexpected query: {sql}");
    }
}

fn dests(hosts: &[&str]) -> Vec<Dest> {
    hosts
        .iter()
        .map(|h| Dest::new(h, 5432, "postgres", "", "fleet"))
        .collect()
}

fn runner(fleet: FakeFleet) -> Arc<dyn SqlRunner> {
    Arc::new(fleet)
}

#[tokio::test]
async fn test_digest_round_trip() {
    let runner = runner(FakeFleet::new(&["public", "sh0001"]));
    let dests = dests(&["db1", "db2"]);

    // Absent functions read as "no digest yet" without failing.
    assert!(load_digests(&runner, &dests).await.unwrap().is_empty());

    save_digests(&runner, &dests, "2.deadbeef").await;
    let digests = load_digests(&runner, &dests).await.unwrap();
    assert_eq!(digests, vec!["2.deadbeef", "2.deadbeef"]);
}

#[tokio::test]
async fn test_load_digests_tolerates_partial_blackout() {
    let mut fleet = FakeFleet::new(&["public"]);
    fleet.unreachable.insert("db2".to_string());
    let runner = runner(fleet);
    let dests = dests(&["db1", "db2"]);

    save_digests(&runner, &dests, "1.abcd").await;
    let digests = load_digests(&runner, &dests).await.unwrap();
    assert_eq!(digests, vec!["1.abcd"]);
}

#[tokio::test]
async fn test_load_digests_full_blackout_is_fatal() {
    let mut fleet = FakeFleet::new(&["public"]);
    fleet.unreachable.insert("db1".to_string());
    let runner = runner(fleet);
    let dests = dests(&["db1"]);

    let err = load_digests(&runner, &dests).await.unwrap_err();
    assert!(matches!(err, DbError::DigestBlackout));
}

#[tokio::test]
async fn test_fingerprint_lifecycle() {
    let runner = runner(FakeFleet::new(&["public", "sh0001"]));
    let dests = dests(&["db1"]);
    let deps = ["before body", "after body"];

    // Nothing stored yet: hooks must run.
    assert!(!check_rerun_fingerprints(&runner, &dests, &deps).await);

    save_rerun_fingerprints(&runner, &dests, &deps, FingerprintWrite::UpToDate)
        .await
        .unwrap();
    assert!(check_rerun_fingerprints(&runner, &dests, &deps).await);

    // A changed hook body invalidates the stored fingerprint.
    assert!(!check_rerun_fingerprints(&runner, &dests, &["changed", "after body"]).await);

    save_rerun_fingerprints(&runner, &dests, &deps, FingerprintWrite::Reset)
        .await
        .unwrap();
    assert!(!check_rerun_fingerprints(&runner, &dests, &deps).await);
}
