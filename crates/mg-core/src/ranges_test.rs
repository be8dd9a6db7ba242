use super::*;

fn collapse(items: &[&str]) -> Vec<String> {
    collapse_ranges(&items.iter().map(|s| s.to_string()).collect::<Vec<_>>())
}

#[test]
fn test_collapses_consecutive_runs_per_host() {
    assert_eq!(
        collapse(&[
            "host:sh0001",
            "host:sh0002",
            "host:sh0003",
            "host:sh0008",
            "host:sh0009",
            "other:01",
            "other:02",
            "other:03",
        ]),
        vec!["host:sh0001-0003,0008-0009", "other:01-03"]
    );
}

#[test]
fn test_non_consecutive_stay_listed() {
    assert_eq!(collapse(&["host:sh0001", "host:sh0003"]), vec!["host:sh0001,0003"]);
}

#[test]
fn test_singletons_and_plain_names() {
    assert_eq!(collapse(&["host:sh0001"]), vec!["host:sh0001"]);
    assert_eq!(
        collapse(&["host:public", "host:sh0001"]),
        vec!["host:public", "host:sh0001"]
    );
}

#[test]
fn test_unsorted_input_is_folded_numerically() {
    assert_eq!(
        collapse(&["host:sh0002", "host:sh0001", "host:sh0003"]),
        vec!["host:sh0001-0003"]
    );
}

#[test]
fn test_empty_input() {
    assert!(collapse(&[]).is_empty());
}
