use super::*;

#[test]
fn test_parse_all_directives() {
    let body = "-- $delay=250\n\
                -- $parallelism_global=3\n\
                --  $parallelism_per_host = 1\n\
                -- $run_alone=1\n\
                CREATE TABLE t(id bigint);\n";
    let vars = MigrationVars::parse("x.sql", body).unwrap();
    assert_eq!(vars.delay_ms, 250);
    assert_eq!(vars.parallelism_global, Some(3));
    assert_eq!(vars.parallelism_per_host, Some(1));
    assert!(vars.run_alone);
}

#[test]
fn test_parse_defaults() {
    let vars = MigrationVars::parse("x.sql", "SELECT 1;").unwrap();
    assert_eq!(vars, MigrationVars::default());
    assert_eq!(vars.delay_ms, 0);
    assert_eq!(vars.parallelism_global, None);
    assert!(!vars.run_alone);
}

#[test]
fn test_run_alone_zero_is_false() {
    let vars = MigrationVars::parse("x.sql", "-- $run_alone=0\nSELECT 1;").unwrap();
    assert!(!vars.run_alone);
}

#[test]
fn test_unknown_directive_is_fatal() {
    let err = MigrationVars::parse("x.sql", "-- $paralelism_global=3\n").unwrap_err();
    match err {
        CoreError::UnknownDirective { name, .. } => assert_eq!(name, "$paralelism_global"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_bad_value_is_fatal() {
    let err = MigrationVars::parse("x.sql", "-- $delay=soon\n").unwrap_err();
    match err {
        CoreError::BadDirectiveValue { name, value, .. } => {
            assert_eq!(name, "$delay");
            assert_eq!(value, "soon");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_directive_must_start_the_line() {
    // An indented directive-looking comment is plain SQL commentary.
    let vars = MigrationVars::parse("x.sql", "  -- $delay=250\nSELECT 1;").unwrap();
    assert_eq!(vars.delay_ms, 0);
}

#[test]
fn test_any_concurrency_limit() {
    assert!(!MigrationVars::default().any_concurrency_limit());
    let vars = MigrationVars::parse("x.sql", "-- $parallelism_per_host=2\n").unwrap();
    assert!(vars.any_concurrency_limit());
    let vars = MigrationVars::parse("x.sql", "-- $run_alone=1\n").unwrap();
    assert!(vars.any_concurrency_limit());
}
