//! Tests for `src/logging.rs`.

use telehook::logging::{self, LoggingGuard};

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_production_creates_logs_dir() {
    let tmp = match tempfile::tempdir() {
        Ok(tmp) => tmp,
        Err(err) => panic!("should create temp dir: {err}"),
    };
    let logs_dir = tmp.path().join("nested").join("logs");
    assert!(!logs_dir.exists());

    // Only one global subscriber per process; the directory is created
    // before installation is attempted.
    let _guard = logging::init_production(&logs_dir);
    assert!(logs_dir.exists(), "logs directory should be created");
}

#[test]
fn init_cli_is_idempotent() {
    logging::init_cli();
    logging::init_cli();
}
