//! The process heap terminates when an OS primitive fails.
//!
//! The failing call ends the process, so the test runs itself again in a
//! child process and inspects how that child died.
#![cfg(unix)]

use std::{env, process::Command};

use brkalloc::global;

const CHILD: &str = "BRKALLOC_FATAL_CHILD";

#[test]
fn failed_mapping_exits_with_os_error() {
    if env::var_os(CHILD).is_some() {
        // Far more address space than any process can map.
        unsafe { global::allocate(usize::MAX / 2) };
        unreachable!("the process heap returned from a failed mapping");
    }

    let output = Command::new(env::current_exe().unwrap())
        .args(["failed_mapping_exits_with_os_error", "--exact", "--test-threads=1", "--nocapture"])
        .env(CHILD, "1")
        .output()
        .unwrap();

    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(Some(libc::ENOMEM), output.status.code(), "stderr: {stderr}");
    assert!(stderr.contains("(src/global.rs, "), "stderr: {stderr}");
    assert!(stderr.contains("mmap failed"), "stderr: {stderr}");
}
