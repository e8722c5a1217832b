#![allow(dead_code)]

pub mod crashing_store;
pub mod orders;

use std::thread;
use std::time::{Duration, Instant};

/// Poll `done` until it returns true or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}
