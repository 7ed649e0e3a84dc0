//! Fuzz target: config-endpoint writes through `LinkCallbacks::on_write`
//!
//! The input is split into writes by a leading length byte. Whatever the
//! peer sends, the callback context must not panic, the upload progress
//! must stay within its declared total, and a disconnect must leave
//! nothing behind.
//!
//! cargo fuzz run fuzz_reassembler

#![no_main]

use std::sync::Arc;

use datalogger::app::commands::Endpoint;
use datalogger::transfer::{LinkCallbacks, SharedLink, WriteOutcome};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let callbacks = LinkCallbacks::new(Arc::new(SharedLink::new(64)));
    callbacks.on_connect(1);

    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let len = (len as usize * 3).min(tail.len());
        let (write, next) = tail.split_at(len);
        rest = next;

        if let WriteOutcome::Assembling { received, total } =
            callbacks.on_write(Endpoint::Config, 1, write)
        {
            assert!(received < total && total <= 64);
        }
        if let Some((received, total)) = callbacks.shared().with_upload(|r| r.progress()) {
            assert!(received < total);
        }
    }

    callbacks.on_disconnect();
    assert!(!callbacks.shared().with_upload(|r| r.is_active()));
    assert!(!callbacks.shared().has_command());
});
