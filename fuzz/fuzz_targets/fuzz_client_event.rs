//! Fuzz target for client event deserialization.
//!
//! This target tests that arbitrary bytes cannot crash the socket event
//! parser. Malformed or malicious payloads must come back as `Err`.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary input
//! - Accepted events re-serialize and parse back to themselves

#![no_main]

use fortress_turns::ClientEvent;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(event) = serde_json::from_slice::<ClientEvent>(data) {
        let text = serde_json::to_string(&event).expect("accepted events serialize");
        let back: ClientEvent = serde_json::from_str(&text).expect("serialized events parse");
        assert_eq!(back, event);
    }
});
