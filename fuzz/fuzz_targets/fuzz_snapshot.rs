//! Fuzz target for snapshot encoding and digests.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary JSON
//! - The digest survives a save/load round trip
//! - The undo stack never affects the digest

#![no_main]

use fortress_turns::snapshot::digest;
use fortress_turns::GameState;
use libfuzzer_sys::fuzz_target;
use serde_json::json;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(state) = GameState::from_json(text) else {
        return;
    };
    let Ok(before) = digest(&state) else {
        return;
    };

    let saved = state.to_json().expect("loaded states save");
    let loaded = GameState::from_json(&saved).expect("saved states load");
    assert_eq!(digest(&loaded).ok(), Some(before));

    let mut with_undo = state;
    with_undo.set("undo", json!([{ "noise": data.len() }]));
    assert_eq!(digest(&with_undo).ok(), Some(before));
});
