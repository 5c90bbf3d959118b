#![no_main]

use libfuzzer_sys::fuzz_target;
use transform_sync_client::protocol::ServerMessage;

fuzz_target!(|data: &[u8]| {
    // Decoding must never panic, whatever the server sends.
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(message) = ServerMessage::decode(text) {
            let _ = format!("{message:?}");
        }
    }
});
