#![no_main]

use libfuzzer_sys::fuzz_target;
use movechain::{GameMeta, HashKind, MoveBlob};

fuzz_target!(|data: &[u8]| {
    if data.len() >= 64 {
        let buf: &[u8; 64] = data[..64].try_into().expect("sliced to blob length");
        if let Ok(blob) = MoveBlob::decode(buf) {
            let _ = blob.content_hash(HashKind::Xxh64);
            let _ = blob.is_opening_anchor();
            let _ = blob.is_game_end();
            for mv in &blob.moves {
                let _ = mv.unpack();
                let _ = mv.to_string();
            }
            // Round-tripping a decodable blob must not change its hash.
            let reencoded = MoveBlob::decode(&blob.encode()).expect("reencode");
            assert_eq!(
                reencoded.content_hash(HashKind::Xxh64),
                blob.content_hash(HashKind::Xxh64)
            );
        }
    }

    if let Ok(meta) = GameMeta::decode(data) {
        let _ = meta.content_hash(HashKind::Xxh64);
        for record in &meta.records {
            let _ = record.move_index;
        }
        let reencoded = GameMeta::decode(&meta.encode()).expect("reencode");
        assert_eq!(reencoded, meta);
    }
});
