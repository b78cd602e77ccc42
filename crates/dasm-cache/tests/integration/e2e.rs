use std::time::Duration;

use dasm_cache::{CacheConfig, Params, StyleFlags};
use dasm_services::{ContentHash, DbgiKey, DebugInfo, HashStore, LineEntry, SourceFile, Unit};

use crate::{test_cache, NOP_NOP_RET};

const TIMEOUT: Duration = Duration::from_secs(5);

fn params(style_flags: StyleFlags) -> Params {
    Params {
        vaddr: 0x1000,
        style_flags,
        ..Default::default()
    }
}

#[test]
fn test_zero_hash_is_always_empty() {
    let t = test_cache(CacheConfig::default());
    let mut scope = t.cache.open_scope();
    let info = t
        .cache
        .info_from_hash_params(&mut scope, ContentHash::ZERO, &params(StyleFlags::empty()));
    assert!(info.is_empty());
    assert_eq!(t.cache.stats().live_nodes, 0);
}

#[test]
fn test_miss_then_hit_with_addresses() {
    let t = test_cache(CacheConfig::default());
    let hash = t.submit_code("module", NOP_NOP_RET);
    let params = params(StyleFlags::ADDRESSES);

    let mut scope = t.cache.open_scope();
    let first = t.cache.info_from_hash_params(&mut scope, hash, &params);
    assert!(first.is_empty());
    scope.close();

    let info = t.wait_for_info(hash, &params, TIMEOUT);
    assert_eq!(info.insts.len(), 3);
    assert_eq!(
        t.listing_text(&info),
        "  0000000000001000  nop\n  0000000000001001  nop\n  0000000000001002  ret"
    );
}

#[test]
fn test_unstyled_listing_text() {
    let t = test_cache(CacheConfig::default());
    let hash = t.submit_code("module", NOP_NOP_RET);
    let params = params(StyleFlags::empty());

    let mut scope = t.cache.open_scope();
    t.cache.info_from_hash_params(&mut scope, hash, &params);
    scope.close();

    let info = t.wait_for_info(hash, &params, TIMEOUT);
    assert_eq!(t.listing_text(&info), "nop\nnop\nret");
}

#[test]
fn test_repeated_lookups_are_idempotent() {
    let t = test_cache(CacheConfig::default());
    let hash = t.submit_code("module", NOP_NOP_RET);
    let params = params(StyleFlags::ADDRESSES);

    let mut scope = t.cache.open_scope();
    t.cache.info_from_hash_params(&mut scope, hash, &params);
    scope.close();
    let first = t.wait_for_info(hash, &params, TIMEOUT);

    let mut scope = t.cache.open_scope();
    let second = t.cache.info_from_hash_params(&mut scope, hash, &params);
    let third = t.cache.info_from_hash_params(&mut scope, hash, &params);
    scope.close();

    assert_eq!(second.text_key, first.text_key);
    assert_eq!(third.text_key, first.text_key);
    assert_eq!(second.insts.as_slice(), first.insts.as_slice());
    assert_eq!(third.insts.as_slice(), first.insts.as_slice());
    assert_eq!(t.cache.stats().live_nodes, 1);
    assert_eq!(t.hash_store.submit_count(), 2); // the code blob, then one listing
}

#[test]
fn test_text_ranges_slice_the_submitted_blob() {
    let t = test_cache(CacheConfig::default());
    let hash = t.submit_code("module", NOP_NOP_RET);
    let params = params(StyleFlags::ADDRESSES | StyleFlags::CODE_BYTES);

    let mut scope = t.cache.open_scope();
    t.cache.info_from_hash_params(&mut scope, hash, &params);
    scope.close();
    let info = t.wait_for_info(hash, &params, TIMEOUT);

    let text = t.listing_text(&info);
    let lines: Vec<&str> = text.split('\n').collect();
    assert_eq!(lines.len(), info.insts.len());
    for (idx, inst) in info.insts.iter().enumerate() {
        let slice = &text[inst.text_range.start as usize..inst.text_range.end as usize];
        assert_eq!(slice, lines[idx]);
    }
}

#[test]
fn test_code_offsets_are_strictly_increasing() {
    let t = test_cache(CacheConfig::default());
    let hash = t.submit_code("module", NOP_NOP_RET);
    let params = params(StyleFlags::empty());

    let mut scope = t.cache.open_scope();
    t.cache.info_from_hash_params(&mut scope, hash, &params);
    scope.close();
    let info = t.wait_for_info(hash, &params, TIMEOUT);

    let offs: Vec<u64> = info.insts.iter().map(|inst| inst.code_off).collect();
    assert_eq!(offs, vec![0, 1, 2]);
}

#[test]
fn test_distinct_params_get_distinct_nodes() {
    let t = test_cache(CacheConfig::default());
    let hash = t.submit_code("module", NOP_NOP_RET);
    let plain = params(StyleFlags::empty());
    let addressed = params(StyleFlags::ADDRESSES);

    let mut scope = t.cache.open_scope();
    t.cache.info_from_hash_params(&mut scope, hash, &plain);
    t.cache.info_from_hash_params(&mut scope, hash, &addressed);
    scope.close();

    let a = t.wait_for_info(hash, &plain, TIMEOUT);
    let b = t.wait_for_info(hash, &addressed, TIMEOUT);
    assert_ne!(a.text_key, b.text_key);
    assert_eq!(t.cache.stats().live_nodes, 2);
}

#[test]
fn test_concurrent_lookups_decode_once() {
    let t = test_cache(CacheConfig::default());
    let hash = t.submit_code("module", NOP_NOP_RET);
    let params = params(StyleFlags::ADDRESSES);

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..50 {
                    let mut scope = t.cache.open_scope();
                    t.cache.info_from_hash_params(&mut scope, hash, &params);
                    scope.close();
                    std::thread::yield_now();
                }
            });
        }
    });

    t.wait_for_info(hash, &params, TIMEOUT);
    assert_eq!(t.cache.stats().live_nodes, 1);
    assert_eq!(t.hash_store.submit_count(), 2); // the code blob, then one listing
}

#[test]
fn test_key_lookup_reports_the_resolved_hash() {
    let t = test_cache(CacheConfig::default());
    let key = ContentHash::of(b"module");
    let hash = t.hash_store.submit_data(key, NOP_NOP_RET.to_vec());
    let params = params(StyleFlags::empty());

    let mut scope = t.cache.open_scope();
    let mut resolved = ContentHash::ZERO;
    let first = t
        .cache
        .info_from_key_params(&mut scope, key, &params, Some(&mut resolved));
    assert!(first.is_empty());
    assert!(resolved.is_zero());
    scope.close();

    t.wait_for_info(hash, &params, TIMEOUT);

    let mut scope = t.cache.open_scope();
    let info = t
        .cache
        .info_from_key_params(&mut scope, key, &params, Some(&mut resolved));
    scope.close();
    assert!(!info.is_empty());
    assert_eq!(resolved, hash);
}

#[test]
fn test_key_lookup_falls_back_one_revision() {
    let t = test_cache(CacheConfig::default());
    let key = ContentHash::of(b"module");
    let old_hash = t.hash_store.submit_data(key, NOP_NOP_RET.to_vec());
    let params = params(StyleFlags::empty());

    let mut scope = t.cache.open_scope();
    t.cache
        .info_from_key_params(&mut scope, key, &params, None);
    scope.close();
    t.wait_for_info(old_hash, &params, TIMEOUT);

    // A new revision lands; until its decode materializes, key lookups
    // keep serving the previous revision's listing.
    t.hash_store.submit_data(key, vec![0xC3]);
    let mut scope = t.cache.open_scope();
    let mut resolved = ContentHash::ZERO;
    let info = t
        .cache
        .info_from_key_params(&mut scope, key, &params, Some(&mut resolved));
    scope.close();
    assert!(!info.is_empty());
    assert_eq!(resolved, old_hash);
    assert_eq!(info.insts.len(), 3);
}

#[test]
fn test_missing_code_publishes_an_empty_listing() {
    let t = test_cache(CacheConfig::default());
    // a hash the store knows nothing about
    let hash = ContentHash::of(b"never submitted");
    let params = params(StyleFlags::empty());

    let mut scope = t.cache.open_scope();
    t.cache.info_from_hash_params(&mut scope, hash, &params);
    scope.close();

    // the worker still publishes: an intentionally empty listing
    t.wait_until(
        TIMEOUT,
        || t.hash_store.submit_count() >= 1,
        "empty listing submission",
    );
    let mut scope = t.cache.open_scope();
    let info = t.cache.info_from_hash_params(&mut scope, hash, &params);
    scope.close();
    assert!(info.is_empty());
    assert_eq!(t.cache.stats().live_nodes, 1);
}

#[test]
fn test_annotated_listing_interleaves_source_lines() {
    let t = test_cache(CacheConfig::default());
    let source = b"int main(void) {\n  return 0;\n}\n";
    let path = "/src/main.c";

    let text_key = ContentHash::of(path.as_bytes());
    let content_hash = t.hash_store.submit_data(text_key, source.to_vec());
    t.text.insert(
        text_key,
        content_hash,
        dasm_services::TextInfo::from_source(source),
    );
    t.watcher.set_file_modified(path, 1);

    let dbgi_key = DbgiKey::new(path, 0);
    t.debug_info.insert(
        dbgi_key.clone(),
        std::sync::Arc::new(DebugInfo::new(
            vec![Unit {
                voff_range: 0x1000..0x1010,
                lines: vec![
                    LineEntry {
                        voff_range: 0x1000..0x1002,
                        file_idx: 0,
                        line_num: 1,
                    },
                    LineEntry {
                        voff_range: 0x1002..0x1010,
                        file_idx: 0,
                        line_num: 2,
                    },
                ],
            }],
            vec![SourceFile { path: path.into() }],
            vec![],
        )),
    );

    let hash = t.submit_code("module", NOP_NOP_RET);
    let params = Params {
        vaddr: 0x1000,
        style_flags: StyleFlags::SOURCE_FILE_NAMES | StyleFlags::SOURCE_LINES,
        dbgi_key,
        ..Default::default()
    };

    let mut scope = t.cache.open_scope();
    t.cache.info_from_hash_params(&mut scope, hash, &params);
    scope.close();
    let info = t.wait_for_info(hash, &params, TIMEOUT);

    assert_eq!(
        t.listing_text(&info),
        "> /src/main.c\n> int main(void) {\nnop\nnop\n> return 0;\nret"
    );
    // pseudo-instructions carry zeroed records
    assert_eq!(info.insts.get(0).unwrap().code_off, 0);
    assert_eq!(info.insts.get(0).unwrap().text_range, 0..0);
}
