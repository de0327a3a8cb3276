//! 検索エンジンとキャッシュライフサイクルの結合テスト

use std::fs;
use std::io::Cursor;
use std::sync::Arc;

use crate::dictionary::Dictionary;
use crate::dictionary::kind::DictionaryKind;
use crate::morphology::FoldingMorphology;
use crate::progress::Progress;
use crate::query::QueryCompiler;
use crate::search::{ResultIterator, SearchEngine, SearchFlags, SearchStatus};

const EDICT_SAMPLE: &str = "\
食べる [たべる] /(v1) to eat/to live on/EntL1358280X/
飲む [のむ] /(v5m) to drink/EntL1169870X/
ノート /(n) notebook/EntL1092570X/
食事 [しょくじ] /(n) meal/to eat a meal/EntL1357890X/
";

fn edict_dictionary() -> Arc<Dictionary> {
    let morphology = FoldingMorphology::new();
    Arc::new(
        Dictionary::from_reader(
            DictionaryKind::Edict,
            "edict-test",
            Cursor::new(EDICT_SAMPLE),
            &morphology,
            &Progress::new(),
        )
        .unwrap(),
    )
}

fn run_query(dictionary: &Arc<Dictionary>, query: &str, flags: SearchFlags) -> Vec<u64> {
    let morphology = FoldingMorphology::new();
    let compiled = QueryCompiler::new(dictionary.kind(), &morphology)
        .compile(query)
        .unwrap();
    let mut search =
        SearchEngine::start(Arc::clone(dictionary), compiled, flags, Progress::new()).unwrap();
    search.wait();
    assert_eq!(search.status(), SearchStatus::Idle);
    search.result_iter().collect()
}

#[test]
fn test_index_and_scan_agree() {
    let dictionary = edict_dictionary();
    // 部分文字列一致が語境界をまたがないクエリでは、インデックス検索と
    // 線形スキャンは同じ行集合に到達する。
    for query in ["飲む", "reading:たべる", "to&&eat", "notebook||meal"] {
        let mut indexed = run_query(
            &dictionary,
            query,
            SearchFlags {
                use_index: true,
                ..SearchFlags::default()
            },
        );
        let mut scanned = run_query(
            &dictionary,
            query,
            SearchFlags {
                use_index: false,
                ..SearchFlags::default()
            },
        );
        indexed.sort_unstable();
        scanned.sort_unstable();
        assert_eq!(indexed, scanned, "query {query:?} diverged");
    }
}

#[test]
fn test_and_intersects() {
    let dictionary = edict_dictionary();
    // 「to eat」と「to live on」の両方を持つのは1行だけ。
    let offsets = run_query(&dictionary, "eat&&live", SearchFlags::default());
    assert_eq!(offsets.len(), 1);
    assert!(dictionary
        .format_line(offsets[0])
        .unwrap()
        .contains("to live on"));
}

#[test]
fn test_or_unions() {
    let dictionary = edict_dictionary();
    let offsets = run_query(&dictionary, "notebook||drink", SearchFlags::default());
    assert_eq!(offsets.len(), 2);
}

#[test]
fn test_keyed_leaf_restricts_column() {
    let dictionary = edict_dictionary();
    // 「食事」の語義にも「eat」が現れるが、reading指定では一致しない。
    let anonymous = run_query(&dictionary, "eat", SearchFlags::default());
    assert_eq!(anonymous.len(), 2);
    let keyed = run_query(&dictionary, "reading:たべる", SearchFlags::default());
    assert_eq!(keyed.len(), 1);
}

#[test]
fn test_dedup_across_tables() {
    let dictionary = edict_dictionary();
    // 「ノート」は表層テーブルに、「のーと」への正規化形は正規化テーブルに
    // 同じ行を登録するが、イテレータは1回しか返さない。
    let offsets = run_query(&dictionary, "ノート", SearchFlags::default());
    assert_eq!(offsets.len(), 1);
}

#[test]
fn test_result_iterator_determinism() {
    let dictionary = edict_dictionary();
    let morphology = FoldingMorphology::new();
    let compiled = QueryCompiler::new(dictionary.kind(), &morphology)
        .compile("to")
        .unwrap();
    let mut search = SearchEngine::start(
        Arc::clone(&dictionary),
        compiled,
        SearchFlags::default(),
        Progress::new(),
    )
    .unwrap();
    search.wait();

    let first: Vec<u64> = search.result_iter().collect();
    let second: Vec<u64> = search.result_iter().collect();
    assert_eq!(first, second);
    assert!(!first.is_empty());

    // 各テーブル内は昇順で、同じオフセットは一度しか現れない。
    let mut sorted = first.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), first.len());

    let iter = search.result_iter();
    assert_eq!(ResultIterator::count(&iter), first.len());
    assert!(!iter.empty());
}

#[test]
fn test_cancellation_stops_within_one_chunk() {
    let mut text = String::new();
    for i in 0..5000 {
        text.push_str(&format!("見出し{i} [よみ{i}] /(n) entry {i}/EntL{i}X/\n"));
    }
    let morphology = FoldingMorphology::new();
    let dictionary = Arc::new(
        Dictionary::from_reader(
            DictionaryKind::Edict,
            "edict-large",
            Cursor::new(text),
            &morphology,
            &Progress::new(),
        )
        .unwrap(),
    );

    let compiled = QueryCompiler::new(dictionary.kind(), &morphology)
        .compile("entry")
        .unwrap();
    let progress = Progress::new();
    // キャンセル済みの状態で開始すると、最初のチャンク境界で停止する。
    progress.cancel();
    let mut search = SearchEngine::start(
        Arc::clone(&dictionary),
        compiled,
        SearchFlags {
            use_index: false,
            chunk_size: 100,
        },
        progress,
    )
    .unwrap();
    search.wait();

    assert_eq!(search.status(), SearchStatus::Idle);
    let emitted: Vec<u64> = search.result_iter().collect();
    // 最初のチャンクの分までしか結果は増えない。
    assert!(emitted.len() <= 100, "emitted {} results", emitted.len());

    // キャンセル後に観測される結果は変化しない。
    let again: Vec<u64> = search.result_iter().collect();
    assert_eq!(emitted, again);
}

#[test]
fn test_canceled_index_search_emits_nothing() {
    let dictionary = edict_dictionary();
    let morphology = FoldingMorphology::new();
    let compiled = QueryCompiler::new(dictionary.kind(), &morphology)
        .compile("to")
        .unwrap();
    let progress = Progress::new();
    progress.cancel();
    let mut search = SearchEngine::start(
        Arc::clone(&dictionary),
        compiled,
        SearchFlags::default(),
        progress,
    )
    .unwrap();
    search.wait();

    assert_eq!(search.status(), SearchStatus::Idle);
    assert!(search.result_iter().empty());
}

#[test]
fn test_query_kind_mismatch_is_rejected() {
    let dictionary = edict_dictionary();
    let morphology = FoldingMorphology::new();
    let compiled = QueryCompiler::new(DictionaryKind::Kanjidic, &morphology)
        .compile("亜")
        .unwrap();
    assert!(SearchEngine::start(
        Arc::clone(&dictionary),
        compiled,
        SearchFlags::default(),
        Progress::new(),
    )
    .is_err());
}

#[test]
fn test_cache_set_lifecycle() {
    let source_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let source_path = source_dir.path().join("edict.txt");
    fs::write(&source_path, EDICT_SAMPLE).unwrap();

    let morphology = FoldingMorphology::new();
    let progress = Progress::new();

    let built = Dictionary::open_with_cache_dir(
        DictionaryKind::Edict,
        "edict-test",
        &source_path,
        cache_dir.path(),
        &morphology,
        &progress,
    )
    .unwrap();
    for cache in ["text.cache", "lines.cache", "index.cache"] {
        assert!(cache_dir.path().join(cache).is_file(), "{cache} missing");
    }

    // 2回目はキャッシュセットから読み込まれ、同じ結果を返す。
    let reopened = Dictionary::open_with_cache_dir(
        DictionaryKind::Edict,
        "edict-test",
        &source_path,
        cache_dir.path(),
        &morphology,
        &progress,
    )
    .unwrap();
    assert_eq!(reopened.store().len(), built.store().len());
    assert_eq!(reopened.buffer().checksum(), built.buffer().checksum());

    let dictionary = Arc::new(reopened);
    let offsets = run_query(&dictionary, "reading:たべる", SearchFlags::default());
    assert_eq!(offsets.len(), 1);
}

#[test]
fn test_corrupt_cache_triggers_silent_rebuild() {
    let source_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let source_path = source_dir.path().join("edict.txt");
    fs::write(&source_path, EDICT_SAMPLE).unwrap();

    let morphology = FoldingMorphology::new();
    let progress = Progress::new();

    let open = || {
        Dictionary::open_with_cache_dir(
            DictionaryKind::Edict,
            "edict-test",
            &source_path,
            cache_dir.path(),
            &morphology,
            &progress,
        )
    };
    let built = open().unwrap();

    // 行キャッシュの破壊は再構築を引き起こすだけで、エラーにはならない。
    let lines_cache = cache_dir.path().join("lines.cache");
    let mut corrupted = fs::read(&lines_cache).unwrap();
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xA5;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&lines_cache, fs::Permissions::from_mode(0o644)).unwrap();
    }
    fs::write(&lines_cache, &corrupted).unwrap();

    let reopened = open().unwrap();
    assert_eq!(reopened.store().len(), built.store().len());
}

#[test]
fn test_source_change_invalidates_caches() {
    let source_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let source_path = source_dir.path().join("edict.txt");
    fs::write(&source_path, EDICT_SAMPLE).unwrap();

    let morphology = FoldingMorphology::new();
    let progress = Progress::new();

    let open = || {
        Dictionary::open_with_cache_dir(
            DictionaryKind::Edict,
            "edict-test",
            &source_path,
            cache_dir.path(),
            &morphology,
            &progress,
        )
    };
    let built = open().unwrap();

    fs::write(
        &source_path,
        format!("{EDICT_SAMPLE}新語 [しんご] /(n) neologism/EntL9000000X/\n"),
    )
    .unwrap();
    let reopened = open().unwrap();
    assert_eq!(reopened.store().len(), built.store().len() + 1);

    let dictionary = Arc::new(reopened);
    let offsets = run_query(&dictionary, "neologism", SearchFlags::default());
    assert_eq!(offsets.len(), 1);
}

#[test]
fn test_kanjidic_search() {
    let morphology = FoldingMorphology::new();
    let dictionary = Arc::new(
        Dictionary::from_reader(
            DictionaryKind::Kanjidic,
            "kanjidic-test",
            Cursor::new("亜 3021 U4e9c B7 G8 S7 F1509 ア つ.ぐ {Asia} {rank next}\n唖 3022 U555e B3 S10 ア おし {mute} {dumb}\n"),
            &morphology,
            &Progress::new(),
        )
        .unwrap(),
    );

    let offsets = run_query(&dictionary, "on:ア", SearchFlags::default());
    assert_eq!(offsets.len(), 2);
    let offsets = run_query(&dictionary, "meaning:Asia", SearchFlags::default());
    assert_eq!(offsets.len(), 1);
}

#[test]
fn test_radicals_search() {
    let morphology = FoldingMorphology::new();
    let dictionary = Arc::new(
        Dictionary::from_reader(
            DictionaryKind::Radicals,
            "radicals-test",
            Cursor::new("亜 : ｜ 一 口\n唖 : ｜ 一 口 个\n"),
            &morphology,
            &Progress::new(),
        )
        .unwrap(),
    );

    let offsets = run_query(&dictionary, "radicals:个", SearchFlags::default());
    assert_eq!(offsets.len(), 1);
    let offsets = run_query(&dictionary, "radicals:口", SearchFlags::default());
    assert_eq!(offsets.len(), 2);
}

#[test]
fn test_examples_search() {
    let morphology = FoldingMorphology::new();
    let dictionary = Arc::new(
        Dictionary::from_reader(
            DictionaryKind::Examples,
            "examples-test",
            Cursor::new("A: 彼は学生です。\tHe is a student.#ID=300_1001\nB: 彼 は 学生 です\n"),
            &morphology,
            &Progress::new(),
        )
        .unwrap(),
    );

    let offsets = run_query(&dictionary, "meaning:student", SearchFlags::default());
    assert_eq!(offsets.len(), 1);
}
