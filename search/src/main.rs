//! 辞書検索を実行するユーティリティ
//!
//! このバイナリは、辞書を読み込み、標準入力から読み込んだクエリを
//! コンパイルして検索し、一致した行を標準出力に出力します。

use std::error::Error;
use std::io::{BufRead, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use jibiki::dictionary::global_cache_dir_for;
use jibiki::{
    Dictionary, DictionaryKind, FoldingMorphology, Progress, QueryCompiler, SearchEngine,
    SearchFlags,
};

use clap::Parser;

/// コマンドライン引数
#[derive(Parser, Debug)]
#[clap(name = "search", about = "Searches a dictionary", version)]
struct Args {
    /// Dictionary kind. Choices are edict, kanjidic, examples, and radicals.
    #[clap(short = 'k', long)]
    kind: DictionaryKind,

    /// Dictionary name, used as the cache path component.
    #[clap(short = 'n', long)]
    name: String,

    /// Source dictionary file (optionally zstd-compressed).
    #[clap(short = 'i', long)]
    source: PathBuf,

    /// Cache directory. Defaults to the user cache directory.
    #[clap(short = 'c', long)]
    cache_dir: Option<PathBuf>,

    /// Evaluates queries by linear scan instead of the inverted index.
    #[clap(short = 'S', long)]
    no_index: bool,

    /// Maximum number of results printed per query.
    #[clap(short = 'l', long)]
    limit: Option<usize>,
}

/// メイン関数
///
/// 辞書を読み込み、標準入力の各行をクエリとしてコンパイル・実行して、
/// 一致した行を出力します。クエリのコンパイルエラーは報告され、
/// 次のクエリの処理は継続されます。
///
/// # 戻り値
///
/// 実行が成功した場合は`Ok(())`、エラーが発生した場合はエラー情報
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let cache_dir = match args.cache_dir {
        Some(dir) => dir.join(args.kind.name()).join(&args.name),
        None => global_cache_dir_for(args.kind, &args.name)?,
    };

    eprintln!("Loading the dictionary...");
    let morphology = FoldingMorphology::new();
    let dictionary = Arc::new(Dictionary::open_with_cache_dir(
        args.kind,
        &args.name,
        &args.source,
        cache_dir,
        &morphology,
        &Progress::new(),
    )?);
    let compiler = QueryCompiler::new(dictionary.kind(), &morphology);
    let flags = SearchFlags {
        use_index: !args.no_index,
        ..SearchFlags::default()
    };

    eprintln!("Ready to search");

    let is_tty = atty::is(atty::Stream::Stdout);

    let out = std::io::stdout();
    let mut out = BufWriter::new(out.lock());
    let lines = std::io::stdin().lock().lines();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let query = match compiler.compile(&line) {
            Ok(query) => query,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        let mut search =
            SearchEngine::start(Arc::clone(&dictionary), query, flags, Progress::new())?;
        search.wait();

        let mut count = 0;
        for offset in search.result_iter() {
            if args.limit.is_some_and(|limit| count >= limit) {
                break;
            }
            if let Some(text) = dictionary.format_line(offset) {
                out.write_all(text.as_bytes())?;
                out.write_all(b"\n")?;
                count += 1;
            }
        }
        writeln!(&mut out, "{} results", count)?;
        if is_tty {
            out.flush()?;
        }
    }

    Ok(())
}
