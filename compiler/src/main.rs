//! 辞書キャッシュセットを構築するユーティリティ
//!
//! このバイナリは、フラットファイル辞書のソースを取り込み、
//! トークン化済みテキスト・行ストア・転置インデックスの3つの
//! キャッシュファイルを無条件に構築し直します。

use std::error::Error;
use std::path::PathBuf;

use jibiki::dictionary::global_cache_dir_for;
use jibiki::{Dictionary, DictionaryKind, FoldingMorphology, Progress};

use clap::Parser;

/// コマンドライン引数
#[derive(Parser, Debug)]
#[clap(name = "compile", about = "Builds dictionary cache sets", version)]
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
}

/// メイン関数
///
/// ソース辞書を取り込み、キャッシュセットを構築して統計を出力します。
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

    eprintln!(
        "Compiling {} into {}...",
        args.source.display(),
        cache_dir.display()
    );

    let progress = Progress::new();
    let morphology = FoldingMorphology::new();
    let dictionary = Dictionary::install(
        args.kind,
        &args.name,
        &args.source,
        &cache_dir,
        &morphology,
        &progress,
    )?;

    eprintln!(
        "Compiled {} lines ({} bytes of source text).",
        dictionary.store().len(),
        dictionary.buffer().len(),
    );
    eprintln!("Checksum: {}", dictionary.buffer().checksum());

    Ok(())
}
