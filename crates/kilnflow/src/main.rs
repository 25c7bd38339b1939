mod commands;
mod docker;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use kilnflow_config::{BuildConfig, ConfigParams, InstallMode};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "レイヤー構成のコンテナイメージを並列にビルド・公開する", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// イメージをビルド（必要ならプッシュ）
    Build(BuildArgs),
    /// ビルド対象のイメージを依存順に表示
    List {
        /// 対象イメージ名の正規表現（祖先イメージも含まれる）
        patterns: Vec<String>,
        /// イメージ定義ファイル
        #[arg(long, env = "KILN_TARGETS_PATH")]
        targets: Option<PathBuf>,
    },
    /// ビルドエンジン用の設定ファイルを表示
    Render {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// コンテナストレージの使用量を表示
    Df {
        /// このネームスペースのイメージのみ表示
        #[arg(long, env = "KILN_NAMESPACE")]
        namespace: Option<String>,
    },
    /// バージョン情報を表示
    Version,
}

/// ビルド設定パラメータ
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// ベースディストリビューション
    #[arg(long, env = "KILN_BASE", default_value = "centos")]
    pub base: String,
    /// インストール方式 (source / binary)
    #[arg(long, env = "KILN_INSTALL_MODE", default_value = "binary")]
    pub install_mode: InstallMode,
    /// レジストリのネームスペース
    #[arg(long, env = "KILN_NAMESPACE", default_value = "kiln")]
    pub namespace: String,
    /// イメージタグ
    #[arg(long, env = "KILN_TAG", default_value = "latest")]
    pub tag: String,
    /// 同時に実行するビルド数
    #[arg(long, env = "KILN_THREADS", default_value_t = 8)]
    pub threads: usize,
    /// 同時に実行するプッシュ数
    #[arg(long, env = "KILN_PUSH_THREADS", default_value_t = 4)]
    pub push_threads: usize,
    /// イメージのメンテナー
    #[arg(long, env = "KILN_MAINTAINER", default_value = "Kilnflow Project")]
    pub maintainer: String,
    /// ビルド成功後にレジストリへプッシュする
    #[arg(long, env = "KILN_PUSH")]
    pub push: bool,
    /// プッシュ先レジストリ (例: ghcr.io, localhost:5000)
    #[arg(long, env = "KILN_REGISTRY")]
    pub registry: Option<String>,
}

impl ConfigArgs {
    pub fn render(&self) -> anyhow::Result<BuildConfig> {
        let params = ConfigParams {
            base: self.base.clone(),
            install_mode: self.install_mode,
            namespace: self.namespace.clone(),
            tag: self.tag.clone(),
            build_threads: self.threads,
            push_threads: self.push_threads,
            maintainer: self.maintainer.clone(),
            push: self.push,
            registry: self.registry.clone(),
        };
        Ok(kilnflow_config::render(params)?)
    }
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// 対象イメージ名の正規表現（祖先イメージも含まれる）
    pub patterns: Vec<String>,
    #[command(flatten)]
    pub config: ConfigArgs,
    /// ログ・結果ファイルの出力先
    #[arg(long, env = "KILN_LOGS_DIR", default_value = "kiln-logs")]
    pub logs_dir: PathBuf,
    /// イメージ定義ファイル
    #[arg(long, env = "KILN_TARGETS_PATH")]
    pub targets: Option<PathBuf>,
    /// ビルドエンジンの実行ファイル
    #[arg(long, env = "KILN_ENGINE", default_value = "kiln-engine")]
    pub engine: PathBuf,
    /// ビルドエンジンに渡す追加引数（複数指定可）
    #[arg(long = "engine-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,
    /// レジストリのユーザー名
    #[arg(long, env = "KILN_REGISTRY_USERNAME")]
    pub username: Option<String>,
    /// レジストリのパスワード
    #[arg(long, env = "KILN_REGISTRY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// 進捗バーを表示しない
    #[arg(long)]
    pub no_progress: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ログはstderrへ。RUST_LOG 未指定時は警告以上のみ
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let result = match cli.command {
        Commands::Version => {
            println!("kilnflow {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
        Commands::Build(args) => commands::build::handle(args).await,
        Commands::List { patterns, targets } => {
            commands::list::handle(&patterns, targets.as_deref()).map(|_| 0)
        }
        Commands::Render { config } => commands::render::handle(&config).map(|_| 0),
        Commands::Df { namespace } => commands::df::handle(namespace.as_deref())
            .await
            .map(|_| 0),
    };

    match result {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ エラー".red().bold());
            eprintln!("  {}", commands::user_message(&e));
            std::process::exit(1);
        }
    }
}
