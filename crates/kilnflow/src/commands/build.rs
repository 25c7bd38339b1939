use crate::BuildArgs;
use crate::docker;
use colored::Colorize;
use kilnflow_build::{
    BuildOutcome, CommandEngine, DEFAULT_REGISTRY, DockerCliAuthenticator, DockerPusher,
    DockerStorage, OutcomeStatus, Pipeline, PushOutcome, PushStatus, RegistryCredentials,
    RunSummary, StorageReport, TargetGraph, format_bytes,
};
use kilnflow_config::BuildConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// ビルドコマンドを処理し、プロセスの終了コードを返す
pub async fn handle(args: BuildArgs) -> anyhow::Result<i32> {
    let config = Arc::new(args.config.render()?);
    let graph = super::load_targets(&args.patterns, args.targets.as_deref())?;

    println!("{}", "イメージをビルド中...".green());
    println!(
        "ベース: {} ({})",
        config.base().cyan(),
        config.install_mode().as_str().cyan()
    );
    println!("タグ: {}", config.tag().cyan());
    println!(
        "並列数: build={} push={}",
        config.build_threads(),
        config.push_threads()
    );
    if config.push_enabled() {
        println!(
            "プッシュ先: {}",
            config.registry().unwrap_or(DEFAULT_REGISTRY).cyan()
        );
    }

    if graph.is_empty() {
        return handle_empty(&args, config, &graph).await;
    }
    println!("対象イメージ: {}", graph.len());
    println!();

    let credentials = match (args.username, args.password) {
        (Some(username), Some(password)) => Some(RegistryCredentials::new(
            username,
            password,
            config.registry().unwrap_or(DEFAULT_REGISTRY),
        )),
        (None, None) => None,
        _ => anyhow::bail!(
            "KILN_REGISTRY_USERNAME と KILN_REGISTRY_PASSWORD は両方指定してください"
        ),
    };

    // プッシュには Docker 接続が必須。それ以外はイメージサイズ取得のみに使う
    let docker_conn = if config.push_enabled() {
        Some(docker::init_docker_with_error_handling().await?)
    } else {
        docker::try_connect().await
    };

    let mut engine = CommandEngine::new(&args.engine).with_args(args.engine_args.clone());
    if let Some(docker_conn) = &docker_conn {
        engine = engine.with_docker(docker_conn.clone());
    }

    let mut pipeline = Pipeline::new(Arc::clone(&config), Arc::new(engine), &args.logs_dir)
        .with_registry(Arc::new(DockerCliAuthenticator::default()), credentials)
        .with_progress(!args.no_progress);
    if let Some(docker_conn) = docker_conn {
        pipeline = pipeline
            .with_publisher(Arc::new(DockerPusher::new(docker_conn.clone())))
            .with_storage(Arc::new(DockerStorage::new(docker_conn)));
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!(
                "{}",
                "中断しています... 実行中のビルドの完了を待っています".yellow()
            );
            cancel_tx.send_replace(true);
        }
    });

    let report = pipeline.run_report(&graph, cancel_rx).await?;

    println!();
    for outcome in &report.outcomes {
        print_outcome(outcome);
    }
    for push in &report.pushes {
        print_push(push);
    }

    println!();
    print_summary(&report.summary);
    println!("結果: {}", report.results_path.display().to_string().dimmed());

    if let Some(storage) = pipeline.storage_report().await {
        println!();
        print_storage(&storage);
    }

    Ok(report.summary.exit_code())
}

/// 対象イメージが無い場合の処理
///
/// 前回の結果が残らないよう件数 0 のサマリーを書き出す。
/// パターンが一つも一致しなかった場合は指定ミスとして 1 を返す。
async fn handle_empty(
    args: &BuildArgs,
    config: Arc<BuildConfig>,
    graph: &TargetGraph,
) -> anyhow::Result<i32> {
    let engine = CommandEngine::new(&args.engine);
    let pipeline = Pipeline::new(config, Arc::new(engine), &args.logs_dir);
    // 送信側を保持したままにする
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let report = pipeline.run_report(graph, cancel_rx).await?;

    if args.patterns.is_empty() {
        println!("{}", "ビルド対象のイメージがありません".yellow());
    } else {
        println!(
            "{} {}",
            "指定されたパターンに一致するイメージがありません:".red(),
            args.patterns.join(" ")
        );
    }
    println!("結果: {}", report.results_path.display().to_string().dimmed());

    Ok(if args.patterns.is_empty() { 0 } else { 1 })
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}

fn print_outcome(outcome: &BuildOutcome) {
    match outcome.status {
        OutcomeStatus::Success => {
            let size = outcome
                .image_size
                .map(format_bytes)
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} {} ({}, {})",
                "✓".green(),
                outcome.target.cyan(),
                format_elapsed(outcome.elapsed),
                size
            );
        }
        OutcomeStatus::Failed => {
            println!(
                "  {} {} ({})",
                "✗".red(),
                outcome.target.red(),
                format_elapsed(outcome.elapsed)
            );
            if let Some(error) = &outcome.error {
                println!("      {}", error);
            }
            if let Some(log_path) = &outcome.log_path {
                println!("      ログ: {}", log_path.display().to_string().dimmed());
            }
        }
        OutcomeStatus::Skipped => {
            println!(
                "  {} {} {}",
                "-".dimmed(),
                outcome.target.dimmed(),
                outcome
                    .skipped_because
                    .as_deref()
                    .unwrap_or_default()
                    .dimmed()
            );
        }
    }
}

fn print_push(push: &PushOutcome) {
    match push.status {
        PushStatus::Pushed => println!("  {} pushed {}", "↑".green(), push.image),
        PushStatus::Failed => {
            println!("  {} push failed {}", "✗".red(), push.image.red());
            if let Some(error) = &push.error {
                println!("      {}", error);
            }
        }
    }
}

fn print_summary(summary: &RunSummary) {
    let headline = if summary.failed > 0 {
        "✗ ビルドに失敗したイメージがあります".red().bold()
    } else if summary.cancelled {
        "! ビルドは中断されました".yellow().bold()
    } else if summary.push_failed > 0 {
        "! プッシュに失敗したイメージがあります".yellow().bold()
    } else {
        "✓ ビルド完了".green().bold()
    };
    println!("{}", headline);
    println!(
        "  成功: {}  失敗: {}  スキップ: {}  ({})",
        summary.succeeded.to_string().green(),
        summary.failed.to_string().red(),
        summary.skipped.to_string().yellow(),
        format_elapsed(summary.elapsed)
    );
    if summary.pushed + summary.push_failed > 0 {
        println!(
            "  プッシュ: {}  プッシュ失敗: {}",
            summary.pushed.to_string().green(),
            summary.push_failed.to_string().red()
        );
    }
}

pub fn print_storage(report: &StorageReport) {
    println!(
        "{} {}",
        "ストレージ使用量:".bold(),
        format_bytes(report.total_usage)
    );
    for usage in &report.per_layer_usage {
        println!(
            "  {:<60} {:>10}  (shared {})",
            usage.image,
            format_bytes(usage.size),
            format_bytes(usage.shared_size)
        );
    }
}
