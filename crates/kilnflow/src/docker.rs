use colored::Colorize;

fn print_connection_help(error: &dyn std::fmt::Display) {
    eprintln!();
    eprintln!("{}", "✗ Docker接続エラー".red().bold());
    eprintln!();
    eprintln!("{}", "原因:".yellow());
    eprintln!("  {}", error);
    eprintln!();
    eprintln!("{}", "解決方法:".yellow());
    eprintln!("  • Dockerが起動しているか確認してください");
    eprintln!("  • docker ps コマンドが正常に動作するか確認してください");
    eprintln!("  • DOCKER_HOST を使っている場合は値を確認してください");
}

/// Docker接続を初期化（エラーハンドリング付き）
pub async fn init_docker_with_error_handling() -> anyhow::Result<bollard::Docker> {
    match try_connect_inner().await {
        Ok(docker) => Ok(docker),
        Err(e) => {
            print_connection_help(&e);
            Err(anyhow::anyhow!("Docker接続に失敗しました"))
        }
    }
}

/// Docker接続を試みる。失敗しても処理は続行する
pub async fn try_connect() -> Option<bollard::Docker> {
    match try_connect_inner().await {
        Ok(docker) => Some(docker),
        Err(e) => {
            tracing::warn!(error = %e, "docker is unavailable, image sizes will not be reported");
            None
        }
    }
}

async fn try_connect_inner() -> Result<bollard::Docker, bollard::errors::Error> {
    let docker = bollard::Docker::connect_with_local_defaults()?;
    docker.ping().await?;
    Ok(docker)
}
