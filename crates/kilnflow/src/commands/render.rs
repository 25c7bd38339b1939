use crate::ConfigArgs;

/// ビルドエンジン用の設定ファイルを標準出力に表示
pub fn handle(args: &ConfigArgs) -> anyhow::Result<()> {
    let config = args.render()?;
    let rendered = kilnflow_config::render_engine_config(&config)?;
    print!("{}", rendered);
    Ok(())
}
