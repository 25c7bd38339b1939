//! ビルドエンジン用設定ファイルの生成
//!
//! Teraを使用して [`BuildConfig`] を INI 形式の設定ファイルに展開します。

use crate::error::Result;
use crate::model::BuildConfig;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};

/// 生成する設定ファイル名
pub const ENGINE_CONFIG_FILE: &str = "kiln-build.conf";

const ENGINE_CONFIG_TEMPLATE: &str = r#"# Generated by kilnflow. Do not edit.
[DEFAULT]
base = {{ base }}
install_type = {{ install_mode }}
namespace = {{ namespace }}
tag = {{ tag }}
threads = {{ build_threads }}
push_threads = {{ push_threads }}
maintainer = {{ maintainer }}
push = {{ push }}
{% if registry %}registry = {{ registry }}
{% endif %}"#;

/// 設定ファイルの内容を生成（ファイルには書き込まない）
pub fn render_engine_config(config: &BuildConfig) -> Result<String> {
    let context = Context::from_serialize(config)?;
    let rendered = Tera::one_off(ENGINE_CONFIG_TEMPLATE, &context, false)?;
    Ok(rendered)
}

/// 設定ファイルを `{dir}/kiln-build.conf` に書き出す
///
/// ディレクトリが存在しない場合は作成する。
pub fn write_engine_config(config: &BuildConfig, dir: &Path) -> Result<PathBuf> {
    let content = render_engine_config(config)?;

    std::fs::create_dir_all(dir)?;
    let path = dir.join(ENGINE_CONFIG_FILE);
    std::fs::write(&path, content)?;

    tracing::debug!(path = %path.display(), "wrote engine config");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConfigParams, InstallMode, render};

    fn sample_config(registry: Option<&str>) -> BuildConfig {
        render(ConfigParams {
            base: "ubuntu".to_string(),
            install_mode: InstallMode::Source,
            namespace: "lab".to_string(),
            tag: "v3".to_string(),
            build_threads: 6,
            push_threads: 2,
            maintainer: "Lab Team <lab@example.com>".to_string(),
            push: true,
            registry: registry.map(str::to_string),
        })
        .unwrap()
    }

    #[test]
    fn test_render_engine_config() {
        let content = render_engine_config(&sample_config(None)).unwrap();

        assert!(content.contains("[DEFAULT]"));
        assert!(content.contains("base = ubuntu"));
        assert!(content.contains("install_type = source"));
        assert!(content.contains("namespace = lab"));
        assert!(content.contains("tag = v3"));
        assert!(content.contains("threads = 6"));
        assert!(content.contains("push_threads = 2"));
        assert!(content.contains("maintainer = Lab Team <lab@example.com>"));
        assert!(content.contains("push = true"));
        assert!(!content.contains("registry ="));
    }

    #[test]
    fn test_render_engine_config_with_registry() {
        let content = render_engine_config(&sample_config(Some("registry.local:5000"))).unwrap();
        assert!(content.contains("registry = registry.local:5000"));
    }

    #[test]
    fn test_render_engine_config_has_one_entry_per_key() {
        let content = render_engine_config(&sample_config(Some("registry.local:5000"))).unwrap();
        let keys: Vec<&str> = content
            .lines()
            .filter(|line| line.contains(" = "))
            .filter_map(|line| line.split(" = ").next())
            .collect();
        assert_eq!(
            keys,
            [
                "base",
                "install_type",
                "namespace",
                "tag",
                "threads",
                "push_threads",
                "maintainer",
                "push",
                "registry"
            ]
        );
    }

    #[test]
    fn test_write_engine_config_creates_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("logs").join("run");

        let path = write_engine_config(&sample_config(None), &dir).unwrap();

        assert_eq!(path, dir.join(ENGINE_CONFIG_FILE));
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with("# Generated by kilnflow"));
    }
}
