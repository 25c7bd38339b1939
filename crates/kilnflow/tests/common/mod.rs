use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write_images_yaml(&self, content: &str) {
        let path = self.root.path().join("images.yaml");
        fs::write(path, content).unwrap();
    }

    /// 最後の引数 (ターゲット名) が `fail_target` の時だけ失敗するエンジン
    #[cfg(unix)]
    #[allow(dead_code)]
    pub fn write_engine(&self, fail_target: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.root.path().join("fake-engine.sh");
        let script = format!(
            "#!/bin/sh\n\
             for last; do :; done\n\
             echo \"args: $*\"\n\
             echo \"building $last\"\n\
             if [ \"$last\" = \"{}\" ]; then\n\
             \x20 echo \"compile error\" >&2\n\
             \x20 exit 2\n\
             fi\n",
            fail_target
        );
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }
}
