//! End-to-end tests for the kiln CLI binary.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Temporary kiln home plus a directory of formula files.
struct TestContext {
    temp_dir: TempDir,
    kiln_home: PathBuf,
    formulae: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let kiln_home = temp_dir.path().join(".kiln");
        let formulae = temp_dir.path().join("formulae");
        std::fs::create_dir_all(&kiln_home).expect("failed to create kiln home");
        std::fs::create_dir_all(&formulae).expect("failed to create formulae dir");
        Self {
            temp_dir,
            kiln_home,
            formulae,
        }
    }

    fn write_formula(&self, name: &str, body: &str) -> PathBuf {
        let path = self.formulae.join(format!("{name}.toml"));
        std::fs::write(&path, body).expect("failed to write formula");
        path
    }

    fn kiln_cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_kiln");
        let mut cmd = Command::new(bin_path);
        cmd.env("HOME", self.temp_dir.path());
        cmd.env("KILN_HOME", &self.kiln_home);
        cmd.env_remove("KILN_PREFIX");
        cmd.env_remove("KILN_LOGS");
        cmd.env_remove("KILN_CACHE");
        cmd.env_remove("KILN_VERBOSE");
        cmd.env("NO_COLOR", "1");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.kiln_cmd().args(args).output().expect("failed to run kiln")
    }
}

fn arg(path: &Path) -> &str {
    path.to_str().expect("non-UTF-8 temp path")
}

const ZLIB: &str = r#"
[formula]
name = "zlib"

[stable]
url = "https://example.com/zlib-1.3.tar.gz"
"#;

const PKG_CONFIG: &str = r#"
[formula]
name = "pkg-config"

[stable]
url = "https://example.com/pkg-config-0.29.tar.gz"
"#;

const LIBPNG: &str = r#"
[formula]
name = "libpng"
homepage = "https://libpng.example.com"

[stable]
url = "https://example.com/libpng-1.6.40.tar.gz"
depends_on = ["zlib", { name = "pkg-config", tags = ["build"] }]

[[option]]
name = "with-docs"
description = "Build the manual"
"#;

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx.run(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("build"));
}

#[test]
fn test_info_shows_declarations() {
    let ctx = TestContext::new();
    ctx.write_formula("zlib", ZLIB);
    ctx.write_formula("pkg-config", PKG_CONFIG);
    let libpng = ctx.write_formula("libpng", LIBPNG);

    let output = ctx.run(&["info", arg(&libpng)]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("libpng"));
    assert!(stdout.contains("1.6.40"));
    assert!(stdout.contains("https://libpng.example.com"));
    assert!(stdout.contains("--with-docs"));
}

#[test]
fn test_deps_lists_installation_order() {
    let ctx = TestContext::new();
    ctx.write_formula("zlib", ZLIB);
    ctx.write_formula("pkg-config", PKG_CONFIG);
    let libpng = ctx.write_formula("libpng", LIBPNG);

    let output = ctx.run(&["deps", arg(&libpng)]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("zlib"));
    assert!(lines[1].starts_with("pkg-config"));
}

#[test]
fn test_deps_unknown_formula_fails() {
    let ctx = TestContext::new();
    let libpng = ctx.write_formula("libpng", LIBPNG);

    let output = ctx.run(&["deps", arg(&libpng)]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no available formula named 'zlib'"));
}

#[cfg(unix)]
#[test]
fn test_build_from_local_source() {
    let ctx = TestContext::new();
    let src = ctx.temp_dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("hello.txt"), "hello\n").unwrap();
    let prefix = ctx.temp_dir.path().join("prefix");

    let hello = ctx.write_formula(
        "hello",
        r#"
[formula]
name = "hello"

[stable]
url = "https://example.com/hello-2.0.tar.gz"

[[build.step]]
command = "/bin/sh"
args = ["-c", "mkdir -p {prefix}/share && cp hello.txt {prefix}/share/"]
"#,
    );

    let output = ctx.run(&[
        "build",
        "--source",
        arg(&src),
        "--prefix",
        arg(&prefix),
        arg(&hello),
    ]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(
        std::fs::read_to_string(prefix.join("share/hello.txt")).unwrap(),
        "hello\n"
    );
    assert!(ctx.kiln_home.join("logs/hello/01.sh").exists());
}

#[cfg(unix)]
#[test]
fn test_failed_build_reports_log() {
    let ctx = TestContext::new();
    let src = ctx.temp_dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();

    let broken = ctx.write_formula(
        "broken",
        r#"
[formula]
name = "broken"

[stable]
url = "https://example.com/broken-0.1.tar.gz"

[[build.step]]
command = "/bin/sh"
args = ["-c", "echo 'error: missing header'; exit 3"]
"#,
    );

    let output = ctx.run(&["build", "--source", arg(&src), arg(&broken)]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: missing header"));
    assert!(stderr.contains("exit status 3"));

    let log = ctx.kiln_home.join("logs/broken/01.sh");
    let text = std::fs::read_to_string(log).unwrap();
    assert!(text.contains("FORMULA: broken"));
}
