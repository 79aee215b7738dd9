//! Worker-side Language Runner: turns a `(language, code, args)` triple
//! into output bytes by shelling out to an interpreter or a
//! compile-then-run pair, under a fixed wall-clock deadline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::protocol::JOB_TIMEOUT_SECS;

/// What came back from running a submission.
pub enum RunOutcome {
    /// Subprocess ran to completion: stdout on exit 0, stderr otherwise.
    /// A program that traps and exits nonzero is not a runner failure.
    Ran(Vec<u8>),
    /// The 30s deadline fired before the process (or compile step)
    /// finished.
    Timeout,
    /// No `LanguageSpec` registered for this tag.
    Unsupported,
}

/// Abstracts over "actually spawn a subprocess" so `session` and its
/// tests can substitute a fake that never touches the filesystem.
#[async_trait::async_trait]
pub trait LanguageRunner: Send + Sync {
    /// Whether this tag is registered, checked right after the language
    /// blob arrives and before the (possibly large) code blob is sent.
    fn supports(&self, language: &str) -> bool;
    async fn run(&self, language: &str, code: &[u8], args: &str) -> RunOutcome;
}

/// Either a single-command interpreter, or a compile step followed by
/// running the produced executable.
enum LanguageSpec {
    Interpreted {
        command: &'static str,
        command_args: fn(&Path, &[String]) -> Vec<String>,
        extension: &'static str,
    },
    Compiled {
        compiler: &'static str,
        compile_args: fn(&Path, &Path) -> Vec<String>,
        extension: &'static str,
    },
}

fn split_args(args: &str) -> Vec<String> {
    args.split_whitespace().map(str::to_string).collect()
}

/// Production `LanguageRunner`. Holds the static language table built
/// once at construction; `run()` is otherwise stateless.
pub struct ProcessRunner {
    table: HashMap<&'static str, LanguageSpec>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        let mut table: HashMap<&'static str, LanguageSpec> = HashMap::new();

        table.insert(
            "python",
            LanguageSpec::Interpreted {
                command: "python3",
                command_args: |file, extra| {
                    let mut v = vec![file.display().to_string()];
                    v.extend(extra.iter().cloned());
                    v
                },
                extension: "py",
            },
        );
        table.insert(
            "javascript",
            LanguageSpec::Interpreted {
                command: "node",
                command_args: |file, extra| {
                    let mut v = vec![file.display().to_string()];
                    v.extend(extra.iter().cloned());
                    v
                },
                extension: "js",
            },
        );
        table.insert(
            "php",
            LanguageSpec::Interpreted {
                command: "php",
                command_args: |file, extra| {
                    let mut v = vec!["-f".to_string(), file.display().to_string()];
                    v.extend(extra.iter().cloned());
                    v
                },
                extension: "php",
            },
        );
        table.insert(
            "go",
            LanguageSpec::Interpreted {
                command: "go",
                command_args: |file, extra| {
                    let mut v = vec!["run".to_string(), file.display().to_string()];
                    v.extend(extra.iter().cloned());
                    v
                },
                extension: "go",
            },
        );
        table.insert(
            "java",
            LanguageSpec::Interpreted {
                command: "java",
                command_args: |file, extra| {
                    let mut v = vec![file.display().to_string()];
                    v.extend(extra.iter().cloned());
                    v
                },
                extension: "java",
            },
        );
        table.insert(
            "c",
            LanguageSpec::Compiled {
                compiler: "gcc",
                compile_args: |src, exe| {
                    vec![
                        "-o".to_string(),
                        exe.display().to_string(),
                        src.display().to_string(),
                    ]
                },
                extension: "c",
            },
        );
        table.insert(
            "cpp",
            LanguageSpec::Compiled {
                compiler: "g++",
                compile_args: |src, exe| {
                    vec![
                        "-o".to_string(),
                        exe.display().to_string(),
                        src.display().to_string(),
                    ]
                },
                extension: "cpp",
            },
        );
        table.insert(
            "cs",
            LanguageSpec::Compiled {
                compiler: "mcs",
                compile_args: |src, exe| {
                    vec![
                        format!("-out:{}", exe.display()),
                        src.display().to_string(),
                    ]
                },
                extension: "cs",
            },
        );

        // Aliases: extra keys pointing at a re-derived copy of the spec.
        // Function pointers are Copy, so this is cheap.
        let python = clone_spec(table.get("python").unwrap());
        table.insert("py", python);
        let cpp = clone_spec(table.get("cpp").unwrap());
        table.insert("c++", cpp);
        let js = clone_spec(table.get("javascript").unwrap());
        table.insert("js", js);

        Self { table }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn clone_spec(spec: &LanguageSpec) -> LanguageSpec {
    match spec {
        LanguageSpec::Interpreted {
            command,
            command_args,
            extension,
        } => LanguageSpec::Interpreted {
            command,
            command_args: *command_args,
            extension,
        },
        LanguageSpec::Compiled {
            compiler,
            compile_args,
            extension,
        } => LanguageSpec::Compiled {
            compiler,
            compile_args: *compile_args,
            extension,
        },
    }
}

async fn run_to_completion(mut command: Command) -> std::io::Result<Vec<u8>> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;
    if output.status.success() {
        Ok(output.stdout)
    } else {
        Ok(output.stderr)
    }
}

async fn run_job(
    table: &HashMap<&'static str, LanguageSpec>,
    language: &str,
    code: &[u8],
    args: &str,
) -> std::io::Result<RunOutcome> {
    let Some(spec) = table.get(language) else {
        return Ok(RunOutcome::Unsupported);
    };

    let dir = tempfile::tempdir()?;
    let extra = split_args(args);

    match spec {
        LanguageSpec::Interpreted {
            command,
            command_args,
            extension,
        } => {
            let file = dir.path().join(format!("script.{extension}"));
            write_source(&file, code).await?;
            let mut cmd = Command::new(command);
            cmd.args(command_args(&file, &extra));
            Ok(RunOutcome::Ran(run_to_completion(cmd).await?))
        }
        LanguageSpec::Compiled {
            compiler,
            compile_args,
            extension,
        } => {
            let src = dir.path().join(format!("script.{extension}"));
            write_source(&src, code).await?;
            let exe: PathBuf = dir.path().join("out");

            let mut compile = Command::new(compiler);
            compile.args(compile_args(&src, &exe));
            let compile_output = compile
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await?;
            if !compile_output.status.success() {
                return Ok(RunOutcome::Ran(compile_output.stderr));
            }

            let mut run = Command::new(&exe);
            run.args(&extra);
            Ok(RunOutcome::Ran(run_to_completion(run).await?))
        }
    }
}

async fn write_source(path: &Path, code: &[u8]) -> std::io::Result<()> {
    let mut f = tokio::fs::File::create(path).await?;
    f.write_all(code).await?;
    f.flush().await?;
    Ok(())
}

#[async_trait::async_trait]
impl LanguageRunner for ProcessRunner {
    fn supports(&self, language: &str) -> bool {
        self.table.contains_key(language)
    }

    async fn run(&self, language: &str, code: &[u8], args: &str) -> RunOutcome {
        let deadline = Duration::from_secs(JOB_TIMEOUT_SECS);
        match timeout(deadline, run_job(&self.table, language, code, args)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::warn!("runner io error: {e}");
                RunOutcome::Ran(e.to_string().into_bytes())
            }
            Err(_) => RunOutcome::Timeout,
        }
    }
}

/// Test double: never spawns a process, returns a fixed outcome.
#[cfg(test)]
pub struct FakeRunner {
    outcome: FakeOutcome,
}

#[cfg(test)]
enum FakeOutcome {
    Ok(Vec<u8>),
    Unsupported,
    Timeout,
}

#[cfg(test)]
impl FakeRunner {
    pub fn always_ok(bytes: Vec<u8>) -> Self {
        Self {
            outcome: FakeOutcome::Ok(bytes),
        }
    }

    pub fn unsupported() -> Self {
        Self {
            outcome: FakeOutcome::Unsupported,
        }
    }

    pub fn always_timeout() -> Self {
        Self {
            outcome: FakeOutcome::Timeout,
        }
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl LanguageRunner for FakeRunner {
    fn supports(&self, _language: &str) -> bool {
        !matches!(self.outcome, FakeOutcome::Unsupported)
    }

    async fn run(&self, _language: &str, _code: &[u8], _args: &str) -> RunOutcome {
        match &self.outcome {
            FakeOutcome::Ok(bytes) => RunOutcome::Ran(bytes.clone()),
            FakeOutcome::Unsupported => RunOutcome::Unsupported,
            FakeOutcome::Timeout => RunOutcome::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_languages_and_aliases_are_registered() {
        let runner = ProcessRunner::new();
        for lang in [
            "python", "py", "javascript", "js", "php", "go", "java", "c", "cpp", "c++", "cs",
        ] {
            assert!(runner.table.contains_key(lang), "missing {lang}");
        }
    }

    #[tokio::test]
    async fn unsupported_language_short_circuits_without_spawning() {
        let runner = ProcessRunner::new();
        let outcome = runner.run("brainfuck", b"+++", "").await;
        assert!(matches!(outcome, RunOutcome::Unsupported));
    }
}
