//! Post-process pipeline.
//!
//! An ordered list of expressions executed inside the scratch directory,
//! with a small filesystem API (`glob`, `unarchive`, `move`, `delete`,
//! `chmod`, `chdir`, `log`). All paths are resolved against the pipeline's
//! working directory and must stay inside the scratch root. Steps run
//! strictly in order and the first failure — including a call to an
//! undefined function — aborts the install.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use minijinja::{Environment, ErrorKind, UndefinedBehavior, value::Value};
use thiserror::Error;

use crate::core::expr::ExprEngine;
use crate::core::package::PostStep;
use crate::core::platform::Platform;
use crate::io::extract;

#[derive(Error, Debug)]
pub enum PostProcessError {
    #[error("post-process step '{step}' failed: {message}")]
    Step { step: String, message: String },

    #[error("post-process condition '{condition}' failed: {message}")]
    Condition { condition: String, message: String },
}

#[derive(Debug)]
struct PipelineState {
    root: PathBuf,
    cwd: PathBuf,
}

impl PipelineState {
    /// Resolve `rel` against the working directory, refusing absolute
    /// paths and any traversal that would escape the scratch root.
    fn resolve(&self, rel: &str) -> Result<PathBuf, minijinja::Error> {
        let rel_path = Path::new(rel);
        if rel_path.is_absolute() {
            return Err(minijinja::Error::new(
                ErrorKind::InvalidOperation,
                format!("absolute paths are not allowed: {rel}"),
            ));
        }

        let mut out = self.cwd.clone();
        for component in rel_path.components() {
            match component {
                Component::Normal(c) => out.push(c),
                Component::CurDir => {}
                Component::ParentDir => {
                    if out == self.root || !out.pop() {
                        return Err(minijinja::Error::new(
                            ErrorKind::InvalidOperation,
                            format!("path escapes the scratch directory: {rel}"),
                        ));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(minijinja::Error::new(
                        ErrorKind::InvalidOperation,
                        format!("invalid path component in: {rel}"),
                    ));
                }
            }
        }
        if !out.starts_with(&self.root) {
            return Err(minijinja::Error::new(
                ErrorKind::InvalidOperation,
                format!("path escapes the scratch directory: {rel}"),
            ));
        }
        Ok(out)
    }
}

fn io_err(e: impl std::fmt::Display) -> minijinja::Error {
    minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string())
}

/// Run `steps` inside `root`. The platform environment (`os`, `arch`,
/// `platform`, `name`, `version`) is visible to step expressions and to
/// conditional guards.
pub fn run_pipeline(
    root: &Path,
    steps: &[PostStep],
    vars: &serde_json::Value,
    engine: &ExprEngine,
) -> Result<(), PostProcessError> {
    let state = Arc::new(Mutex::new(PipelineState {
        root: root.to_path_buf(),
        cwd: root.to_path_buf(),
    }));
    let env = build_env(&state);
    run_steps(&env, steps, vars, engine)
}

fn run_steps(
    env: &Environment<'static>,
    steps: &[PostStep],
    vars: &serde_json::Value,
    engine: &ExprEngine,
) -> Result<(), PostProcessError> {
    for step in steps {
        match step {
            PostStep::Expr(expr) => {
                let compiled = env.compile_expression(expr).map_err(|e| {
                    PostProcessError::Step {
                        step: expr.clone(),
                        message: e.to_string(),
                    }
                })?;
                compiled.eval(vars).map_err(|e| PostProcessError::Step {
                    step: expr.clone(),
                    message: e.to_string(),
                })?;
            }
            PostStep::Conditional { condition, steps } => {
                let truthy = engine
                    .eval_bool(condition, "post-process condition", vars)
                    .map_err(|e| PostProcessError::Condition {
                        condition: condition.clone(),
                        message: e.to_string(),
                    })?;
                if truthy {
                    run_steps(env, steps, vars, engine)?;
                }
            }
        }
    }
    Ok(())
}

fn build_env(state: &Arc<Mutex<PipelineState>>) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    {
        let state = state.clone();
        env.add_function("glob", move |pattern: String| -> Result<Value, minijinja::Error> {
            let state = state.lock().expect("pipeline state poisoned");
            let matches = glob_in(&state, &pattern)?;
            Ok(Value::from(matches))
        });
    }

    {
        let state = state.clone();
        env.add_function("unarchive", move |path: String| -> Result<Value, minijinja::Error> {
            let (archive, cwd) = {
                let state = state.lock().expect("pipeline state poisoned");
                (state.resolve(&path)?, state.cwd.clone())
            };
            extract::extract_into(&archive, &cwd).map_err(io_err)?;
            Ok(Value::UNDEFINED)
        });
    }

    {
        let state = state.clone();
        env.add_function(
            "move",
            move |src: String, dst: String| -> Result<Value, minijinja::Error> {
                let (from, to) = {
                    let state = state.lock().expect("pipeline state poisoned");
                    (state.resolve(&src)?, state.resolve(&dst)?)
                };
                move_path(&from, &to)?;
                Ok(Value::UNDEFINED)
            },
        );
    }

    {
        let state = state.clone();
        env.add_function("delete", move |pattern: String| -> Result<Value, minijinja::Error> {
            let state = state.lock().expect("pipeline state poisoned");
            for rel in glob_in(&state, &pattern)? {
                let path = state.resolve(&rel)?;
                if path.is_dir() {
                    std::fs::remove_dir_all(&path).map_err(io_err)?;
                } else {
                    std::fs::remove_file(&path).map_err(io_err)?;
                }
            }
            Ok(Value::UNDEFINED)
        });
    }

    {
        let state = state.clone();
        env.add_function(
            "chmod",
            move |path: String, mode: u32| -> Result<Value, minijinja::Error> {
                let resolved = {
                    let state = state.lock().expect("pipeline state poisoned");
                    state.resolve(&path)?
                };
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(
                        &resolved,
                        std::fs::Permissions::from_mode(mode),
                    )
                    .map_err(io_err)?;
                }
                #[cfg(not(unix))]
                {
                    let _ = (resolved, mode);
                }
                Ok(Value::UNDEFINED)
            },
        );
    }

    {
        let state = state.clone();
        env.add_function("chdir", move |path: String| -> Result<Value, minijinja::Error> {
            let mut state = state.lock().expect("pipeline state poisoned");
            let target = state.resolve(&path)?;
            if !target.is_dir() {
                return Err(minijinja::Error::new(
                    ErrorKind::InvalidOperation,
                    format!("chdir target is not a directory: {path}"),
                ));
            }
            state.cwd = target;
            Ok(Value::UNDEFINED)
        });
    }

    env.add_function(
        "log",
        |level: String, msg: String| -> Result<Value, minijinja::Error> {
            match level.to_lowercase().as_str() {
                "debug" => tracing::debug!("post-process: {msg}"),
                "warn" | "warning" => tracing::warn!("post-process: {msg}"),
                "error" => tracing::error!("post-process: {msg}"),
                _ => tracing::info!("post-process: {msg}"),
            }
            Ok(Value::UNDEFINED)
        },
    );

    env
}

fn glob_in(state: &PipelineState, pattern: &str) -> Result<Vec<String>, minijinja::Error> {
    // Validate the pattern stays inside the sandbox before globbing.
    if Path::new(pattern).is_absolute() || pattern.split('/').any(|c| c == "..") {
        return Err(minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("glob pattern escapes the scratch directory: {pattern}"),
        ));
    }
    let full = state.cwd.join(pattern);
    let paths = glob::glob(&full.to_string_lossy()).map_err(io_err)?;

    let mut out = Vec::new();
    for entry in paths {
        let path = entry.map_err(io_err)?;
        let rel = path
            .strip_prefix(&state.cwd)
            .map_err(io_err)?
            .to_string_lossy()
            .to_string();
        out.push(rel);
    }
    out.sort();
    Ok(out)
}

fn move_path(from: &Path, to: &Path) -> Result<(), minijinja::Error> {
    if !from.exists() {
        return Err(minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("move source does not exist: {}", from.display()),
        ));
    }
    if to.exists() {
        if to.is_dir() {
            std::fs::remove_dir_all(to).map_err(io_err)?;
        } else {
            std::fs::remove_file(to).map_err(io_err)?;
        }
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }

    // Cross-device fallback.
    if from.is_dir() {
        let mut options = fs_extra::dir::CopyOptions::new();
        options.copy_inside = true;
        options.overwrite = true;
        fs_extra::dir::move_dir(from, to, &options).map_err(io_err)?;
    } else {
        std::fs::copy(from, to).map_err(io_err)?;
        std::fs::remove_file(from).map_err(io_err)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn vars() -> serde_json::Value {
        serde_json::json!({
            "os": "linux",
            "arch": "amd64",
            "platform": "linux-amd64",
            "name": "tool",
            "version": "1.0.0",
        })
    }

    fn run(root: &Path, steps: &[PostStep]) -> Result<(), PostProcessError> {
        run_pipeline(root, steps, &vars(), &ExprEngine::new())
    }

    #[test]
    fn test_move_and_delete() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("tool-v1"), b"bin").unwrap();
        std::fs::write(dir.path().join("README.md"), b"docs").unwrap();

        let steps = vec![
            PostStep::Expr(r#"move("tool-v1", "tool")"#.to_string()),
            PostStep::Expr(r#"delete("*.md")"#.to_string()),
        ];
        run(dir.path(), &steps).unwrap();

        assert!(dir.path().join("tool").exists());
        assert!(!dir.path().join("tool-v1").exists());
        assert!(!dir.path().join("README.md").exists());
    }

    #[test]
    fn test_glob_feeds_expressions() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();

        let steps = vec![PostStep::Expr(
            r#"move(glob("*.txt")[0], "first")"#.to_string(),
        )];
        run(dir.path(), &steps).unwrap();
        assert!(dir.path().join("first").exists());
        assert!(!dir.path().join("a.txt").exists());
        assert!(dir.path().join("b.txt").exists());
    }

    #[test]
    fn test_chdir_scopes_later_steps() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("inner"), b"x").unwrap();

        let steps = vec![
            PostStep::Expr(r#"chdir("sub")"#.to_string()),
            PostStep::Expr(r#"move("inner", "renamed")"#.to_string()),
        ];
        run(dir.path(), &steps).unwrap();
        assert!(sub.join("renamed").exists());
    }

    #[test]
    fn test_unknown_function_fails_synchronously() {
        let dir = tempdir().unwrap();
        let steps = vec![PostStep::Expr(r#"rdir("x")"#.to_string())];
        let err = run(dir.path(), &steps).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("rdir"), "{msg}");
    }

    #[test]
    fn test_conditional_steps() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("tool"), b"bin").unwrap();

        let steps = vec![
            PostStep::Conditional {
                condition: "os == 'windows'".to_string(),
                steps: vec![PostStep::Expr(r#"move("tool", "tool.exe")"#.to_string())],
            },
            PostStep::Conditional {
                condition: "os == 'linux'".to_string(),
                steps: vec![PostStep::Expr(r#"move("tool", "tool-linux")"#.to_string())],
            },
        ];
        run(dir.path(), &steps).unwrap();
        assert!(dir.path().join("tool-linux").exists());
        assert!(!dir.path().join("tool.exe").exists());
    }

    #[test]
    fn test_sandbox_rejects_escape() {
        let dir = tempdir().unwrap();
        let steps = vec![PostStep::Expr(r#"delete("../outside")"#.to_string())];
        let err = run(dir.path(), &steps).unwrap_err();
        assert!(err.to_string().contains("escape"), "{err}");

        let steps = vec![PostStep::Expr(r#"move("a", "/etc/passwd")"#.to_string())];
        std::fs::write(dir.path().join("a"), b"x").unwrap();
        assert!(run(dir.path(), &steps).is_err());
    }

    #[test]
    fn test_chmod_sets_executable_bit() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("tool"), b"bin").unwrap();

        let steps = vec![PostStep::Expr(r#"chmod("tool", 493)"#.to_string())];
        run(dir.path(), &steps).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join("tool"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_unarchive_in_place() {
        let dir = tempdir().unwrap();

        // Build a small tar.gz in the scratch dir.
        let archive_path = dir.path().join("bundle.tar.gz");
        let file = std::fs::File::create(&archive_path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(5);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "nested/file", &b"hello"[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let steps = vec![PostStep::Expr(
            r#"unarchive(glob("*.tar.gz")[0])"#.to_string(),
        )];
        run(dir.path(), &steps).unwrap();
        assert!(dir.path().join("nested/file").exists());
        // The archive itself stays; deleting it is a separate step.
        assert!(archive_path.exists());
    }
}
