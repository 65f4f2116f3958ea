use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const ENV_FILE_FLAG: &str = "--env-file";
const ENV_FILE_VAR: &str = "AIV_ENV_FILE";
const MODE_VAR: &str = "AIV_ENV";

/// Loads `.env` files before clap sees the arguments, so env-backed flags
/// can be set from them. `--env-file` (or `AIV_ENV_FILE`) replaces the
/// default cascade.
pub fn bootstrap_from_args(args: &[OsString]) -> Result<()> {
    let explicit = env_file_from_args(args).or_else(|| {
        std::env::var_os(ENV_FILE_VAR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    });
    load_env(explicit.as_deref())
}

/// Process variables always win. Among the files, later ones override
/// earlier ones. A missing explicit file is an error; missing cascade files
/// are skipped.
pub fn load_env(explicit: Option<&Path>) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let mut pending = BTreeMap::new();

    for path in candidate_files(&cwd, explicit) {
        if explicit.is_none() && !path.is_file() {
            continue;
        }
        let entries = dotenvy::from_path_iter(&path)
            .with_context(|| format!("failed to read env file {}", path.display()))?;
        for entry in entries {
            let (key, value) =
                entry.with_context(|| format!("failed to parse env file {}", path.display()))?;
            if std::env::var_os(&key).is_none() {
                pending.insert(key, value);
            }
        }
    }

    for (key, value) in pending {
        std::env::set_var(key, value);
    }
    Ok(())
}

/// Last `--env-file` value before a `--` separator.
fn env_file_from_args(args: &[OsString]) -> Option<PathBuf> {
    let mut found = None;
    let mut rest = args.iter().skip(1).map(|arg| arg.to_str());
    while let Some(arg) = rest.next() {
        match arg {
            Some("--") => break,
            Some(ENV_FILE_FLAG) => {
                if let Some(Some(value)) = rest.next() {
                    found = Some(PathBuf::from(value));
                }
            }
            Some(other) => {
                if let Some(value) = other
                    .strip_prefix(ENV_FILE_FLAG)
                    .and_then(|tail| tail.strip_prefix('='))
                {
                    found = Some(PathBuf::from(value));
                }
            }
            None => {}
        }
    }
    found
}

/// Files to read, lowest precedence first.
fn candidate_files(cwd: &Path, explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![cwd.join(path)];
    }

    let mode = std::env::var(MODE_VAR)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "development".to_string());
    let mut names = vec![".env".to_string(), format!(".env.{mode}")];
    if mode != "test" {
        names.push(".env.local".to_string());
    }
    names.push(format!(".env.{mode}.local"));
    names.into_iter().map(|name| cwd.join(name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os_args(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn env_file_flag_with_separate_value() {
        let args = os_args(&["aiv", "apps", "--env-file", "prod.env"]);
        assert_eq!(env_file_from_args(&args), Some(PathBuf::from("prod.env")));
    }

    #[test]
    fn env_file_flag_with_equals() {
        let args = os_args(&["aiv", "--env-file=/tmp/a.env", "tenants"]);
        assert_eq!(env_file_from_args(&args), Some(PathBuf::from("/tmp/a.env")));
    }

    #[test]
    fn env_file_flag_after_double_dash_is_ignored() {
        let args = os_args(&["aiv", "kql", "--", "--env-file", "x.env"]);
        assert_eq!(env_file_from_args(&args), None);
    }

    #[test]
    fn explicit_env_file_resolves_against_cwd() {
        let cwd = Path::new("/work");
        let files = candidate_files(cwd, Some(Path::new("custom.env")));
        assert_eq!(files, vec![PathBuf::from("/work/custom.env")]);
    }

    #[test]
    fn load_env_does_not_override_existing_vars() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("test.env");
        std::fs::write(
            &path,
            "AIV_ENV_TEST_EXISTING=from-file\nAIV_ENV_TEST_FRESH=loaded\n",
        )
        .expect("write env file");
        std::env::set_var("AIV_ENV_TEST_EXISTING", "from-process");

        load_env(Some(path.as_path())).expect("load env");

        assert_eq!(
            std::env::var("AIV_ENV_TEST_EXISTING").as_deref(),
            Ok("from-process")
        );
        assert_eq!(std::env::var("AIV_ENV_TEST_FRESH").as_deref(), Ok("loaded"));
    }
}
