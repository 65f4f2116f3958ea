use anyhow::Result;
use std::path::Path;

use crate::ui::{print_command_status, CommandStatus};

pub fn run(path: &Path, key: &str, value: &str) -> Result<()> {
    let mut prefs = super::load_file(path);

    prefs.set_field(key, value.trim().to_string());

    super::save_file(path, &prefs)?;

    print_command_status(CommandStatus::Success, &format!("Set {key} = {value}"));
    Ok(())
}

pub fn unset(path: &Path, key: &str) -> Result<()> {
    let mut prefs = super::load_file(path);

    prefs.unset_field(key);

    super::save_file(path, &prefs)?;

    print_command_status(CommandStatus::Success, &format!("Unset {key}"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn set_then_unset_keeps_other_keys() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("prefs.json");
        std::fs::write(&path, r#"{"aiv.timeRange": "P7D", "custom": true}"#).unwrap();

        run(&path, "tenant", " t-1 ").unwrap();
        let prefs = super::super::load_file(&path);
        assert_eq!(prefs.get_field("tenant"), Some("t-1"));
        assert_eq!(prefs.get_field("time_range"), Some("P7D"));

        unset(&path, "tenant").unwrap();
        let prefs = super::super::load_file(&path);
        assert_eq!(prefs.get_field("tenant"), None);
        assert!(prefs.extra.contains_key("custom"));
    }
}
