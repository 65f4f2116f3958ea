use anyhow::Result;
use serde_json::{Map, Value};
use std::path::Path;

use crate::args::BaseArgs;

pub fn run(base: &BaseArgs, path: &Path, verbose: bool) -> Result<()> {
    let prefs = super::load_file(path);
    let fields = prefs.non_empty_fields();

    let output = if verbose {
        let display_path = std::env::current_dir()
            .ok()
            .and_then(|cwd| pathdiff::diff_paths(path, &cwd))
            .filter(|relative| !relative.starts_with(".."))
            .unwrap_or_else(|| path.to_path_buf())
            .display()
            .to_string();
        format_verbose(&display_path, &fields, base.json)?
    } else {
        format_resolved(&fields, base.json)?
    };

    if !output.is_empty() {
        if base.json {
            // json goes to stdout so it can be piped to other tools
            println!("{output}");
        } else {
            eprintln!("{output}");
        }
    }

    Ok(())
}

fn to_map(fields: &[(&str, &str)]) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

fn format_resolved(fields: &[(&str, &str)], json: bool) -> Result<String> {
    if json {
        Ok(serde_json::to_string(&to_map(fields))?)
    } else {
        Ok(fields
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

fn format_verbose(path: &str, fields: &[(&str, &str)], json: bool) -> Result<String> {
    if json {
        let mut map = Map::new();
        map.insert(path.to_string(), Value::Object(to_map(fields)));
        Ok(serde_json::to_string(&map)?)
    } else if fields.is_empty() {
        Ok(String::new())
    } else {
        let mut group = String::from(path);
        for (key, value) in fields {
            group.push_str(&format!("\n  {key}: {value}"));
        }
        Ok(group)
    }
}
