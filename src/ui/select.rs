use std::io::IsTerminal;

use anyhow::{bail, Result};
use dialoguer::{theme::ColorfulTheme, FuzzySelect};

/// Fuzzy select from a list of labels. Requires a TTY on stdin.
pub fn fuzzy_select<T: ToString>(prompt: &str, items: &[T], default: usize) -> Result<usize> {
    if !std::io::stdin().is_terminal() {
        bail!("interactive selection requires a TTY; pass the id explicitly");
    }

    if items.is_empty() {
        bail!("nothing to select from");
    }

    let labels: Vec<String> = items.iter().map(|i| i.to_string()).collect();

    let selection = FuzzySelect::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(&labels)
        .default(default.min(labels.len() - 1))
        .interact()?;

    Ok(selection)
}
