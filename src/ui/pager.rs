use std::io::{self, IsTerminal, Write};
use std::process::{Command, Stdio};

const PAGER_ENV: &str = "AIV_PAGER";

/// Prints `output`, piping it through a pager when stdout is a terminal and
/// the text is taller than the screen. `AIV_PAGER` wins over `PAGER`.
pub fn print_with_pager(output: &str) -> io::Result<()> {
    if !io::stdout().is_terminal() {
        println!("{output}");
        return Ok(());
    }

    let (_, term_height) = crossterm::terminal::size().unwrap_or((80, 24));
    if output.lines().count() <= term_height as usize {
        println!("{output}");
        return Ok(());
    }

    let Some((cmd, args)) = pager_command() else {
        println!("{output}");
        return Ok(());
    };

    let mut child = match Command::new(&cmd).args(&args).stdin(Stdio::piped()).spawn() {
        Ok(child) => child,
        Err(err) => {
            tracing::debug!(%cmd, error = %err, "pager unavailable");
            println!("{output}");
            return Ok(());
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        let _ = writeln!(stdin, "{output}");
    }

    let _ = child.wait();
    Ok(())
}

fn pager_command() -> Option<(String, Vec<String>)> {
    let configured = [PAGER_ENV, "PAGER"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "less -R".into());
    split_command(&configured)
}

fn split_command(command: &str) -> Option<(String, Vec<String>)> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let cmd = parts.next()?;
    Some((cmd, parts.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_command_separates_arguments() {
        assert_eq!(
            split_command("less -R -S"),
            Some(("less".into(), vec!["-R".into(), "-S".into()]))
        );
        assert_eq!(split_command("   "), None);
    }
}
