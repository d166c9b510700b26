//! Script-evaluation fallback
//!
//! As a last resort the locator asks an installed shell where it lives.
//! The shell is located on `PATH`, fed a script on stdin, and every
//! non-empty stdout line is taken as a candidate file or directory.
//! Results are memoized process-wide per (shell, script).

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Shell used when none is configured.
pub const DEFAULT_SHELL: &str = "tclsh";

/// Prints the shell's own directory and its sibling `lib` directory.
pub const DEFAULT_SCRIPT: &str = "set d [file dirname [info nameofexecutable]]\n\
puts $d\n\
puts [file join [file dirname $d] lib]\n\
exit 0\n";

type Memo = HashMap<(String, String), Result<Vec<PathBuf>, String>>;

static MEMO: Lazy<Mutex<Memo>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Run `script` through `shell`, returning the paths it printed.
///
/// Failures are memoized too, so a missing shell is only looked up once.
pub fn evaluate(shell: &str, script: &str) -> Result<Vec<PathBuf>, String> {
    let key = (shell.to_string(), script.to_string());
    if let Some(cached) = MEMO.lock().get(&key) {
        return cached.clone();
    }
    // Not held across the child process
    let result = run(shell, script);
    MEMO.lock().insert(key, result.clone());
    result
}

/// Forget every memoized result.
pub fn clear_memo() {
    MEMO.lock().clear();
}

fn run(shell: &str, script: &str) -> Result<Vec<PathBuf>, String> {
    let program = which::which(shell).map_err(|e| format!("shell \"{}\" not found: {}", shell, e))?;
    tracing::debug!(shell = %program.display(), "evaluating locator script");

    let mut child = Command::new(&program)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("failed to execute \"{}\": {}", program.display(), e))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(script.as_bytes())
            .map_err(|e| format!("failed to write script to \"{}\": {}", program.display(), e))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("failed to wait for \"{}\": {}", program.display(), e))?;
    if !output.status.success() {
        return Err(format!("\"{}\" exited with {}", program.display(), output.status));
    }

    Ok(parse_output(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_output(stdout: &str) -> Vec<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output_skips_blank_lines() {
        let paths = parse_output("/usr/bin\n\n  /usr/lib  \n");
        assert_eq!(paths, vec![PathBuf::from("/usr/bin"), PathBuf::from("/usr/lib")]);
    }

    #[test]
    fn test_missing_shell_is_memoized() {
        let shell = "tclhost-no-such-shell";
        let first = evaluate(shell, DEFAULT_SCRIPT).unwrap_err();
        assert!(first.contains("not found"));
        assert_eq!(evaluate(shell, DEFAULT_SCRIPT).unwrap_err(), first);
    }
}
