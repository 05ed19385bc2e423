//! Manipulation of free-form scheduler flag strings.
//!
//! Flags are split into arguments with POSIX shell quoting rules (single
//! quotes, double quotes, backslash escapes), so `--comment="a b"` stays one
//! argument. Variable expansion and globbing are not performed.

use std::sync::LazyLock;

use regex::Regex;

use crate::materialize::shell_quote;

static MEM_FLAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)--mem=").expect("static regex"));

const MEM_PREFIX: &str = "--mem=";
const CPUS_PREFIX: &str = "--cpus-per-task=";

/// Memory request that asks Slurm for the whole node.
pub const WHOLE_NODE_MEM: &str = "--mem=0";

/// Whether `flags` already carries an explicit `--mem=` request.
pub fn has_memory_flag(flags: &str) -> bool {
    MEM_FLAG.is_match(flags)
}

/// Whether `flags` already carries a time limit.
pub fn has_time_flag(flags: &str) -> bool {
    split_flags(flags)
        .iter()
        .any(|f| f == "-t" || f.starts_with("--time"))
}

/// Rewrite the grid engine `-V` (export environment) into its Slurm form.
///
/// Returns the rewritten flags and whether anything changed.
pub fn normalize_for_slurm(flags: &str) -> (String, bool) {
    let mut changed = false;
    let args: Vec<String> = split_flags(flags)
        .into_iter()
        .map(|f| {
            if f == "-V" {
                changed = true;
                "--export=ALL".to_string()
            } else {
                f
            }
        })
        .collect();
    (join_flags(&args), changed)
}

/// Drop per-job memory and cpu requests so the next round can size them
/// again; with `whole_node` the memory request is pinned to the full node.
pub fn escalated_flags(flags: &str, whole_node: bool) -> String {
    let mut args: Vec<String> = split_flags(flags)
        .into_iter()
        .filter(|f| !f.starts_with(MEM_PREFIX) && !f.starts_with(CPUS_PREFIX))
        .collect();
    if whole_node {
        args.push(WHOLE_NODE_MEM.to_string());
    }
    join_flags(&args)
}

/// Split a flag string into command-line arguments.
///
/// An unterminated quote extends to the end of the string.
pub fn split_flags(flags: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = flags.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        args.push(current);
    }
    args
}

/// Inverse of [`split_flags`].
pub fn join_flags(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_memory_flag() {
        assert!(has_memory_flag("--partition=p --mem=4000M"));
        assert!(has_memory_flag("--mem=0"));
        assert!(!has_memory_flag("--partition=p"));
        assert!(!has_memory_flag("--mem-per-cpu=100"));
        assert!(!has_memory_flag("--comment=x--mem=1"));
    }

    #[test]
    fn detects_time_flag() {
        assert!(has_time_flag("--time=1-00"));
        assert!(has_time_flag("-t 10"));
        assert!(!has_time_flag("--partition=p"));
        assert!(!has_time_flag("--comment='-t'x"));
    }

    #[test]
    fn dash_v_becomes_export_all() {
        assert_eq!(
            normalize_for_slurm("-V --partition=p"),
            ("--export=ALL --partition=p".to_string(), true)
        );
        assert_eq!(
            normalize_for_slurm("--partition=p"),
            ("--partition=p".to_string(), false)
        );
    }

    #[test]
    fn escalation_strips_sizing_flags() {
        assert_eq!(
            escalated_flags("--mem=4000M --partition=p --cpus-per-task=2", false),
            "--partition=p"
        );
    }

    #[test]
    fn escalation_to_whole_node_pins_memory() {
        assert_eq!(escalated_flags("--mem=4000M --partition=p", true), "--partition=p --mem=0");
        assert_eq!(escalated_flags("", true), "--mem=0");
    }

    #[test]
    fn split_ignores_extra_whitespace() {
        assert_eq!(split_flags("  -l h_vmem=4G   -V "), vec!["-l", "h_vmem=4G", "-V"]);
        assert!(split_flags("").is_empty());
    }

    #[test]
    fn split_honours_quotes_and_escapes() {
        assert_eq!(
            split_flags(r#"--comment="a b" -N 'x  y' c\ d"#),
            vec!["--comment=a b", "-N", "x  y", "c d"]
        );
        assert_eq!(split_flags(r#"--comment="say \"hi\"""#), vec![r#"--comment=say "hi""#]);
        assert_eq!(split_flags("''"), vec![""]);
        assert_eq!(split_flags("'open ended"), vec!["open ended"]);
    }

    #[test]
    fn quoted_values_survive_rewrites() {
        let (slurm, _) = normalize_for_slurm(r#"--comment="a  b" -V"#);
        assert_eq!(split_flags(&slurm), vec!["--comment=a  b", "--export=ALL"]);

        let next = escalated_flags(r#"--mem=10G --comment="a b""#, true);
        assert_eq!(split_flags(&next), vec!["--comment=a b", "--mem=0"]);
    }
}
