//! Scheduler job names.

use rand::RngExt;
use tracing::warn;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Random lowercase job name of `width` characters.
///
/// Schedulers truncate names in their listings, so a batch is only
/// recognisable by its first `width` characters.
pub fn random_job_name(width: usize) -> String {
    let mut rng = rand::rng();
    (0..width)
        .map(|_| char::from(LETTERS[rng.random_range(0..LETTERS.len())]))
        .collect()
}

/// Use `requested` when given, otherwise a fresh random name.
pub fn resolve_job_name(requested: Option<&str>, width: usize) -> String {
    match requested {
        Some(name) => {
            if name.chars().count() > width {
                warn!(
                    job_name = name,
                    width,
                    "job name is longer than the scheduler listing width; \
                     batches must be distinguishable by their first {width} characters"
                );
            }
            name.to_string()
        }
        None => random_job_name(width),
    }
}

/// First `width` characters of `name`.
pub fn truncated(name: &str, width: usize) -> &str {
    match name.char_indices().nth(width) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_name_has_requested_width() {
        for width in [0, 8, 10, 40] {
            let name = random_job_name(width);
            assert_eq!(name.len(), width);
            assert!(name.chars().all(|c| c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn random_names_use_the_whole_alphabet() {
        let seen: std::collections::BTreeSet<char> = random_job_name(5000).chars().collect();
        assert_eq!(seen.len(), 26);
    }

    #[test]
    fn random_names_differ() {
        assert_ne!(random_job_name(10), random_job_name(10));
    }

    #[test]
    fn explicit_name_is_kept_even_if_long() {
        assert_eq!(resolve_job_name(Some("render_views_glia"), 10), "render_views_glia");
        assert_eq!(resolve_job_name(None, 8).len(), 8);
    }

    #[test]
    fn truncation() {
        assert_eq!(truncated("render_views", 8), "render_v");
        assert_eq!(truncated("short", 8), "short");
        assert_eq!(truncated("ääääääääää", 3), "äää");
    }
}
