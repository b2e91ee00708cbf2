//! Small path helpers shared by the transport and credential loaders.

use camino::{Utf8Path, Utf8PathBuf};

/// Replaces a leading `~/` with the value of `HOME`.
///
/// Paths are returned untouched when they do not start with `~/` or when
/// `HOME` is unset.
///
/// # Examples
///
/// ```
/// # use replication::util::expand_tilde;
/// assert_eq!(expand_tilde("/etc/ssh/key"), "/etc/ssh/key");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Resolves `path` against `base` unless it is already absolute.
#[must_use]
pub fn resolve_under(base: &Utf8Path, path: &str) -> Utf8PathBuf {
    let expanded = Utf8PathBuf::from(expand_tilde(path));
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/srv/site", "/abs/events", "/abs/events")]
    #[case("/srv/site", "data/replication", "/srv/site/data/replication")]
    #[case(".", "events", "./events")]
    fn resolve_under_joins_relative_paths(
        #[case] base: &str,
        #[case] path: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(
            resolve_under(Utf8Path::new(base), path),
            Utf8PathBuf::from(expected)
        );
    }

    #[rstest]
    fn expand_tilde_leaves_plain_paths_alone() {
        assert_eq!(expand_tilde("relative/key"), "relative/key");
        assert_eq!(expand_tilde("~user/key"), "~user/key");
    }
}
