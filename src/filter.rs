//! Selection of the projects covered by a push round.

/// Projects a push round replicates.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum ReplicationFilter {
    /// Every project.
    #[default]
    All,
    /// Only the named projects.
    Projects(Vec<String>),
}

impl ReplicationFilter {
    /// Restricts a round to `projects`.
    #[must_use]
    pub fn projects<I, S>(projects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Projects(projects.into_iter().map(Into::into).collect())
    }

    /// Reports whether `project` is part of the round.
    #[must_use]
    pub fn matches(&self, project: &str) -> bool {
        match self {
            Self::All => true,
            Self::Projects(names) => names.iter().any(|name| name == project),
        }
    }
}
