use std::collections::BTreeSet;

/// Options the caller turned on or off for one resolution.
///
/// Disabling wins over enabling and over a declared default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    enabled: BTreeSet<String>,
    disabled: BTreeSet<String>,
    head: bool,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disable(mut self, name: impl Into<String>) -> Self {
        self.disabled.insert(name.into());
        self
    }

    /// Build from the HEAD source instead of the stable release.
    pub fn head(mut self, head: bool) -> Self {
        self.head = head;
        self
    }

    pub fn enabled(&self) -> impl Iterator<Item = &str> {
        self.enabled.iter().map(String::as_str)
    }

    pub fn disabled(&self) -> impl Iterator<Item = &str> {
        self.disabled.iter().map(String::as_str)
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.contains(name)
    }

    pub fn is_head(&self) -> bool {
        self.head
    }
}

impl<S: Into<String>> FromIterator<S> for Selection {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Selection {
            enabled: iter.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}
