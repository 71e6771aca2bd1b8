//! Security Descriptors
//!
//! Every value crossing an executable boundary, pipeline stage, or field
//! access carries a descriptor: a set of labels, a taint level, and the list
//! of sources it was derived from. Merging is monotonic — labels and sources
//! union, taint takes the maximum of the lattice `clean < unknown < tainted`.

use std::collections::BTreeSet;

/// Taint lattice. Ordering of the variants is the lattice ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Taint {
    #[default]
    Clean,
    Unknown,
    Tainted,
}

impl Taint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Taint::Clean => "clean",
            Taint::Unknown => "unknown",
            Taint::Tainted => "tainted",
        }
    }
}

/// Provenance and policy metadata attached to a value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SecurityDescriptor {
    pub labels: BTreeSet<String>,
    pub taint: Taint,
    /// Source identifiers (file paths, URLs, executable names), in first-seen order
    pub sources: Vec<String>,
    pub policy_context: Option<String>,
}

impl SecurityDescriptor {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn tainted(source: impl Into<String>) -> Self {
        Self {
            taint: Taint::Tainted,
            sources: vec![source.into()],
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        let source = source.into();
        if !self.sources.contains(&source) {
            self.sources.push(source);
        }
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// Monotonic merge: union labels and sources, max taint, leftmost policy.
    pub fn merge(&self, other: &SecurityDescriptor) -> SecurityDescriptor {
        let mut labels = self.labels.clone();
        labels.extend(other.labels.iter().cloned());

        let mut sources = self.sources.clone();
        for s in &other.sources {
            if !sources.contains(s) {
                sources.push(s.clone());
            }
        }

        SecurityDescriptor {
            labels,
            taint: self.taint.max(other.taint),
            sources,
            policy_context: self
                .policy_context
                .clone()
                .or_else(|| other.policy_context.clone()),
        }
    }

    /// Fold a sequence of descriptors into one.
    pub fn merge_all<'a>(descriptors: impl IntoIterator<Item = &'a SecurityDescriptor>) -> Self {
        descriptors
            .into_iter()
            .fold(SecurityDescriptor::clean(), |acc, d| acc.merge(d))
    }

    /// True when `self` carries at least everything `other` does.
    pub fn covers(&self, other: &SecurityDescriptor) -> bool {
        self.taint >= other.taint
            && other.labels.is_subset(&self.labels)
            && other.sources.iter().all(|s| self.sources.contains(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taint_lattice_order() {
        assert!(Taint::Clean < Taint::Unknown);
        assert!(Taint::Unknown < Taint::Tainted);
        assert_eq!(Taint::Clean.max(Taint::Tainted), Taint::Tainted);
    }

    #[test]
    fn test_merge_unions_labels_and_sources() {
        let a = SecurityDescriptor::clean()
            .with_label("secret")
            .with_source("a.mld");
        let b = SecurityDescriptor::tainted("https://x.test").with_label("net");
        let merged = a.merge(&b);
        assert!(merged.has_label("secret"));
        assert!(merged.has_label("net"));
        assert_eq!(merged.taint, Taint::Tainted);
        assert_eq!(merged.sources, vec!["a.mld".to_string(), "https://x.test".to_string()]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let a = SecurityDescriptor::tainted("s").with_label("l");
        assert_eq!(a.merge(&a), a);
    }

    #[test]
    fn test_merge_is_associative() {
        let a = SecurityDescriptor::clean().with_label("a");
        let b = SecurityDescriptor::tainted("b");
        let c = SecurityDescriptor::clean().with_source("c").with_label("c");
        assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
    }

    #[test]
    fn test_policy_context_leftmost_wins() {
        let mut a = SecurityDescriptor::clean();
        a.policy_context = Some("strict".into());
        let mut b = SecurityDescriptor::clean();
        b.policy_context = Some("lax".into());
        assert_eq!(a.merge(&b).policy_context.as_deref(), Some("strict"));
        assert_eq!(b.merge(&a).policy_context.as_deref(), Some("lax"));
    }

    #[test]
    fn test_covers_reflects_merge() {
        let a = SecurityDescriptor::clean().with_label("x").with_source("s1");
        let b = SecurityDescriptor::tainted("s2");
        let merged = a.merge(&b);
        assert!(merged.covers(&a));
        assert!(merged.covers(&b));
        assert!(!a.covers(&merged));
    }
}
