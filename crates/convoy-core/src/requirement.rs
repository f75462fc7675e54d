//! Requirement/capability matching between jobs and execution candidates.

use serde::{Deserialize, Serialize};

/// What a requirement demands of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    /// A binary that must be present on the worker.
    Binary,
    /// The worker model, matched by exact name.
    Model,
    /// A specific hostname.
    Hostname,
    /// Access to a network endpoint.
    Network,
    /// Minimum memory, in megabytes.
    Memory,
}

/// A typed capability demand carried by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    pub kind: RequirementKind,
    pub value: String,
}

impl Requirement {
    pub fn binary(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            value: name.clone(),
            name,
            kind: RequirementKind::Binary,
        }
    }

    pub fn model(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            value: name.clone(),
            name,
            kind: RequirementKind::Model,
        }
    }

    pub fn hostname(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            value: name.clone(),
            name,
            kind: RequirementKind::Hostname,
        }
    }
}

/// A capability a worker or backend declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub kind: RequirementKind,
    pub value: String,
}

impl Capability {
    pub fn binary(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            value: name.clone(),
            name,
            kind: RequirementKind::Binary,
        }
    }
}

/// A candidate's declared model plus capability list, the offer side of the
/// match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub model: String,
    pub capabilities: Vec<Capability>,
}

impl CapabilityProfile {
    pub fn new(model: impl Into<String>, capabilities: Vec<Capability>) -> Self {
        Self {
            model: model.into(),
            capabilities,
        }
    }

    /// A single requirement matches if its predicate is true against this
    /// profile. Model requirements are exact-string matches against the
    /// declared model; binary requirements test presence by name; the rest
    /// match on kind, name, and value.
    pub fn satisfies(&self, req: &Requirement) -> bool {
        match req.kind {
            RequirementKind::Model => self.model == req.value,
            RequirementKind::Binary => self
                .capabilities
                .iter()
                .any(|c| c.kind == RequirementKind::Binary && c.name == req.name),
            _ => self
                .capabilities
                .iter()
                .any(|c| c.kind == req.kind && c.name == req.name && c.value == req.value),
        }
    }

    /// A job matches iff all of its requirements match. Conjunction, no
    /// partial credit.
    pub fn satisfies_all(&self, requirements: &[Requirement]) -> bool {
        requirements.iter().all(|r| self.satisfies(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> CapabilityProfile {
        CapabilityProfile::new(
            "debian-12",
            vec![Capability::binary("git"), Capability::binary("docker")],
        )
    }

    #[test]
    fn binary_requirement_tests_presence() {
        let p = profile();
        assert!(p.satisfies(&Requirement::binary("git")));
        assert!(!p.satisfies(&Requirement::binary("cargo")));
    }

    #[test]
    fn model_requirement_is_exact_match() {
        let p = profile();
        assert!(p.satisfies(&Requirement::model("debian-12")));
        assert!(!p.satisfies(&Requirement::model("debian")));
        assert!(!p.satisfies(&Requirement::model("debian-12-slim")));
    }

    #[test]
    fn all_requirements_must_hold() {
        let p = profile();
        let reqs = vec![Requirement::binary("git"), Requirement::model("debian-12")];
        assert!(p.satisfies_all(&reqs));

        let reqs = vec![Requirement::binary("git"), Requirement::binary("cargo")];
        assert!(!p.satisfies_all(&reqs), "one miss fails the whole set");
    }

    #[test]
    fn empty_requirement_set_matches_anything() {
        assert!(CapabilityProfile::default().satisfies_all(&[]));
    }
}
