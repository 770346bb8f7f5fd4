//! Task router — maps a subtask's agent hint to a registered profile

use tracing::debug;

use super::profile::DelegationStrategy;
use super::registry::Persona;

/// How a hint was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    ExactName,
    Description,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub agent: String,
    pub kind: RouteKind,
}

/// Resolves agent hints against a manager's delegates.
///
/// `candidates` are the manager's available agents that are currently
/// registered, in declaration order. `fallback` must only be passed when it
/// is itself registered.
pub struct TaskRouter<'a> {
    candidates: &'a [Persona],
    strategy: DelegationStrategy,
    fallback: Option<&'a str>,
}

impl<'a> TaskRouter<'a> {
    pub fn new(
        candidates: &'a [Persona],
        strategy: DelegationStrategy,
        fallback: Option<&'a str>,
    ) -> Self {
        Self {
            candidates,
            strategy,
            fallback,
        }
    }

    pub fn resolve(&self, hint: &str) -> Option<Route> {
        let hint = hint.trim();
        let route = self.match_candidate(hint).or_else(|| {
            self.fallback.map(|f| Route {
                agent: f.to_string(),
                kind: RouteKind::Fallback,
            })
        });
        debug!(
            "TaskRouter: '{}' ({}) -> {:?}",
            hint, self.strategy, route
        );
        route
    }

    fn match_candidate(&self, hint: &str) -> Option<Route> {
        if hint.is_empty() {
            return None;
        }

        if let Some(exact) = self.candidates.iter().find(|c| c.name == hint) {
            return Some(Route {
                agent: exact.name.clone(),
                kind: RouteKind::ExactName,
            });
        }

        if self.strategy == DelegationStrategy::Specified {
            return None;
        }

        let needle = hint.to_lowercase();
        self.candidates
            .iter()
            .find(|c| c.description.to_lowercase().contains(&needle))
            .map(|c| Route {
                agent: c.name.clone(),
                kind: RouteKind::Description,
            })
    }
}
