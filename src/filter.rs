use std::collections::BTreeMap;

use crate::id::SidelineRequestIdentifier;
use crate::message::Message;

/// A single predicate usable as a step of a sideline request's filter.
///
/// Implementors decide, for a given message, whether it belongs to the diverted subset. Equality
/// is user-overridable because `FilterChain::find_label` must be able to recognise "the same
/// request" by comparing step lists by value, not by pointer identity.
pub trait FilterChainStep: Send + Sync + std::fmt::Debug {
    fn test(&self, message: &Message) -> bool;

    /// Value equality against another step, used by `FilterChain::find_label`.
    fn step_eq(&self, other: &dyn FilterChainStep) -> bool;
}

/// Wraps a step list and inverts its match decision.
///
/// Built by `FilterChain::negated_steps` when a sideline request is stopped: the replay consumer
/// must emit exactly the messages the original steps would have diverted, so the group's
/// combined "any step matches" decision is negated as a whole rather than negating each step.
#[derive(Debug)]
struct NegatedSteps(Vec<Box<dyn FilterChainStep>>);

impl FilterChainStep for NegatedSteps {
    fn test(&self, message: &Message) -> bool {
        !self.0.iter().any(|step| step.test(message))
    }

    fn step_eq(&self, _other: &dyn FilterChainStep) -> bool {
        false
    }
}

fn steps_eq(a: &[Box<dyn FilterChainStep>], b: &[Box<dyn FilterChainStep>]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.step_eq(y.as_ref()))
}

/// Labelled, ordered map from a sideline request identifier to its active filter steps.
///
/// Evaluating a message passes it through every step of every entry; if any step of any entry
/// matches, the message is dropped by the firehose. Iteration order of entries and of each
/// entry's steps is insertion order, since tests assert identity-by-steps.
#[derive(Debug, Default)]
pub struct FilterChain {
    entries: Vec<(SidelineRequestIdentifier, Vec<Box<dyn FilterChainStep>>)>,
}

impl FilterChain {
    pub fn new() -> FilterChain {
        FilterChain {
            entries: Vec::new(),
        }
    }

    /// Registers a new labelled step list. Replaces any previous entry under the same label.
    pub fn add_steps(&mut self, label: SidelineRequestIdentifier, steps: Vec<Box<dyn FilterChainStep>>) {
        self.entries.retain(|(existing, _)| existing != &label);
        self.entries.push((label, steps));
    }

    /// Removes and returns the step list registered under `label`, if any.
    pub fn remove_steps(&mut self, label: &SidelineRequestIdentifier) -> Option<Vec<Box<dyn FilterChainStep>>> {
        let position = self.entries.iter().position(|(existing, _)| existing == label)?;
        Some(self.entries.remove(position).1)
    }

    /// Returns the first label whose registered step list equals `steps` by value.
    pub fn find_label(&self, steps: &[Box<dyn FilterChainStep>]) -> Option<&SidelineRequestIdentifier> {
        self.entries
            .iter()
            .find(|(_, existing)| steps_eq(existing, steps))
            .map(|(label, _)| label)
    }

    /// Evaluates `message` against every entry. Returns `true` when the message should be
    /// dropped by the firehose.
    pub fn test(&self, message: &Message) -> bool {
        self.entries
            .iter()
            .any(|(_, steps)| steps.iter().any(|step| step.test(message)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Wraps `steps` so the resulting single-step list matches exactly the messages the original
/// steps would have dropped, as required to build a replay consumer's filter at sideline stop.
pub fn negated_steps(steps: Vec<Box<dyn FilterChainStep>>) -> Vec<Box<dyn FilterChainStep>> {
    vec![Box::new(NegatedSteps(steps))]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct AlwaysMatch;
    impl FilterChainStep for AlwaysMatch {
        fn test(&self, _message: &Message) -> bool {
            true
        }
        fn step_eq(&self, other: &dyn FilterChainStep) -> bool {
            format!("{:?}", self) == format!("{:?}", other)
        }
    }

    #[derive(Debug, PartialEq, Eq)]
    struct NeverMatch;
    impl FilterChainStep for NeverMatch {
        fn test(&self, _message: &Message) -> bool {
            false
        }
        fn step_eq(&self, other: &dyn FilterChainStep) -> bool {
            format!("{:?}", self) == format!("{:?}", other)
        }
    }

    fn sample_message() -> Message {
        use crate::id::VirtualConsumerId;
        use crate::message::MessageId;
        Message::new(
            MessageId::new("t".into(), 0, 1, VirtualConsumerId::firehose("p")),
            vec![],
        )
    }

    #[test]
    fn empty_chain_never_drops() {
        let chain = FilterChain::new();
        assert!(!chain.test(&sample_message()));
    }

    #[test]
    fn any_matching_step_drops() {
        let mut chain = FilterChain::new();
        let label = crate::id::SidelineRequestIdentifier::from(String::from("r1"));
        chain.add_steps(label, vec![Box::new(NeverMatch), Box::new(AlwaysMatch)]);
        assert!(chain.test(&sample_message()));
    }

    #[test]
    fn find_label_matches_by_value() {
        let mut chain = FilterChain::new();
        let label = crate::id::SidelineRequestIdentifier::from(String::from("r1"));
        chain.add_steps(label.clone(), vec![Box::new(AlwaysMatch)]);
        let found = chain.find_label(&[Box::new(AlwaysMatch)]);
        assert_eq!(found, Some(&label));
    }

    #[test]
    fn remove_steps_drops_entry() {
        let mut chain = FilterChain::new();
        let label = crate::id::SidelineRequestIdentifier::from(String::from("r1"));
        chain.add_steps(label.clone(), vec![Box::new(AlwaysMatch)]);
        let removed = chain.remove_steps(&label);
        assert!(removed.is_some());
        assert!(!chain.test(&sample_message()));
    }

    #[test]
    fn negated_steps_inverts_decision() {
        let negated = negated_steps(vec![Box::new(AlwaysMatch)]);
        let mut chain = FilterChain::new();
        chain.add_steps(crate::id::SidelineRequestIdentifier::from(String::from("r1")), negated);
        assert!(!chain.test(&sample_message()));
    }
}
