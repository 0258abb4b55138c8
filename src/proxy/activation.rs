//! Boundary to whatever applies a chosen relay to the host system

use crate::proxy::models::Candidate;

/// Outcome reported by an activator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub ok: bool,
    pub message: String,
}

impl Activation {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Applies a relay to the system's network configuration and verifies it
pub trait ProxyActivator {
    fn set_active_proxy(&self, candidate: &Candidate) -> Activation;
}

/// Hand the best candidate to `activator`, if there is one
pub fn activate_best<A: ProxyActivator + ?Sized>(activator: &A, best: Option<&Candidate>) -> Activation {
    let Some(candidate) = best else {
        return Activation::failure("No best proxy available");
    };

    let outcome = activator.set_active_proxy(candidate);
    if outcome.ok {
        tracing::info!(%candidate, message = %outcome.message, "proxy activated");
    } else {
        tracing::warn!(%candidate, message = %outcome.message, "proxy activation failed");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::parser::ProxyParser;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        applied: RefCell<Vec<String>>,
    }

    impl ProxyActivator for Recorder {
        fn set_active_proxy(&self, candidate: &Candidate) -> Activation {
            self.applied.borrow_mut().push(candidate.to_string());
            Activation::success(format!("Proxy set to {}", candidate))
        }
    }

    #[test]
    fn test_no_best_available() {
        let recorder = Recorder::default();
        let outcome = activate_best(&recorder, None);
        assert!(!outcome.ok);
        assert_eq!(outcome.message, "No best proxy available");
        assert!(recorder.applied.borrow().is_empty());
    }

    #[test]
    fn test_delegates_to_activator() {
        let recorder = Recorder::default();
        let best = ProxyParser::normalize("1.2.3.4:8080").unwrap();

        let outcome = activate_best(&recorder, Some(&best));
        assert!(outcome.ok);
        assert_eq!(outcome.message, "Proxy set to 1.2.3.4:8080");
        assert_eq!(*recorder.applied.borrow(), vec!["1.2.3.4:8080".to_string()]);
    }
}
