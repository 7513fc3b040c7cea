//! Three-step form wizard. Forward navigation is gated on the current step's
//! fields validating; backward navigation never is.

use crate::form::{FormState, Section, SECTIONS};
use crate::validation::FieldErrors;

pub const STEP_COUNT: usize = SECTIONS.len();

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Moved(usize),
    Completed,
    Blocked(FieldErrors),
}

#[derive(Debug, Clone, Default)]
pub struct Wizard {
    current: usize,
    validated: [bool; STEP_COUNT],
    completed: bool,
}

impl Wizard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn section(&self) -> &'static Section {
        &SECTIONS[self.current]
    }

    pub fn is_first(&self) -> bool {
        self.current == 0
    }

    pub fn is_last(&self) -> bool {
        self.current + 1 == STEP_COUNT
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Percentage of steps validated so far.
    pub fn progress(&self) -> u8 {
        let done = self.validated.iter().filter(|v| **v).count();
        ((done * 100) / STEP_COUNT) as u8
    }

    /// Validate the current step and move forward, or complete on the last step.
    pub fn next(&mut self, form: &FormState) -> Navigation {
        let errors = form.validate_section(self.section());
        if !errors.is_empty() {
            self.validated[self.current] = false;
            return Navigation::Blocked(errors);
        }
        self.validated[self.current] = true;
        if self.is_last() {
            self.completed = true;
            return Navigation::Completed;
        }
        self.current += 1;
        Navigation::Moved(self.current)
    }

    pub fn back(&mut self) -> usize {
        self.current = self.current.saturating_sub(1);
        self.completed = false;
        self.current
    }

    /// Jump to a step; only allowed when every earlier step has been validated.
    pub fn go_to(&mut self, step: usize) -> bool {
        if step >= STEP_COUNT || !self.validated[..step].iter().all(|v| *v) {
            return false;
        }
        self.current = step;
        self.completed = false;
        true
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::tests::sample_fields;

    #[test]
    fn walks_through_all_steps_with_valid_data() {
        let form = FormState::from_fields(sample_fields());
        let mut wizard = Wizard::new();
        assert_eq!(wizard.next(&form), Navigation::Moved(1));
        assert_eq!(wizard.next(&form), Navigation::Moved(2));
        assert_eq!(wizard.next(&form), Navigation::Completed);
        assert!(wizard.is_completed());
        assert_eq!(wizard.progress(), 100);
    }

    #[test]
    fn invalid_step_blocks_forward_navigation() {
        let mut fields = sample_fields();
        fields.insert("age".into(), "12".into());
        let form = FormState::from_fields(fields);
        let mut wizard = Wizard::new();
        match wizard.next(&form) {
            Navigation::Blocked(errors) => assert!(errors.contains_key("age")),
            other => panic!("expected block, got {other:?}"),
        }
        assert_eq!(wizard.current(), 0);
    }

    #[test]
    fn jumping_ahead_requires_validated_predecessors() {
        let form = FormState::from_fields(sample_fields());
        let mut wizard = Wizard::new();
        assert!(!wizard.go_to(2));
        wizard.next(&form);
        assert!(!wizard.go_to(2));
        wizard.next(&form);
        assert!(wizard.go_to(0));
        assert!(wizard.go_to(2));
        assert!(!wizard.go_to(STEP_COUNT));
    }

    #[test]
    fn back_does_not_validate() {
        let mut wizard = Wizard::new();
        assert_eq!(wizard.back(), 0);
        let form = FormState::from_fields(sample_fields());
        wizard.next(&form);
        assert_eq!(wizard.back(), 0);
    }
}
