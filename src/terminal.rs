//! Line-oriented prompts that drive the form wizard from a terminal.

use std::io::{self, BufRead, Write};

use crate::form::{field_hint, FormState, Section};
use crate::wizard::{Navigation, Wizard, STEP_COUNT};
use crate::ui::annotate_field_errors;

pub const BACK_COMMAND: &str = ":back";
pub const QUIT_COMMAND: &str = ":quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Next,
    Back,
    Quit,
}

/// Ask for each field in `fields`. An empty answer keeps the current value.
pub fn prompt_fields<R: BufRead, W: Write>(
    form: &mut FormState,
    fields: &[&str],
    input: &mut R,
    output: &mut W,
) -> io::Result<Flow> {
    for field in fields {
        let hint = field_hint(field);
        match form.get(field).filter(|v| !v.is_empty()) {
            Some(current) => write!(output, "{hint} [{current}]: ")?,
            None => write!(output, "{hint}: ")?,
        }
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(Flow::Quit);
        }
        match line.trim() {
            "" => {}
            BACK_COMMAND => return Ok(Flow::Back),
            QUIT_COMMAND => return Ok(Flow::Quit),
            answer => form.set(field, answer),
        }
    }
    Ok(Flow::Next)
}

/// Outcome of running the wizard to the end or until the user stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardOutcome {
    Completed,
    Quit,
}

/// Drive `wizard` over `form`, calling `on_step` after every validated step
/// (used to auto-save drafts).
pub fn run_wizard<R: BufRead, W: Write>(
    wizard: &mut Wizard,
    form: &mut FormState,
    input: &mut R,
    output: &mut W,
    mut on_step: impl FnMut(usize, &FormState),
) -> io::Result<WizardOutcome> {
    let mut pending: Option<Vec<&'static str>> = None;
    loop {
        let section: &'static Section = wizard.section();
        if pending.is_none() {
            writeln!(
                output,
                "\n== Step {}/{}: {} ({}% complete) ==",
                wizard.current() + 1,
                STEP_COUNT,
                section.title,
                wizard.progress()
            )?;
        }
        let fields = pending.take().unwrap_or_else(|| section.fields.to_vec());

        match prompt_fields(form, &fields, input, output)? {
            Flow::Quit => return Ok(WizardOutcome::Quit),
            Flow::Back => {
                wizard.back();
                continue;
            }
            Flow::Next => {}
        }

        match wizard.next(form) {
            Navigation::Moved(step) => on_step(step, form),
            Navigation::Completed => {
                on_step(wizard.current(), form);
                return Ok(WizardOutcome::Completed);
            }
            Navigation::Blocked(errors) => {
                writeln!(output, "Please fix the following:")?;
                write!(output, "{}", annotate_field_errors(section.fields, &errors))?;
                pending = Some(
                    section
                        .fields
                        .iter()
                        .copied()
                        .filter(|f| errors.contains_key(*f))
                        .collect(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::SECTIONS;
    use crate::validation::tests::sample_fields;
    use std::io::Cursor;

    #[test]
    fn blank_answers_keep_values_and_commands_stop() {
        let mut form = FormState::from_fields(sample_fields());
        let mut input = Cursor::new("\n17\n:back\n");
        let mut out = Vec::new();
        let flow = prompt_fields(&mut form, &["school", "age", "sex"], &mut input, &mut out).unwrap();
        assert_eq!(flow, Flow::Back);
        assert_eq!(form.get("school"), Some("GP"));
        assert_eq!(form.get("age"), Some("17"));
        assert!(form.is_dirty());
        assert!(String::from_utf8(out).unwrap().contains("Age (15-30) [18]: "));
    }

    #[test]
    fn end_of_input_quits() {
        let mut form = FormState::new();
        let mut input = Cursor::new("");
        let flow = prompt_fields(&mut form, &["age"], &mut input, &mut Vec::new()).unwrap();
        assert_eq!(flow, Flow::Quit);
    }

    #[test]
    fn prefilled_form_completes_and_reports_each_step() {
        let mut form = FormState::from_fields(sample_fields());
        let mut wizard = Wizard::new();
        let answers: String = SECTIONS.iter().map(|s| "\n".repeat(s.fields.len())).collect();
        let mut input = Cursor::new(answers);
        let mut steps = Vec::new();
        let outcome = run_wizard(&mut wizard, &mut form, &mut input, &mut Vec::new(), |step, _| {
            steps.push(step)
        })
        .unwrap();
        assert_eq!(outcome, WizardOutcome::Completed);
        assert_eq!(steps, vec![1, 2, 2]);
    }

    #[test]
    fn invalid_answers_are_asked_again() {
        let mut form = FormState::from_fields(sample_fields());
        let mut wizard = Wizard::new();
        let first = SECTIONS[0].fields;
        let age_index = first.iter().position(|f| *f == "age").unwrap();
        let mut answers: Vec<String> = vec![String::new(); first.len()];
        answers[age_index] = "99".into();
        let mut script = answers.join("\n");
        script.push_str("\n16\n:quit\n");

        let mut out = Vec::new();
        let outcome = run_wizard(&mut wizard, &mut form, &mut Cursor::new(script), &mut out, |_, _| {})
            .unwrap();
        assert_eq!(outcome, WizardOutcome::Quit);
        assert_eq!(form.get("age"), Some("16"));
        assert_eq!(wizard.current(), 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("! Age (15-30): Age must be between 15 and 30"));
    }
}
