//! A linear, fail-fast pipeline of named steps.
//!
//! Every step receives the fixed inputs of the run plus the output of the step
//! before it, and returns the output handed to the next one. The fixed inputs
//! and the carried outputs are separate types, so a step can never shadow an
//! input with an output of the same name.

use std::time::Duration;

use async_trait::async_trait;
use colored::Colorize;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
  Pending,
  Running,
  Done,
  Failed
}

/// The work a step performs.
///
/// `previous` is the output of the preceding step (`O::default()` for the
/// first). The returned value replaces it entirely.
#[async_trait]
pub trait Operation<I, O>: Send + Sync {
  async fn run(&self, inputs: &I, previous: O) -> Result<O>;
}

/// Observes step transitions, e.g. to draw progress.
pub trait Reporter: Send + Sync {
  fn transition(&self, name: &str, state: StepState);

  /// Called once per run, after the last step that ran.
  fn finished(&self, _succeeded: bool) {}
}

/// Reports transitions through `log` only.
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
  fn transition(&self, name: &str, state: StepState) {
    match state {
      StepState::Failed => log::error!("Step '{name}' failed"),
      state => log::debug!("Step '{name}': {state:?}")
    }
  }

  fn finished(&self, succeeded: bool) {
    if succeeded {
      log::info!("Analysis finished.");
    }
  }
}

/// Draws a spinner for the running step and a check mark per finished step.
pub struct ProgressReporter {
  bar: ProgressBar
}

impl ProgressReporter {
  pub fn new() -> Result<Self> {
    let style = ProgressStyle::default_spinner()
      .tick_strings(&["-", "\\", "|", "/", "-"])
      .template("{spinner:.yellow} {msg}")
      .map_err(anyhow::Error::from)?;

    let bar = ProgressBar::new_spinner();
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(Self { bar })
  }
}

impl Reporter for ProgressReporter {
  fn transition(&self, name: &str, state: StepState) {
    match state {
      StepState::Pending => {},
      StepState::Running => self.bar.set_message(name.yellow().to_string()),
      StepState::Done => self.bar.println(format!("{} {}", "[✔]".bold().green(), name.bold().green())),
      StepState::Failed => {
        self.bar.println(format!("{} {}", "[✘]".bold().red(), name.bold().red()));
        log::error!("Step '{name}' failed");
      }
    }
  }

  fn finished(&self, succeeded: bool) {
    if succeeded {
      self.bar.println(format!("{} {}", Emoji("✅", ""), "Analysis finished.".bold()));
    }
    self.bar.finish_and_clear();
  }
}

impl Drop for ProgressReporter {
  fn drop(&mut self) {
    if !self.bar.is_finished() {
      self.bar.abandon();
    }
  }
}

pub struct Step<I, O> {
  name:      String,
  state:     StepState,
  operation: Box<dyn Operation<I, O>>
}

impl<I, O> Step<I, O> {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn state(&self) -> StepState {
    self.state
  }
}

pub struct Workflow<I, O> {
  steps:    Vec<Step<I, O>>,
  reporter: Box<dyn Reporter>
}

impl<I, O: Default> Workflow<I, O> {
  pub fn new(reporter: Box<dyn Reporter>) -> Self {
    Self { steps: Vec::new(), reporter }
  }

  /// Appends a step. Steps run in the order they are added.
  pub fn step(mut self, name: impl Into<String>, operation: impl Operation<I, O> + 'static) -> Self {
    self.steps.push(Step {
      name:      name.into(),
      state:     StepState::Pending,
      operation: Box::new(operation)
    });
    self
  }

  pub fn steps(&self) -> &[Step<I, O>] {
    &self.steps
  }

  pub fn states(&self) -> Vec<StepState> {
    self.steps.iter().map(Step::state).collect()
  }

  /// Runs every step in order and returns the last step's output.
  ///
  /// The first failing step is marked [`StepState::Failed`] and its error is
  /// returned unchanged; the steps after it stay [`StepState::Pending`].
  pub async fn run(&mut self, inputs: &I) -> Result<O> {
    for step in &mut self.steps {
      step.state = StepState::Pending;
      self.reporter.transition(&step.name, StepState::Pending);
    }

    let mut carried = O::default();
    for step in &mut self.steps {
      step.state = StepState::Running;
      self.reporter.transition(&step.name, StepState::Running);

      match step.operation.run(inputs, carried).await {
        Ok(output) => {
          carried = output;
          step.state = StepState::Done;
          self.reporter.transition(&step.name, StepState::Done);
        },
        Err(err) => {
          step.state = StepState::Failed;
          self.reporter.transition(&step.name, StepState::Failed);
          self.reporter.finished(false);
          return Err(err);
        }
      }
    }

    self.reporter.finished(true);
    Ok(carried)
  }
}
