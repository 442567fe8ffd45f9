// CCP decision tree as a state machine.
//
// The operator answers a fixed sequence of yes/no questions for a hazard at a
// process step. Each (question, answer) pair maps to the next state through a
// static table; terminal states carry the control outcome.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LineageError;

use super::ControlStrategy;

/// Questions of the decision tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Question {
    /// Q1: do control measures exist for the hazard?
    ControlMeasuresExist,
    /// Q1a: is control at this step necessary for safety?
    ControlNecessary,
    /// Q2: is the step designed to eliminate or reduce the hazard to an acceptable level?
    StepEliminatesHazard,
    /// Q3: could contamination occur or increase to unacceptable levels?
    ContaminationPossible,
    /// Q4: will a later step eliminate or reduce the hazard to an acceptable level?
    LaterStepEliminates,
}

impl Question {
    pub fn code(self) -> &'static str {
        match self {
            Self::ControlMeasuresExist => "Q1",
            Self::ControlNecessary => "Q1a",
            Self::StepEliminatesHazard => "Q2",
            Self::ContaminationPossible => "Q3",
            Self::LaterStepEliminates => "Q4",
        }
    }

    pub fn prompt(self) -> &'static str {
        match self {
            Self::ControlMeasuresExist => "Do preventive control measures exist for this hazard?",
            Self::ControlNecessary => "Is control at this step necessary for safety?",
            Self::StepEliminatesHazard => {
                "Is the step specifically designed to eliminate or reduce the hazard to an acceptable level?"
            }
            Self::ContaminationPossible => {
                "Could contamination occur at, or increase to, unacceptable levels?"
            }
            Self::LaterStepEliminates => {
                "Will a subsequent step eliminate or reduce the hazard to an acceptable level?"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Answer {
    Yes,
    No,
}

impl FromStr for Answer {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "y" | "yes" | "true" => Ok(Self::Yes),
            "n" | "no" | "false" => Ok(Self::No),
            other => Err(LineageError::invalid(format!("unknown answer '{other}'"))),
        }
    }
}

/// Terminal results of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionOutcome {
    /// The step is a critical control point.
    Ccp,
    /// Controlled by an operational prerequisite programme at a later step.
    Oprp,
    /// Not a CCP; existing prerequisite programmes cover the hazard.
    ExistingPrp,
    /// No control exists but one is needed: modify the step, process or product.
    ModifyProcess,
}

impl DecisionOutcome {
    /// Control strategy implied by the outcome. `ModifyProcess` has none until
    /// the process is changed and the tree is run again.
    pub fn strategy(self) -> Option<ControlStrategy> {
        match self {
            Self::Ccp => Some(ControlStrategy::Ccp),
            Self::Oprp => Some(ControlStrategy::Oprp),
            Self::ExistingPrp => Some(ControlStrategy::Prp),
            Self::ModifyProcess => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "kebab-case")]
pub enum DecisionState {
    Asking(Question),
    Decided(DecisionOutcome),
}

use Answer::{No, Yes};
use DecisionOutcome::{Ccp, ExistingPrp, ModifyProcess, Oprp};
use DecisionState::{Asking, Decided};
use Question::{
    ContaminationPossible, ControlMeasuresExist, ControlNecessary, LaterStepEliminates,
    StepEliminatesHazard,
};

/// Transition table. The match is exhaustive, so every question has an exit
/// for both answers.
fn next_state(question: Question, answer: Answer) -> DecisionState {
    match (question, answer) {
        (ControlMeasuresExist, Yes) => Asking(StepEliminatesHazard),
        (ControlMeasuresExist, No) => Asking(ControlNecessary),
        (ControlNecessary, Yes) => Decided(ModifyProcess),
        (ControlNecessary, No) => Decided(ExistingPrp),
        (StepEliminatesHazard, Yes) => Decided(Ccp),
        (StepEliminatesHazard, No) => Asking(ContaminationPossible),
        (ContaminationPossible, Yes) => Asking(LaterStepEliminates),
        (ContaminationPossible, No) => Decided(ExistingPrp),
        (LaterStepEliminates, Yes) => Decided(Oprp),
        (LaterStepEliminates, No) => Decided(Ccp),
    }
}

/// One pass through the tree, with the answers given so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionTree {
    state: DecisionState,
    history: Vec<(Question, Answer)>,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionTree {
    pub fn new() -> Self {
        Self {
            state: Asking(ControlMeasuresExist),
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> DecisionState {
        self.state
    }

    pub fn history(&self) -> &[(Question, Answer)] {
        &self.history
    }

    /// The question awaiting an answer, if not yet decided.
    pub fn current_question(&self) -> Option<Question> {
        match self.state {
            Asking(q) => Some(q),
            Decided(_) => None,
        }
    }

    pub fn outcome(&self) -> Option<DecisionOutcome> {
        match self.state {
            Asking(_) => None,
            Decided(o) => Some(o),
        }
    }

    /// Answer the current question. Fails once an outcome has been reached.
    pub fn answer(&mut self, answer: Answer) -> crate::error::Result<DecisionState> {
        let Asking(question) = self.state else {
            return Err(LineageError::invalid(
                "decision tree already reached an outcome",
            ));
        };
        self.history.push((question, answer));
        self.state = next_state(question, answer);
        Ok(self.state)
    }

    /// Run a complete answer sequence. The sequence must end exactly at an outcome.
    pub fn run(answers: impl IntoIterator<Item = Answer>) -> crate::error::Result<DecisionOutcome> {
        let mut tree = Self::new();
        for answer in answers {
            tree.answer(answer)?;
        }
        tree.outcome().ok_or_else(|| {
            LineageError::invalid(format!(
                "decision tree incomplete: {} unanswered",
                tree.current_question().map_or("?", Question::code)
            ))
        })
    }
}
