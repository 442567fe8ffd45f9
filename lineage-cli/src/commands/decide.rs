use anyhow::Context;
use clap::Args;

use lineage_core::risk::decision_tree::{Answer, DecisionOutcome, DecisionTree};

#[derive(Args, Debug)]
pub struct DecideArgs {
    /// Answers in order (yes/no, y/n)
    #[arg(required = true, num_args = 1..)]
    pub answers: Vec<String>,

    /// Output format: text or json
    #[arg(long, default_value = "text")]
    pub format: String,
}

pub fn run(args: &DecideArgs) -> anyhow::Result<()> {
    let answers = args
        .answers
        .iter()
        .map(|a| a.parse::<Answer>())
        .collect::<Result<Vec<_>, _>>()?;

    let mut tree = DecisionTree::new();
    for answer in answers {
        tree.answer(answer)
            .with_context(|| format!("Cannot apply {} answers", args.answers.len()))?;
    }

    match args.format.as_str() {
        "json" => {
            let value = serde_json::json!({
                "history": tree.history(),
                "state": tree.state(),
                "strategy": tree.outcome().and_then(DecisionOutcome::strategy),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        _ => {
            for (question, answer) in tree.history() {
                println!("{} {} {answer:?}", question.code(), question.prompt());
            }
            match (tree.outcome(), tree.current_question()) {
                (Some(outcome), _) => {
                    let strategy = outcome.strategy().map_or_else(
                        || "none until the process is modified".to_string(),
                        |s| s.to_string(),
                    );
                    println!("Outcome: {outcome:?} (control: {strategy})");
                }
                (None, Some(q)) => println!("Next: {} {}", q.code(), q.prompt()),
                (None, None) => {}
            }
        }
    }
    Ok(())
}
