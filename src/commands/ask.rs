//! Ask a question through the agent loop

use std::io::Write;

use anyhow::{Context, Result};

use crate::agents::{AgentAnswer, AgentEvent, AskOptions};
use crate::system::RagSystem;

pub struct AskArgs {
    pub stream: bool,
    pub json: bool,
    pub options: AskOptions,
}

pub async fn run(system: &RagSystem, query: &str, args: AskArgs) -> Result<()> {
    let answer = if args.stream {
        stream(system, query, &args).await?
    } else {
        let answer = system.ask(query, args.options).await;
        if !args.json {
            println!("{}", answer.answer);
        }
        answer
    };

    if args.json {
        let json = serde_json::to_string_pretty(&answer).context("Failed to encode answer")?;
        println!("{}", json);
    } else {
        print_footer(&answer);
    }
    Ok(())
}

async fn stream(system: &RagSystem, query: &str, args: &AskArgs) -> Result<AgentAnswer> {
    let mut events = system.ask_stream(query, args.options);
    let mut stdout = std::io::stdout();
    let mut answer = None;

    while let Some(event) = events.recv().await {
        if args.json {
            if let AgentEvent::SynthesisCompleted { answer: done } = event {
                answer = Some(done);
            }
            continue;
        }
        match event {
            AgentEvent::StrategyChosen {
                iteration,
                strategy,
            } => eprintln!("· iteration {}: {}", iteration, strategy),
            AgentEvent::SearchCompleted {
                hits,
                relevance_score,
                confidence,
                ..
            } => eprintln!(
                "  {} hits, relevance {:.2}, confidence {:.2}",
                hits, relevance_score, confidence
            ),
            AgentEvent::EvaluationDecided { decision, .. } => eprintln!("  → {}", decision),
            AgentEvent::QueryRewritten { query, .. } => eprintln!("  rewritten: {}", query),
            AgentEvent::AnswerDelta { text } => {
                print!("{}", text);
                stdout.flush().ok();
            }
            AgentEvent::SynthesisCompleted { answer: done } => {
                println!();
                answer = Some(done);
            }
            AgentEvent::IterationStarted { .. } | AgentEvent::SynthesisStarted { .. } => {}
        }
    }

    answer.context("Answer stream ended without a result")
}

fn print_footer(answer: &AgentAnswer) {
    let meta = &answer.metadata;
    if !answer.citations.is_empty() {
        println!("\nSources: {}", answer.citations.join(", "));
    }
    println!(
        "[{} | {} iterations | confidence {:.2} | search {} ms]",
        meta.terminal_decision, meta.total_iterations, meta.mean_confidence, meta.search_latency_ms
    );
}
