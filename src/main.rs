use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use dotenv::dotenv;

use remedy_rs::store::{FileGraphStore, GraphStore};
use remedy_rs::workflow::composer::Composer;
use remedy_rs::workflow::graph::StepGraph;
use remedy_rs::workflow::loader::PolicyLoader;
use remedy_rs::workflow::trace::{trace, ScriptedOutputs, TraceOutcome};
use remedy_rs::workflow::validator::{validate, ValidationOptions};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compose retry chains into a workflow
    Compose {
        /// Path to the workflow JSON
        #[arg(short, long)]
        graph: String,

        /// Path to the policy file (YAML or JSON)
        #[arg(short, long)]
        policy: String,

        /// Where to write the composed workflow; stdout when omitted
        #[arg(short, long)]
        out: Option<String>,
    },
    /// Check a workflow against the structural invariants
    Validate {
        /// Path to the workflow JSON
        #[arg(short, long)]
        graph: String,

        /// Root step to check reachability from (repeatable)
        #[arg(short, long)]
        anchor: Vec<String>,

        /// Do not count guarded retry edges as producers
        #[arg(long)]
        allow_back_edges: bool,
    },
    /// Replay health-check outputs through a workflow
    Trace {
        /// Path to the workflow JSON
        #[arg(short, long)]
        graph: String,

        /// Step to start from
        #[arg(short, long)]
        from: String,

        /// Health-check outputs in order; the last one repeats
        #[arg(short, long, value_delimiter = ',')]
        outputs: Vec<String>,

        /// Maximum number of steps to visit
        #[arg(long, default_value_t = 256)]
        max_hops: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Compose { graph, policy, out } => {
            let def = FileGraphStore::new(&graph)
                .load()
                .await
                .with_context(|| format!("Failed to load workflow {}", graph))?;
            let policies = PolicyLoader::new()
                .load_policies(&policy)
                .with_context(|| format!("Failed to load policies {}", policy))?;

            let composition = Composer::compose(&def, &policies)?;
            for warning in &composition.report.warnings {
                eprintln!("warning: {}", warning);
            }

            match out {
                Some(path) => FileGraphStore::new(path).save(&composition.workflow).await?,
                None => println!("{}", composition.workflow.to_json_pretty()?),
            }
        }
        Commands::Validate {
            graph,
            anchor,
            allow_back_edges,
        } => {
            let def = FileGraphStore::new(&graph).load().await?;
            let report = validate(
                &def,
                &ValidationOptions {
                    roots: anchor,
                    allow_back_edges,
                },
            );

            for warning in &report.warnings {
                eprintln!("warning: {}", warning);
            }
            if !report.is_valid() {
                for violation in &report.violations {
                    eprintln!("error: {}", violation);
                }
                bail!("{} is invalid: {}", graph, report);
            }
            println!("{}: {} steps, valid", graph, def.steps.len());
        }
        Commands::Trace {
            graph,
            from,
            outputs,
            max_hops,
        } => {
            let def = FileGraphStore::new(&graph).load().await?;
            let step_graph = StepGraph::try_from_def(&def)?;
            if step_graph.is_empty() {
                bail!("{} has no steps", graph);
            }
            let mut health = ScriptedOutputs::new(outputs);
            let route = trace(&step_graph, &from, &mut health, max_hops)?;

            for step in &route.visited {
                println!("{}", step);
            }
            match &route.outcome {
                TraceOutcome::Terminal(step) => println!("=> finished at {}", step),
                TraceOutcome::Stalled(step) => println!("=> stalled at {}", step),
                TraceOutcome::HopLimit => println!("=> gave up after {} hops", max_hops),
            }
            if let Some(state) = route.final_decision() {
                println!("{}", serde_json::to_string_pretty(state)?);
            }
        }
    }

    Ok(())
}
