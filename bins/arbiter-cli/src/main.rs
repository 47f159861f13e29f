mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "arbiter-cli")]
#[command(about = "Arbiter CLI - Load problems, submit solutions and inspect grading", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a problem definition (JSON) into storage
    AddProblem {
        /// Path to the problem file
        file: PathBuf,
    },

    /// Submit source files for grading
    Submit {
        /// Problem to grade against
        #[arg(short, long)]
        problem: Uuid,

        /// Language name (e.g., cpp, python)
        #[arg(short, long)]
        language: String,

        /// Source files; stored under their base names
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show a solution's state, grade and verdicts
    Status {
        solution_id: Uuid,
    },

    /// Queue a fresh grading pass for a solution
    Regrade {
        solution_id: Uuid,
    },

    /// List configured languages
    Languages {
        /// Languages file (defaults to ARBITER_LANGUAGES)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::AddProblem { file } => {
            commands::add_problem(&file).await?;
        }
        Commands::Submit {
            problem,
            language,
            files,
        } => {
            commands::submit(problem, &language, &files).await?;
        }
        Commands::Status { solution_id } => {
            commands::status(solution_id).await?;
        }
        Commands::Regrade { solution_id } => {
            commands::regrade(solution_id).await?;
        }
        Commands::Languages { config } => {
            commands::list_languages(config.as_deref())?;
        }
    }

    Ok(())
}
