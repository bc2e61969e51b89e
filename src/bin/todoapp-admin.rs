//! Ad-hoc deletions against the TodoApp document store.
//!
//! ```text
//! todoapp-admin delete-many --collection todos --filter '{"text": "Eat lunch"}'
//! todoapp-admin find-one-and-delete --collection todos --filter '{"completed": false}'
//! todoapp-admin delete-by-id --collection users 5c8283ff-dc78-440b-8531-49e5c0000000
//! ```

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::process::ExitCode;

use todoapp::store::{
    by_id, to_document, validate_identifier, Document, DocumentStore, PgDocumentStore, StoreError,
};

#[derive(Parser)]
#[command(name = "todoapp-admin", about = "Ad-hoc deletions against the TodoApp database")]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Delete every document matching the filter
    DeleteMany(FilterArgs),
    /// Delete the first document matching the filter
    DeleteOne(FilterArgs),
    /// Delete the first document matching the filter and print it
    FindOneAndDelete(FilterArgs),
    /// Delete a document by its id and print it
    DeleteById {
        #[arg(long)]
        collection: String,
        id: String,
    },
}

#[derive(clap::Args)]
struct FilterArgs {
    #[arg(long)]
    collection: String,
    /// JSON object matched by containment, e.g. '{"completed": false}'
    #[arg(long)]
    filter: String,
}

impl FilterArgs {
    fn parse(&self) -> Result<Document, StoreError> {
        validate_identifier(&self.collection)?;
        let value: Value = serde_json::from_str(&self.filter)?;
        to_document(&value)
    }
}

fn print_deleted(document: Option<Document>) -> Result<(), StoreError> {
    match document {
        Some(document) => println!("{}", serde_json::to_string_pretty(&document)?),
        None => println!("null"),
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), StoreError> {
    // Reject bad input before opening a connection.
    let (collection, filter) = match &cli.command {
        Command::DeleteMany(args) | Command::DeleteOne(args) | Command::FindOneAndDelete(args) => {
            (args.collection.clone(), args.parse()?)
        }
        Command::DeleteById { collection, id } => {
            validate_identifier(collection)?;
            (collection.clone(), by_id(id))
        }
    };

    let database_url = cli
        .database_url
        .as_deref()
        .ok_or_else(|| StoreError::Backend("DATABASE_URL must be set".into()))?;
    let store = PgDocumentStore::connect(database_url, 1).await?;
    log::info!("Connected to database");

    match cli.command {
        Command::DeleteMany(_) => {
            let deleted = store.delete_many(&collection, &filter).await?;
            println!("{{\"deletedCount\": {}}}", deleted);
        }
        Command::DeleteOne(_) => {
            let deleted = store.delete_one(&collection, &filter).await?;
            println!("{{\"deletedCount\": {}}}", deleted);
        }
        Command::FindOneAndDelete(_) | Command::DeleteById { .. } => {
            print_deleted(store.find_one_and_delete(&collection, &filter).await?)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
