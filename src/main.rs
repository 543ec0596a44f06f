use std::io::{self, Write};

use clap::Parser;
use colored::*;
use tokio_stream::StreamExt;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use branch_chat::cli::{apply_overrides, print_header, role_label, Args};
use branch_chat::controller::{Conversation, GenerationOutcome, SubmitOptions};
use branch_chat::persistence::{DocumentStore, SqliteDocumentStore};
use branch_chat::preview::{preview_html, CmarkCompiler};
use branch_chat::{Attachment, Config, DraftError, Role};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn print_transcript(conversation: &Conversation) {
    for node in conversation.transcript() {
        let text = node.display_text();
        if node.role == Role::System && text.is_empty() {
            continue;
        }
        println!("{}: {}", role_label(node.role), text);
        for att in &node.attachments {
            println!("  {} {} ({} bytes)", "+".bright_green(), att.file_name(), att.size());
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let file_config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let config = apply_overrides(file_config, &args);

    let provider = config.provider.connect()?;
    let conversation = Conversation::from_config(provider, &config);

    let drafts = match &args.draft {
        Some(_) => Some(SqliteDocumentStore::open(&config.database)?),
        None => None,
    };
    if let Some(docs) = &drafts {
        match conversation.load(docs, &config.draft_key) {
            Ok(()) | Err(DraftError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let Some(prompt) = args.prompt.as_deref() else {
        print_transcript(&conversation);
        return Ok(());
    };

    let target = conversation.prompt_target(args.branch)?;
    conversation.set_content(target, prompt)?;
    for path in &args.attachments {
        let attachment = if args.external {
            Attachment::external_from_path(path).await?
        } else {
            Attachment::inline_from_path(path).await?
        };
        conversation.upsert_attachment(target, attachment)?;
    }

    print_header(&config);
    println!("{}: {}", role_label(Role::User), prompt);
    print!("{}: ", role_label(Role::Assistant));
    io::stdout().flush()?;

    let generation = conversation.start_submit(target, SubmitOptions { keep_history: args.branch })?;
    let assistant_id = generation.assistant_id();
    let handle = generation.abort_handle();
    let mut live = generation.live_buffer().stream();

    // Watch streams coalesce, so print whatever the snapshot gained since
    // the last wakeup rather than each delta.
    let printer = tokio::spawn(async move {
        let mut printed = 0;
        while let Some(chunk) = live.next().await {
            if let Some(fresh) = chunk.snapshot.get(printed..) {
                print!("{}", fresh);
                let _ = io::stdout().flush();
                printed = chunk.snapshot.len();
            }
        }
    });

    let run = tokio::spawn(generation.run());
    let abort_on_interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.abort();
        }
    });
    let outcome = run.await?;
    abort_on_interrupt.abort();
    let _ = printer.await;
    println!();

    match &outcome {
        GenerationOutcome::Completed { .. } => {}
        GenerationOutcome::Aborted { .. } => println!("{}", "[aborted]".bright_red()),
        GenerationOutcome::Failed { message, .. } => {
            println!("{} {}", "[error]".bright_red().bold(), message)
        }
    }

    if let Some(node) = conversation.node(assistant_id) {
        let stats = node.metadata.get();
        println!("{}", "=".repeat(50).bright_blue());
        if let (Some(input), Some(output)) = (stats.total_input_tokens, stats.total_output_tokens) {
            println!(
                "{}: {} in / {} out",
                "Tokens".bright_yellow(),
                input,
                output
            );
        }
        if let Some(rate) = stats.tokens_per_second {
            println!("{}: {:.1}", "Tokens/sec".bright_yellow(), rate);
        }
    }

    if args.preview {
        let html = preview_html(conversation.store(), assistant_id, &CmarkCompiler)?;
        println!("{}", "Preview:".bright_green());
        println!("{}", html);
    }

    if let Some(docs) = &drafts {
        let skipped = conversation.save(docs as &dyn DocumentStore, &config.draft_key).await?;
        for s in &skipped {
            warn!(attachment = %s.attachment_id, error = %s.error, "attachment not saved");
        }
        println!("{} {}", "Saved draft".bright_green(), config.draft_key);
    }

    conversation.teardown();
    Ok(())
}
